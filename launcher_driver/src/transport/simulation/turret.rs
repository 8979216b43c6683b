//! Two-axis turret model.
//!
//! Each axis runs at constant speed while commanded and clamps at its
//! travel limits. Reaching a limit does not cancel the command: the motor
//! keeps pushing against the end stop until a STOP arrives, which is what
//! the correction engine exists for.

use launcher_common::usb::types::{Command, LimitState};
use std::time::Duration;
use tracing::{debug, trace};

/// One axis of travel.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisModel {
    position: f64,
    min: f64,
    max: f64,
    speed: f64,
}

impl AxisModel {
    /// Create an axis at `start` (clamped into `[min, max]`).
    pub fn new(start: f64, min: f64, max: f64, speed: f64) -> Self {
        Self {
            position: start.clamp(min, max),
            min,
            max,
            speed,
        }
    }

    /// Move for `dt` in `direction` (-1, 0, +1).
    pub fn step(&mut self, direction: i8, dt: Duration) {
        let delta = f64::from(direction) * self.speed * dt.as_secs_f64();
        self.position = (self.position + delta).clamp(self.min, self.max);
    }

    /// Current position.
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Place the axis (clamped).
    pub fn set_position(&mut self, position: f64) {
        self.position = position.clamp(self.min, self.max);
    }

    /// At the lower end stop.
    pub fn at_min(&self) -> bool {
        self.position <= self.min
    }

    /// At the upper end stop.
    pub fn at_max(&self) -> bool {
        self.position >= self.max
    }
}

/// Pan/tilt turret with a launcher.
#[derive(Debug, Clone)]
pub struct TurretModel {
    pan: AxisModel,
    tilt: AxisModel,
    motion: Command,
    shots: u32,
}

impl TurretModel {
    /// Create a stationary turret.
    pub fn new(pan: AxisModel, tilt: AxisModel) -> Self {
        Self {
            pan,
            tilt,
            motion: Command::empty(),
            shots: 0,
        }
    }

    /// Execute a received command byte.
    pub fn apply(&mut self, command: Command) {
        if command.contains(Command::STOP) {
            self.motion = Command::empty();
        } else if command.contains(Command::FIRE) {
            self.motion = Command::empty();
            self.shots += 1;
            debug!("turret fired (shot {})", self.shots);
        } else {
            self.motion = command & Command::MOTION_MASK;
        }
        trace!("turret motion {:?}", self.motion);
    }

    /// Advance the model by `dt`.
    pub fn advance(&mut self, dt: Duration) {
        let pan = direction(self.motion, Command::RIGHT, Command::LEFT);
        let tilt = direction(self.motion, Command::UP, Command::DOWN);
        self.pan.step(pan, dt);
        self.tilt.step(tilt, dt);
    }

    /// Limit switch flags.
    pub fn limits(&self) -> LimitState {
        LimitState {
            max_up: self.tilt.at_max(),
            max_down: self.tilt.at_min(),
            max_left: self.pan.at_min(),
            max_right: self.pan.at_max(),
        }
    }

    /// `(pan, tilt)` in degrees.
    pub fn position(&self) -> (f64, f64) {
        (self.pan.position(), self.tilt.position())
    }

    /// Place the turret.
    pub fn set_position(&mut self, pan: f64, tilt: f64) {
        self.pan.set_position(pan);
        self.tilt.set_position(tilt);
    }

    /// Directions currently driven.
    pub fn motion(&self) -> Command {
        self.motion
    }

    /// Shots fired so far.
    pub fn shots(&self) -> u32 {
        self.shots
    }
}

fn direction(motion: Command, positive: Command, negative: Command) -> i8 {
    match (motion.contains(positive), motion.contains(negative)) {
        (true, false) => 1,
        (false, true) => -1,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turret() -> TurretModel {
        TurretModel::new(
            AxisModel::new(0.0, -10.0, 10.0, 100.0),
            AxisModel::new(0.0, -5.0, 5.0, 100.0),
        )
    }

    #[test]
    fn test_moves_and_clamps_at_limit() {
        let mut t = turret();
        t.apply(Command::UP);
        t.advance(Duration::from_millis(20));
        assert!((t.position().1 - 2.0).abs() < 1e-9);
        assert!(!t.limits().max_up);

        t.advance(Duration::from_secs(1));
        assert_eq!(t.position().1, 5.0);
        assert!(t.limits().max_up);
        // Still driving into the end stop.
        assert_eq!(t.motion(), Command::UP);
    }

    #[test]
    fn test_stop_halts_motion() {
        let mut t = turret();
        t.apply(Command::LEFT | Command::DOWN);
        t.advance(Duration::from_millis(10));
        t.apply(Command::STOP);
        let before = t.position();
        t.advance(Duration::from_secs(1));
        assert_eq!(t.position(), before);
        assert!(t.motion().is_empty());
    }

    #[test]
    fn test_fire_counts_shots() {
        let mut t = turret();
        t.apply(Command::FIRE);
        t.apply(Command::FIRE);
        assert_eq!(t.shots(), 2);
    }

    #[test]
    fn test_limits_layout() {
        let mut t = turret();
        t.set_position(-10.0, -5.0);
        let limits = t.limits();
        assert!(limits.max_left && limits.max_down);
        assert!(!limits.max_right && !limits.max_up);
    }
}
