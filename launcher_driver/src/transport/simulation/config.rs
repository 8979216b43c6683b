//! `[transport.simulation]` configuration.

use launcher_common::config::ConfigError;
use launcher_common::usb::consts::{LAUNCHER_PRODUCT_ID, LAUNCHER_VENDOR_ID};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings of the simulated launcher.
///
/// # TOML Example
///
/// ```toml
/// [transport.simulation]
/// poll_interval_ms = 10
/// control_latency_ms = 2
/// pan_speed = 90.0
/// pan_range = [-135.0, 135.0]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Interval between status reports on the interrupt endpoint.
    pub poll_interval_ms: u64,
    /// Time until a control transfer is acknowledged.
    pub control_latency_ms: u64,
    /// Pan speed in degrees per second.
    pub pan_speed: f64,
    /// Tilt speed in degrees per second.
    pub tilt_speed: f64,
    /// Pan travel `[left, right]` in degrees.
    pub pan_range: [f64; 2],
    /// Tilt travel `[down, up]` in degrees.
    pub tilt_range: [f64; 2],
    /// Starting position `[pan, tilt]`.
    pub start_position: [f64; 2],
    /// Address of the interrupt-IN status endpoint.
    pub status_endpoint: u8,
    /// Reported idVendor.
    pub vendor_id: u16,
    /// Reported idProduct.
    pub product_id: u16,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10,
            control_latency_ms: 2,
            pan_speed: 90.0,
            tilt_speed: 45.0,
            pan_range: [-135.0, 135.0],
            tilt_range: [-5.0, 30.0],
            start_position: [0.0, 0.0],
            status_endpoint: 0x81,
            vendor_id: LAUNCHER_VENDOR_ID,
            product_id: LAUNCHER_PRODUCT_ID,
        }
    }
}

impl SimulationConfig {
    /// Status report interval.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Control acknowledgment latency.
    pub fn control_latency(&self) -> Duration {
        Duration::from_millis(self.control_latency_ms)
    }

    /// Validate the simulation settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.status_endpoint & 0x80 == 0 {
            return Err(ConfigError::ValidationError(format!(
                "status_endpoint {:#04x} is not an IN endpoint",
                self.status_endpoint
            )));
        }
        for (name, speed) in [("pan_speed", self.pan_speed), ("tilt_speed", self.tilt_speed)] {
            if !(speed.is_finite() && speed > 0.0) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be positive (got {speed})"
                )));
            }
        }
        for (name, [min, max]) in [("pan_range", self.pan_range), ("tilt_range", self.tilt_range)] {
            if !(min < max) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be [min, max] with min < max (got [{min}, {max}])"
                )));
            }
        }
        Ok(())
    }
}
