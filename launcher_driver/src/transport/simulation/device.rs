//! Simulated launcher device.
//!
//! A dispatch thread plays the role of the host controller: it advances
//! the turret model, completes interrupt-IN transfers every poll interval
//! with the current limit flags, and completes control transfers after
//! the configured latency. Completion handlers always run on the dispatch
//! thread, never under the device lock.

use super::config::SimulationConfig;
use super::turret::{AxisModel, TurretModel};
use crate::sync::lock;
use launcher_common::usb::consts::CONTROL_ENDPOINT;
use launcher_common::usb::error::DriverError;
use launcher_common::usb::transport::{
    CompletionHandler, DeviceDescriptor, EndpointDescriptor, EndpointType, SubmitError, Transfer,
    TransferId, TransferStatus, TransportError, UsbTransport,
};
use launcher_common::usb::types::{CommandFrame, DeviceId, LimitState};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Upper bound of one dispatch-thread sleep.
const IDLE_WAIT: Duration = Duration::from_millis(50);

struct Pending {
    transfer: Transfer,
    handler: Arc<dyn CompletionHandler>,
    due: Instant,
    /// Forced outcome (cancel / unplug) instead of the simulated one.
    outcome: Option<TransferStatus>,
}

struct SimState {
    turret: TurretModel,
    queue: VecDeque<Pending>,
    plugged: bool,
    running: bool,
    control_stalled: bool,
    status_stalled: bool,
    failing_polls: u32,
    last_step: Instant,
}

struct Shared {
    config: SimulationConfig,
    state: Mutex<SimState>,
    wake: Condvar,
}

/// `UsbTransport` backed by a software turret.
pub struct SimulatedLauncher {
    shared: Arc<Shared>,
    descriptor: DeviceDescriptor,
    worker: Option<JoinHandle<()>>,
}

impl SimulatedLauncher {
    /// Build the device and start its dispatch thread.
    ///
    /// # Errors
    /// - `Config` if the configuration does not validate
    /// - `Transport` if the dispatch thread cannot be spawned
    pub fn new(config: SimulationConfig) -> Result<Self, DriverError> {
        config.validate()?;

        let turret = TurretModel::new(
            AxisModel::new(
                config.start_position[0],
                config.pan_range[0],
                config.pan_range[1],
                config.pan_speed,
            ),
            AxisModel::new(
                config.start_position[1],
                config.tilt_range[0],
                config.tilt_range[1],
                config.tilt_speed,
            ),
        );
        let descriptor = DeviceDescriptor {
            id: DeviceId::new(config.vendor_id, config.product_id),
            endpoints: vec![EndpointDescriptor {
                address: config.status_endpoint,
                kind: EndpointType::Interrupt,
                interval_ms: u8::try_from(config.poll_interval_ms).unwrap_or(u8::MAX),
                max_packet_size: 8,
            }],
        };

        let shared = Arc::new(Shared {
            config,
            state: Mutex::new(SimState {
                turret,
                queue: VecDeque::new(),
                plugged: true,
                running: true,
                control_stalled: false,
                status_stalled: false,
                failing_polls: 0,
                last_step: Instant::now(),
            }),
            wake: Condvar::new(),
        });

        let worker = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("launcher-sim".to_string())
                .spawn(move || dispatch_loop(&shared))
                .map_err(|e| DriverError::Transport(format!("spawn dispatch thread: {e}")))?
        };

        info!("simulated launcher {} ready", descriptor.id);
        Ok(Self {
            shared,
            descriptor,
            worker: Some(worker),
        })
    }

    /// Simulate pulling the cable: every queued transfer completes with
    /// `Disconnected` and new submissions are refused.
    pub fn unplug(&self) {
        let mut state = lock(&self.shared.state);
        if !state.plugged {
            return;
        }
        state.plugged = false;
        let now = Instant::now();
        for pending in state.queue.iter_mut() {
            pending.outcome = Some(TransferStatus::Disconnected);
            pending.due = now;
        }
        drop(state);
        info!("simulated launcher unplugged");
        self.shared.wake.notify_all();
    }

    /// Stall the control endpoint until `clear_halt(0)`.
    pub fn stall_control(&self) {
        lock(&self.shared.state).control_stalled = true;
    }

    /// Stall the status endpoint until it is cleared.
    pub fn stall_status(&self) {
        lock(&self.shared.state).status_stalled = true;
    }

    /// Fail the next `count` status reports with a transport error.
    pub fn fail_next_polls(&self, count: u32) {
        lock(&self.shared.state).failing_polls = count;
    }

    /// Place the turret.
    pub fn set_position(&self, pan: f64, tilt: f64) {
        lock(&self.shared.state).turret.set_position(pan, tilt);
    }

    /// `(pan, tilt)` in degrees.
    pub fn position(&self) -> (f64, f64) {
        lock(&self.shared.state).turret.position()
    }

    /// Current limit-switch flags.
    pub fn limits(&self) -> LimitState {
        lock(&self.shared.state).turret.limits()
    }

    /// Whether any axis is being driven.
    pub fn is_moving(&self) -> bool {
        !lock(&self.shared.state).turret.motion().is_empty()
    }

    /// Shots fired so far.
    pub fn shots(&self) -> u32 {
        lock(&self.shared.state).turret.shots()
    }

    /// Number of transfers queued on the device.
    pub fn queued(&self) -> usize {
        lock(&self.shared.state).queue.len()
    }
}

impl UsbTransport for SimulatedLauncher {
    fn descriptor(&self) -> DeviceDescriptor {
        self.descriptor.clone()
    }

    fn submit(
        &self,
        transfer: Transfer,
        handler: Arc<dyn CompletionHandler>,
    ) -> Result<(), SubmitError> {
        let config = &self.shared.config;
        let delay = if transfer.endpoint == CONTROL_ENDPOINT {
            if transfer.setup.is_none() {
                return Err(SubmitError {
                    error: TransportError::Rejected("control transfer without setup".into()),
                    transfer,
                });
            }
            config.control_latency()
        } else if transfer.endpoint == config.status_endpoint {
            config.poll_interval()
        } else {
            return Err(SubmitError {
                error: TransportError::Rejected(format!("no endpoint {:#04x}", transfer.endpoint)),
                transfer,
            });
        };

        let mut state = lock(&self.shared.state);
        if !state.plugged {
            return Err(SubmitError {
                error: TransportError::Disconnected,
                transfer,
            });
        }
        trace!("sim: queued {} on ep {:#04x}", transfer.id, transfer.endpoint);
        state.queue.push_back(Pending {
            transfer,
            handler,
            due: Instant::now() + delay,
            outcome: None,
        });
        drop(state);
        self.shared.wake.notify_all();
        Ok(())
    }

    fn cancel(&self, id: TransferId) {
        let mut state = lock(&self.shared.state);
        if let Some(pending) = state.queue.iter_mut().find(|p| p.transfer.id == id) {
            trace!("sim: cancel {}", id);
            pending.outcome.get_or_insert(TransferStatus::Cancelled);
            pending.due = Instant::now();
            drop(state);
            self.shared.wake.notify_all();
        }
    }

    fn clear_halt(&self, endpoint: u8) -> Result<(), TransportError> {
        let mut state = lock(&self.shared.state);
        if !state.plugged {
            return Err(TransportError::Disconnected);
        }
        if endpoint == CONTROL_ENDPOINT && state.control_stalled {
            debug!("sim: control endpoint halt cleared");
            state.control_stalled = false;
        } else if endpoint == self.shared.config.status_endpoint && state.status_stalled {
            debug!("sim: status endpoint halt cleared");
            state.status_stalled = false;
        }
        Ok(())
    }
}

impl Drop for SimulatedLauncher {
    fn drop(&mut self) {
        lock(&self.shared.state).running = false;
        self.shared.wake.notify_all();
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                warn!("simulated launcher dispatch thread panicked");
            }
        }
    }
}

fn dispatch_loop(shared: &Shared) {
    let mut ready = Vec::new();
    loop {
        {
            let mut state = lock(&shared.state);
            if !state.running {
                break;
            }

            let now = Instant::now();
            let dt = now.saturating_duration_since(state.last_step);
            state.last_step = now;
            state.turret.advance(dt);

            let mut i = 0;
            while i < state.queue.len() {
                if state.queue[i].due <= now {
                    if let Some(pending) = state.queue.remove(i) {
                        ready.push(finish(&mut state, pending));
                    }
                } else {
                    i += 1;
                }
            }

            if ready.is_empty() {
                let next_due = state.queue.iter().map(|p| p.due).min();
                let wait = next_due
                    .map(|due| due.saturating_duration_since(now).min(IDLE_WAIT))
                    .unwrap_or(IDLE_WAIT);
                let _ = shared
                    .wake
                    .wait_timeout(state, wait)
                    .unwrap_or_else(PoisonError::into_inner);
                continue;
            }
        }

        for (transfer, handler) in ready.drain(..) {
            handler.complete(transfer);
        }
    }

    // Anything still queued at shutdown is cancelled.
    let leftovers: Vec<_> = lock(&shared.state).queue.drain(..).collect();
    for mut pending in leftovers {
        pending.transfer.finish(TransferStatus::Cancelled, 0);
        pending.handler.complete(pending.transfer);
    }
}

fn finish(state: &mut SimState, pending: Pending) -> (Transfer, Arc<dyn CompletionHandler>) {
    let Pending {
        mut transfer,
        handler,
        outcome,
        ..
    } = pending;

    if let Some(status) = outcome {
        transfer.finish(status, 0);
    } else if transfer.endpoint == CONTROL_ENDPOINT {
        if state.control_stalled {
            transfer.finish(TransferStatus::Stalled, 0);
        } else {
            match CommandFrame::decode(&transfer.buffer) {
                Some(command) => {
                    state.turret.apply(command);
                    let len = transfer.buffer.len();
                    transfer.finish(TransferStatus::Completed, len);
                }
                None => transfer.finish(TransferStatus::Failed("malformed frame".into()), 0),
            }
        }
    } else if state.status_stalled {
        transfer.finish(TransferStatus::Stalled, 0);
    } else if state.failing_polls > 0 {
        state.failing_polls -= 1;
        transfer.finish(TransferStatus::Failed("injected poll error".into()), 0);
    } else {
        let report = state.turret.limits().encode();
        let len = report.len().min(transfer.buffer.len());
        transfer.buffer[..len].copy_from_slice(&report[..len]);
        transfer.finish(TransferStatus::Completed, len);
    }
    (transfer, handler)
}
