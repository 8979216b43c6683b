//! Lifecycle controller.
//!
//! Orchestrates attach, open, suspend, resume, reset and disconnect, and
//! drains in-flight work before any teardown.
//!
//! # Lifecycle
//!
//! | Operation | I/O lock | Drain | State after |
//! |-----------|----------|-------|-------------|
//! | `attach()` | - | on failure only | `Armed` |
//! | `suspend()` | held | all kinds | `Draining` |
//! | `resume()` | - | - | unchanged (status poll stays stopped) |
//! | `pre_reset()` | taken, kept | all kinds | `Draining` |
//! | `post_reset()` | released | - | unchanged, `Halted` recorded |
//! | `disconnect()` | after drain | all kinds, registry poisoned | `Detached` |
//! | `DeviceFile::flush()` | held | command + correction | unchanged |
//!
//! # Drain
//!
//! 1. Refuse new anchors (poison) unless flushing.
//! 2. Cancel the status poll right away; it would otherwise only stop at
//!    its next completion.
//! 3. Wait up to the drain timeout for the in-flight registry to empty.
//! 4. Force-cancel whatever is left, then wait for each cancelled
//!    transfer's acknowledgment. A returned `cancel()` does not prove the
//!    completion handler is done.

use crate::file::DeviceFile;
use crate::monitor::StatusMonitor;
use crate::registry::DeviceRegistry;
use crate::session::{DeviceSession, SessionParts, SessionState};
use launcher_common::usb::config::DriverConfig;
use launcher_common::usb::consts::CTRL_FRAME_LEN;
use launcher_common::usb::error::DriverError;
use launcher_common::usb::transport::{Transfer, TransferKind, UsbTransport};
use launcher_common::usb::types::{CommandFrame, DeviceId, SetupPacket, SUPPORTED_DEVICES};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Which transfers a drain waits for, and whether it fences new ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DrainScope {
    /// Suspend / pre-reset: everything, registry poisoned while draining.
    Quiesce,
    /// Disconnect: everything, registry stays poisoned.
    Teardown,
    /// Flush: command and correction transfers only; the status poll keeps running.
    Flush,
}

impl DrainScope {
    fn includes(self, kind: TransferKind) -> bool {
        match self {
            DrainScope::Quiesce | DrainScope::Teardown => true,
            DrainScope::Flush => kind != TransferKind::StatusPoll,
        }
    }
}

/// Bounded-wait-then-force-cancel drain of one session.
///
/// Does not take the I/O lock; callers that need it hold it around the call.
/// Returns true if everything in scope completed before the timeout.
pub(crate) fn drain_session(session: &DeviceSession, timeout: Duration, scope: DrainScope) -> bool {
    let inflight = session.inflight();
    let transport = session.transport();
    let filter = |kind: TransferKind| scope.includes(kind);

    if scope != DrainScope::Flush {
        inflight.poison();
        if let Some(transport) = &transport {
            for id in inflight.snapshot(|kind| kind == TransferKind::StatusPoll) {
                transport.cancel(id);
            }
        }
    }

    let clean = inflight.wait_idle(timeout, filter);
    if !clean {
        let stragglers = inflight.snapshot(filter);
        warn!(
            "{}: drain timed out, force-cancelling {} transfer(s)",
            session.node_name(),
            stragglers.len()
        );
        if let Some(transport) = &transport {
            for id in &stragglers {
                transport.cancel(*id);
            }
        }
        if !inflight.wait_acknowledged(&stragglers, timeout) {
            error!(
                "{}: {} transfer(s) never acknowledged after cancel",
                session.node_name(),
                inflight.outstanding()
            );
        }
    }

    if scope == DrainScope::Quiesce {
        inflight.unpoison();
    }
    debug!("{}: drained ({:?}, clean={})", session.node_name(), scope, clean);
    clean
}

fn alloc_buffer(len: usize) -> Result<Vec<u8>, DriverError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|e| DriverError::ResourceExhausted(format!("{len}-byte transfer buffer: {e}")))?;
    buffer.resize(len, 0);
    Ok(buffer)
}

/// Owner of the device registry and entry point of every lifecycle event.
pub struct LifecycleController {
    config: DriverConfig,
    registry: DeviceRegistry,
}

impl LifecycleController {
    /// Create a controller.
    ///
    /// # Errors
    /// `Config` if the driver configuration does not validate.
    pub fn new(config: DriverConfig) -> Result<Self, DriverError> {
        config.validate()?;
        let registry = DeviceRegistry::new(config.max_devices);
        Ok(Self { config, registry })
    }

    /// Driver settings.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Bind a newly presented device.
    ///
    /// Allocates the status and correction transfers up front, claims a
    /// minor and arms the status poll. A failure at any step releases
    /// everything acquired before it; the session only becomes visible in
    /// the registry once fully armed.
    ///
    /// # Errors
    /// - `UnsupportedDevice` - identity not in the supported table, or no interrupt-IN endpoint
    /// - `ResourceExhausted` - buffer allocation failed or no free minor
    /// - any error of the initial status-poll submission
    pub fn attach(
        &self,
        transport: Arc<dyn UsbTransport>,
    ) -> Result<Arc<DeviceSession>, DriverError> {
        let descriptor = transport.descriptor();
        let unsupported = || DriverError::UnsupportedDevice {
            vendor_id: descriptor.id.vendor_id,
            product_id: descriptor.id.product_id,
        };
        if !SUPPORTED_DEVICES.contains(&descriptor.id) {
            debug!("ignoring device {}", descriptor.id);
            return Err(unsupported());
        }
        let status_endpoint = *descriptor.interrupt_in().ok_or_else(|| {
            warn!("{}: no interrupt-IN endpoint", descriptor.id);
            unsupported()
        })?;

        let status_buffer = alloc_buffer(self.config.status_buffer_size)?;
        let mut correction_buffer = alloc_buffer(CTRL_FRAME_LEN)?;
        CommandFrame::STOP.write_into(&mut correction_buffer);

        let minor = self.registry.claim()?;
        let session = DeviceSession::new(SessionParts {
            id: descriptor.id,
            minor,
            config: self.config.clone(),
            status_endpoint,
            transport,
            correction: Transfer::control_out(
                TransferKind::Correction,
                SetupPacket::LAUNCHER_COMMAND,
                correction_buffer,
            ),
        });

        let status = Transfer::interrupt_in(
            TransferKind::StatusPoll,
            status_endpoint.address,
            status_buffer,
        );
        let armed = StatusMonitor::arm(&session, status)
            .and_then(|()| {
                session.advance(SessionState::Armed);
                self.registry.bind(minor, Arc::clone(&session))
            });
        if let Err(err) = armed {
            warn!("{}: attach failed: {}", session.node_name(), err);
            self.unwind(&session);
            self.registry.release(minor);
            return Err(err);
        }

        info!(
            "{}: attached {} (status endpoint {:#04x})",
            session.node_name(),
            descriptor.id,
            status_endpoint.address
        );
        Ok(session)
    }

    fn unwind(&self, session: &DeviceSession) {
        session.mark_disconnected();
        drain_session(session, self.config.drain_timeout(), DrainScope::Teardown);
        session.release_transport();
        session.advance(SessionState::Detached);
    }

    /// Open the session bound to `minor`.
    ///
    /// # Errors
    /// `NotFound` if no session is bound there or it was torn down.
    pub fn open(&self, minor: usize) -> Result<DeviceFile, DriverError> {
        let session = self
            .registry
            .get(minor)
            .ok_or_else(|| DriverError::NotFound(format!("minor {minor}")))?;
        DeviceFile::open(session)
    }

    /// Open a session by reference.
    ///
    /// # Errors
    /// `NotFound` if the session was torn down.
    pub fn open_session(&self, session: &Arc<DeviceSession>) -> Result<DeviceFile, DriverError> {
        DeviceFile::open(Arc::clone(session))
    }

    /// Release a handle. The session's memory goes with the last reference.
    pub fn close(&self, file: DeviceFile) {
        file.close();
    }

    /// Cancel and wait for all outstanding transfers of a session.
    ///
    /// Returns true if nothing had to be force-cancelled.
    pub fn drain(&self, session: &DeviceSession) -> bool {
        drain_session(session, self.config.drain_timeout(), DrainScope::Quiesce)
    }

    /// Tear down a session: refuse new submissions, drain, release the
    /// transport and drop the controller's reference. Idempotent.
    ///
    /// A caller blocked in a command is woken and fails with `NoDevice`.
    pub fn disconnect(&self, session: &Arc<DeviceSession>) {
        if !session.mark_disconnected() {
            return;
        }
        info!("{}: disconnecting", session.node_name());
        session.advance(SessionState::Draining);
        session.wake_command_waiter();
        let own_reference = self.registry.release(session.minor());

        drain_session(session, self.config.drain_timeout(), DrainScope::Teardown);

        {
            // Reset holds the lock across two calls; don't wait for it.
            let _io = if session.reset_held() {
                None
            } else {
                let io = session.io_lock().acquire_timeout(self.config.command_timeout());
                if io.is_none() {
                    warn!("{}: I/O lock not obtained, releasing anyway", session.node_name());
                }
                io
            };
            session.release_transport();
            session.advance(SessionState::Detached);
        }

        info!(
            "{}: disconnected ({} open handle(s))",
            session.node_name(),
            session.open_handles()
        );
        drop(own_reference);
    }

    /// Disconnect the session bound to `minor`, if any.
    pub fn disconnect_minor(&self, minor: usize) -> bool {
        match self.registry.get(minor) {
            Some(session) => {
                self.disconnect(&session);
                true
            }
            None => false,
        }
    }

    /// Quiesce the device. The status poll stops and is not restarted by
    /// [`LifecycleController::resume`].
    pub fn suspend(&self, session: &DeviceSession) {
        debug!("{}: suspend", session.node_name());
        let _io = session.io_lock().acquire();
        session.advance(SessionState::Draining);
        drain_session(session, self.config.drain_timeout(), DrainScope::Quiesce);
    }

    /// Resume after suspend. Does not re-arm the status poll.
    pub fn resume(&self, session: &DeviceSession) {
        debug!("{}: resume", session.node_name());
    }

    /// Take the I/O lock and drain before a device reset. The lock stays
    /// held until [`LifecycleController::post_reset`].
    pub fn pre_reset(&self, session: &DeviceSession) {
        debug!("{}: pre-reset", session.node_name());
        session.io_lock().acquire_detached();
        session.set_reset_held(true);
        session.advance(SessionState::Draining);
        drain_session(session, self.config.drain_timeout(), DrainScope::Quiesce);
    }

    /// Record the halted control endpoint and release the I/O lock.
    ///
    /// The next command clears the halt before transmitting.
    pub fn post_reset(&self, session: &DeviceSession) {
        debug!("{}: post-reset", session.node_name());
        session.mark_control_halted();
        if session.set_reset_held(false) {
            session.io_lock().release_detached();
        } else {
            warn!("{}: post-reset without pre-reset", session.node_name());
        }
    }

    /// Session bound to `minor`.
    pub fn session(&self, minor: usize) -> Option<Arc<DeviceSession>> {
        self.registry.get(minor)
    }

    /// All attached sessions.
    pub fn sessions(&self) -> Vec<Arc<DeviceSession>> {
        self.registry.sessions()
    }

    /// Attached sessions with the given identity.
    pub fn find(&self, id: DeviceId) -> Vec<Arc<DeviceSession>> {
        self.registry.find(id)
    }

    /// Disconnect every attached session.
    pub fn shutdown(&self) {
        let sessions = self.registry.sessions();
        if !sessions.is_empty() {
            info!("shutting down {} session(s)", sessions.len());
        }
        for session in sessions {
            self.disconnect(&session);
        }
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
