//! Status monitor.
//!
//! A single interrupt-IN transfer is re-armed from its own completion for
//! as long as the session lives. Each successful completion refreshes the
//! limit flags and runs the correction engine before the transfer goes
//! back out.
//!
//! | Completion | Decode | Correction | Resubmit |
//! |------------|--------|------------|----------|
//! | success, >= 2 bytes | yes | yes | yes |
//! | success, short payload | no | no | yes |
//! | stall | no | no | yes, after clearing the status endpoint |
//! | timeout / failure | no | no | yes |
//! | cancelled / disconnected | no | no | **no** (monitor stops) |
//!
//! Re-arming also stops once the in-flight registry is poisoned by a drain
//! or the transport has been released.
//!
//! A stalled status endpoint is cleared here. It never blocks the command
//! channel, whose own halt is tracked separately by the session.

use crate::correction::CorrectionEngine;
use crate::session::{DeviceSession, SessionStats};
use launcher_common::usb::error::DriverError;
use launcher_common::usb::transport::{Transfer, TransferKind, TransferStatus};
use launcher_common::usb::types::LimitState;
use tracing::{debug, trace, warn};

/// Perpetually re-armed listener on the status channel.
pub struct StatusMonitor;

impl StatusMonitor {
    /// Submit the status poll for the first time.
    ///
    /// On failure the transfer is parked in the session and the error returned.
    pub(crate) fn arm(session: &DeviceSession, transfer: Transfer) -> Result<(), DriverError> {
        Self::submit(session, transfer)
    }

    /// Completion of the status poll. Runs on the transport's dispatch context.
    pub(crate) fn on_complete(session: &DeviceSession, transfer: Transfer) {
        let status = &transfer.status;
        if status.is_cancellation() {
            debug!(
                "{}: status poll {} {}, monitor stopped",
                session.node_name(),
                transfer.id,
                status
            );
            session.park_status(transfer);
            return;
        }

        match status {
            TransferStatus::Completed => match LimitState::decode(transfer.data()) {
                Some(limits) => {
                    SessionStats::bump(&session.stats().status_polls);
                    let previous = session.limit_state();
                    session.set_limit_state(limits);
                    if previous != limits {
                        debug!("{}: limits {:?}", session.node_name(), limits);
                    }
                    if CorrectionEngine::evaluate(session) {
                        CorrectionEngine::apply(session);
                    }
                }
                None => {
                    Self::record_error(
                        session,
                        DriverError::Transport(format!(
                            "short status payload ({} bytes)",
                            transfer.data().len()
                        )),
                    );
                }
            },
            TransferStatus::Stalled => {
                Self::record_error(session, DriverError::Halted);
                Self::clear_halt(session);
            }
            TransferStatus::TimedOut => Self::record_error(session, DriverError::Timeout),
            other => Self::record_error(session, DriverError::Transport(other.to_string())),
        }

        if let Err(err) = Self::submit(session, transfer) {
            debug!("{}: status poll not re-armed: {}", session.node_name(), err);
        }
    }

    fn record_error(session: &DeviceSession, error: DriverError) {
        warn!("{}: status poll error: {}", session.node_name(), error);
        SessionStats::bump(&session.stats().status_errors);
        session.set_last_error(error);
    }

    /// Clear the status endpoint before the poll goes back out. A failure is
    /// logged and the poll re-armed anyway; the next stall retries.
    fn clear_halt(session: &DeviceSession) {
        let Some(transport) = session.transport() else {
            return;
        };
        let endpoint = session.status_endpoint().address;
        debug!("{}: clearing halted status endpoint {:#04x}", session.node_name(), endpoint);
        if let Err(err) = transport.clear_halt(endpoint) {
            warn!("{}: clear halt {:#04x} failed: {}", session.node_name(), endpoint, err);
        }
    }

    fn submit(session: &DeviceSession, mut transfer: Transfer) -> Result<(), DriverError> {
        let Some(transport) = session.transport() else {
            session.park_status(transfer);
            return Err(DriverError::NoDevice);
        };

        let inflight = session.inflight();
        let id = inflight.next_id();
        transfer.rearm(id);
        if let Err(err) = inflight.anchor(id, TransferKind::StatusPoll) {
            session.park_status(transfer);
            return Err(if session.is_connected() {
                DriverError::Transport(format!("status poll refused: {err:?}"))
            } else {
                DriverError::NoDevice
            });
        }

        // Set before submitting: the completion may run before submit returns.
        session.set_monitor_active(true);
        trace!("{}: arm status poll {}", session.node_name(), id);
        match transport.submit(transfer, session.completions()) {
            Ok(()) => Ok(()),
            Err(refused) => {
                let error = DriverError::from(refused.error);
                warn!("{}: status poll submit failed: {}", session.node_name(), error);
                session.park_status(refused.transfer);
                session.set_last_error(error.clone());
                inflight.acknowledge(id);
                Err(error)
            }
        }
    }
}
