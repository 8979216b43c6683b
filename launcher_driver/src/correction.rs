//! Closed-loop limit correction.
//!
//! When the turret reports a mechanical limit while it is still commanded
//! towards that limit, the engine issues a STOP on its own through a
//! pre-allocated transfer. It runs inside status completions and never
//! blocks or allocates.
//!
//! The engine owns only `correction_needed` and `correction_in_flight`.
//! It never rewrites the commanded direction: after a successful stop the
//! session still reports the direction the caller asked for.

use crate::session::{DeviceSession, SessionStats};
use launcher_common::usb::transport::{Transfer, TransferKind};
use launcher_common::usb::types::{Command, CommandFrame, LimitAxis, LimitState};
use tracing::{debug, trace, warn};

/// Rule table in priority order. The first matching axis wins.
pub const CORRECTION_PRIORITY: [LimitAxis; 4] =
    [LimitAxis::Up, LimitAxis::Down, LimitAxis::Left, LimitAxis::Right];

/// First axis that is both commanded and at its limit.
pub fn conflicting_axis(commanded: Command, limits: LimitState) -> Option<LimitAxis> {
    CORRECTION_PRIORITY
        .into_iter()
        .find(|&axis| commanded.contains(axis.command()) && limits.is_tripped(axis))
}

/// Autonomous stop override.
pub struct CorrectionEngine;

impl CorrectionEngine {
    /// Decide whether a stop is needed and record the decision in the session.
    pub fn evaluate(session: &DeviceSession) -> bool {
        let commanded = session.last_commanded();
        let limits = session.limit_state();
        let axis = conflicting_axis(commanded, limits);
        if let Some(axis) = axis {
            trace!(
                "{}: commanded {:#04x} against {:?} limit",
                session.node_name(),
                commanded.bits(),
                axis
            );
        }
        session.set_correction_needed(axis.is_some());
        axis.is_some()
    }

    /// Submit the stop if needed and none is outstanding.
    ///
    /// Returns true if a correction transfer was submitted.
    pub fn apply(session: &DeviceSession) -> bool {
        if !session.correction_needed() {
            return false;
        }
        if !session.begin_correction() {
            trace!("{}: correction already in flight", session.node_name());
            return false;
        }

        let Some(transport) = session.transport() else {
            session.end_correction();
            return false;
        };
        let Some(mut transfer) = session.take_correction_slot() else {
            session.end_correction();
            return false;
        };

        if !CommandFrame::STOP.write_into(&mut transfer.buffer) {
            session.restore_correction_slot(transfer);
            session.end_correction();
            return false;
        }

        let inflight = session.inflight();
        let id = inflight.next_id();
        transfer.rearm(id);
        if inflight.anchor(id, TransferKind::Correction).is_err() {
            session.restore_correction_slot(transfer);
            session.end_correction();
            return false;
        }

        match transport.submit(transfer, session.completions()) {
            Ok(()) => {
                SessionStats::bump(&session.stats().corrections_issued);
                debug!("{}: limit reached, correction stop {}", session.node_name(), id);
                true
            }
            Err(refused) => {
                warn!("{}: correction stop refused: {}", session.node_name(), refused.error);
                SessionStats::bump(&session.stats().correction_failures);
                session.restore_correction_slot(refused.transfer);
                session.end_correction();
                inflight.acknowledge(id);
                false
            }
        }
    }

    /// Completion of the correction stop.
    ///
    /// A failed stop leaves `correction_in_flight` set so a persistent fault
    /// cannot turn into a stream of corrections. Nobody waits on this path;
    /// the failure is only logged and counted.
    pub(crate) fn on_complete(session: &DeviceSession, transfer: Transfer) {
        let succeeded = transfer.status.is_success();
        if succeeded {
            trace!("{}: correction stop {} done", session.node_name(), transfer.id);
        } else {
            warn!(
                "{}: correction stop {} {}, correction stays latched",
                session.node_name(),
                transfer.id,
                transfer.status
            );
            SessionStats::bump(&session.stats().correction_failures);
        }
        // The slot must be back before the flag drops, or a racing status
        // completion finds the flag clear and the buffer missing.
        session.restore_correction_slot(transfer);
        if succeeded {
            session.end_correction();
        }
    }
}
