//! Per-device session state.
//!
//! A `DeviceSession` is created at attach and shared (`Arc`) between the
//! lifecycle controller, open device files and the completion handler.
//! The `Arc` strong count is the session's reference count: memory lives
//! until the last holder lets go, independent of `connected`. Transport
//! resources are released at disconnect regardless of outstanding
//! references.
//!
//! # Synchronization domains
//!
//! | Domain | Primitive | Holds across waits | Completion context |
//! |--------|-----------|--------------------|--------------------|
//! | I/O lock | [`IoLock`] | yes | never acquired |
//! | Field lock | `Mutex<SessionFields>` | no | short sections only |
//! | Direction / limits / flags | atomics | n/a | yes |
//! | Lifetime | `Arc` strong count | n/a | `Weak` upgrade |

use crate::inflight::InFlightRegistry;
use crate::sync::{lock, IoLock};
use launcher_common::usb::config::DriverConfig;
use launcher_common::usb::error::DriverError;
use launcher_common::usb::transport::{
    CompletionHandler, EndpointDescriptor, Transfer, TransferKind, UsbTransport,
};
use launcher_common::usb::types::{Command, DeviceId, LimitState};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, Weak};
use tracing::{debug, trace};

/// Lifecycle of a session.
///
/// `Attached → Armed → Draining → Detached`. Disconnect from any state
/// lands in `Detached`; nothing leaves `Detached`. Whether a correction is
/// outstanding is an orthogonal overlay ([`DeviceSession::is_correcting`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Resources allocated, status poll not yet running.
    Attached,
    /// Status poll running.
    Armed,
    /// Drain started (suspend, pre-reset or disconnect); the monitor is stopped.
    Draining,
    /// Disconnected; transport released.
    Detached,
}

impl SessionState {
    /// Whether `self → next` is a legal transition.
    pub const fn can_advance(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Detached, _) => false,
            (_, Detached) => true,
            (Attached, Armed) => true,
            (Attached | Armed | Draining, Draining) => true,
            _ => false,
        }
    }
}

/// Counters reported through the observability side channel.
#[derive(Debug, Default)]
pub struct SessionStats {
    /// Command transfers that completed successfully
    pub commands_sent: AtomicU64,
    /// Command transfers that failed or timed out
    pub command_failures: AtomicU64,
    /// Status completions decoded
    pub status_polls: AtomicU64,
    /// Status completions with a transport error
    pub status_errors: AtomicU64,
    /// Correction stops submitted
    pub corrections_issued: AtomicU64,
    /// Correction stops that completed with an error
    pub correction_failures: AtomicU64,
}

impl SessionStats {
    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            command_failures: self.command_failures.load(Ordering::Relaxed),
            status_polls: self.status_polls.load(Ordering::Relaxed),
            status_errors: self.status_errors.load(Ordering::Relaxed),
            corrections_issued: self.corrections_issued.load(Ordering::Relaxed),
            correction_failures: self.correction_failures.load(Ordering::Relaxed),
        }
    }
}

/// Serializable copy of [`SessionStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[allow(missing_docs)]
pub struct StatsSnapshot {
    pub commands_sent: u64,
    pub command_failures: u64,
    pub status_polls: u64,
    pub status_errors: u64,
    pub corrections_issued: u64,
    pub correction_failures: u64,
}

/// Serializable view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// `vendor:product`
    pub device: String,
    /// Minor number
    pub minor: usize,
    /// Lifecycle state
    pub state: SessionState,
    /// Whether submissions are accepted
    pub connected: bool,
    /// Last command byte handed to the command channel
    pub last_commanded: u8,
    /// Last decoded limit flags
    pub limits: LimitState,
    /// Result of the last correction evaluation
    pub correction_needed: bool,
    /// A correction stop is outstanding (or latched after a failure)
    pub correction_in_flight: bool,
    /// Status poll armed
    pub monitor_active: bool,
    /// Recorded error, if any
    pub last_error: Option<String>,
    /// Open device files
    pub open_handles: usize,
    /// Transfers currently anchored
    pub in_flight: usize,
    /// Counters
    pub stats: StatsSnapshot,
}

/// Small shared fields guarded by the field lock.
struct SessionFields {
    transport: Option<Arc<dyn UsbTransport>>,
    last_error: Option<DriverError>,
    monitor_active: bool,
    state: SessionState,
    /// Status transfer parked while the monitor is stopped.
    status_slot: Option<Transfer>,
    /// Pre-allocated correction transfer; empty while a correction is in flight.
    correction_slot: Option<Transfer>,
}

/// State of one attached launcher.
pub struct DeviceSession {
    id: DeviceId,
    minor: usize,
    config: DriverConfig,
    status_endpoint: EndpointDescriptor,

    io: IoLock,
    fields: Mutex<SessionFields>,

    last_commanded: AtomicU8,
    limit_state: AtomicU8,
    correction_needed: AtomicBool,
    correction_in_flight: AtomicBool,
    connected: AtomicBool,
    reset_held: AtomicBool,
    control_halted: AtomicBool,
    open_handles: AtomicUsize,

    inflight: InFlightRegistry,
    command_done: Mutex<Option<Transfer>>,
    command_cv: Condvar,
    completions: Arc<SessionCompletions>,
    stats: SessionStats,
}

/// Resources handed to a new session by attach.
pub(crate) struct SessionParts {
    pub id: DeviceId,
    pub minor: usize,
    pub config: DriverConfig,
    pub status_endpoint: EndpointDescriptor,
    pub transport: Arc<dyn UsbTransport>,
    pub correction: Transfer,
}

impl DeviceSession {
    pub(crate) fn new(parts: SessionParts) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            id: parts.id,
            minor: parts.minor,
            config: parts.config,
            status_endpoint: parts.status_endpoint,
            io: IoLock::new(),
            fields: Mutex::new(SessionFields {
                transport: Some(parts.transport),
                last_error: None,
                monitor_active: false,
                state: SessionState::Attached,
                status_slot: None,
                correction_slot: Some(parts.correction),
            }),
            last_commanded: AtomicU8::new(Command::STOP.bits()),
            limit_state: AtomicU8::new(0),
            correction_needed: AtomicBool::new(false),
            correction_in_flight: AtomicBool::new(false),
            connected: AtomicBool::new(true),
            reset_held: AtomicBool::new(false),
            control_halted: AtomicBool::new(false),
            open_handles: AtomicUsize::new(0),
            inflight: InFlightRegistry::new(),
            command_done: Mutex::new(None),
            command_cv: Condvar::new(),
            completions: Arc::new(SessionCompletions {
                session: weak.clone(),
            }),
            stats: SessionStats::default(),
        })
    }

    // ─── Identity ──────────────────────────────────────────────────

    /// Vendor/product identity.
    pub fn device_id(&self) -> DeviceId {
        self.id
    }

    /// Minor number in the device registry.
    pub fn minor(&self) -> usize {
        self.minor
    }

    /// Device node name (`launcher<minor>`).
    pub fn node_name(&self) -> String {
        format!(
            "{}{}",
            launcher_common::usb::consts::LAUNCHER_DRIVER_NAME,
            self.minor
        )
    }

    /// Driver settings this session was attached with.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// The interrupt-IN endpoint the status monitor reads.
    pub fn status_endpoint(&self) -> &EndpointDescriptor {
        &self.status_endpoint
    }

    // ─── Control / status state ────────────────────────────────────

    /// Direction most recently handed to the command channel.
    pub fn last_commanded(&self) -> Command {
        Command::from_bits_retain(self.last_commanded.load(Ordering::Acquire))
    }

    pub(crate) fn record_command(&self, command: Command) {
        self.last_commanded.store(command.bits(), Ordering::Release);
    }

    /// Limit flags from the most recent status completion.
    pub fn limit_state(&self) -> LimitState {
        LimitState::from_bits(self.limit_state.load(Ordering::Acquire))
    }

    pub(crate) fn set_limit_state(&self, limits: LimitState) {
        self.limit_state.store(limits.to_bits(), Ordering::Release);
    }

    /// Result of the most recent correction evaluation.
    pub fn correction_needed(&self) -> bool {
        self.correction_needed.load(Ordering::Acquire)
    }

    pub(crate) fn set_correction_needed(&self, needed: bool) {
        self.correction_needed.store(needed, Ordering::Release);
    }

    /// True between a correction submission and its successful completion.
    pub fn correction_in_flight(&self) -> bool {
        self.correction_in_flight.load(Ordering::Acquire)
    }

    /// Claim the correction slot flag. Returns false if already set.
    pub(crate) fn begin_correction(&self) -> bool {
        self.correction_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn end_correction(&self) {
        self.correction_in_flight.store(false, Ordering::Release);
    }

    /// Overlay of the lifecycle state: a correction is outstanding.
    pub fn is_correcting(&self) -> bool {
        self.correction_in_flight()
    }

    // ─── Connection / lifecycle ────────────────────────────────────

    /// Whether new submissions are accepted.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Stop accepting submissions. Returns true on the first call only.
    pub(crate) fn mark_disconnected(&self) -> bool {
        let _fields = lock(&self.fields);
        self.connected.swap(false, Ordering::AcqRel)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        lock(&self.fields).state
    }

    /// Attempt a lifecycle transition. Illegal transitions are ignored.
    pub(crate) fn advance(&self, next: SessionState) -> bool {
        let mut fields = lock(&self.fields);
        if fields.state.can_advance(next) {
            if fields.state != next {
                debug!("{}: {:?} -> {:?}", self.node_name(), fields.state, next);
            }
            fields.state = next;
            true
        } else {
            trace!(
                "{}: ignored transition {:?} -> {:?}",
                self.node_name(),
                fields.state,
                next
            );
            false
        }
    }

    /// Transport handle, if not yet released.
    pub(crate) fn transport(&self) -> Option<Arc<dyn UsbTransport>> {
        lock(&self.fields).transport.clone()
    }

    /// Drop the session's transport handle and parked buffers.
    pub(crate) fn release_transport(&self) -> Option<Arc<dyn UsbTransport>> {
        let mut fields = lock(&self.fields);
        fields.status_slot = None;
        fields.correction_slot = None;
        fields.transport.take()
    }

    pub(crate) fn io_lock(&self) -> &IoLock {
        &self.io
    }

    pub(crate) fn set_reset_held(&self, held: bool) -> bool {
        self.reset_held.swap(held, Ordering::AcqRel)
    }

    pub(crate) fn reset_held(&self) -> bool {
        self.reset_held.load(Ordering::Acquire)
    }

    // ─── Error reporting ───────────────────────────────────────────

    /// Last error recorded from completion context or by post-reset.
    pub fn last_error(&self) -> Option<DriverError> {
        lock(&self.fields).last_error.clone()
    }

    pub(crate) fn set_last_error(&self, error: DriverError) {
        lock(&self.fields).last_error = Some(error);
    }

    pub(crate) fn take_last_error(&self) -> Option<DriverError> {
        lock(&self.fields).last_error.take()
    }

    /// Record a halted control endpoint. The next command clears it first.
    pub(crate) fn mark_control_halted(&self) {
        let mut fields = lock(&self.fields);
        self.control_halted.store(true, Ordering::Release);
        fields.last_error = Some(DriverError::Halted);
    }

    /// Whether the control endpoint must be cleared before the next command.
    pub fn control_halted(&self) -> bool {
        self.control_halted.load(Ordering::Acquire)
    }

    /// Consume the control-endpoint halt if present.
    ///
    /// A recorded `Halted` error goes with it; a halt on the status endpoint
    /// never arms this.
    pub(crate) fn take_control_halt(&self) -> bool {
        let mut fields = lock(&self.fields);
        if !self.control_halted.swap(false, Ordering::AcqRel) {
            return false;
        }
        if fields.last_error == Some(DriverError::Halted) {
            fields.last_error = None;
        }
        true
    }

    // ─── Monitor / correction slots ────────────────────────────────

    /// Whether the status poll is currently armed.
    pub fn monitor_active(&self) -> bool {
        lock(&self.fields).monitor_active
    }

    pub(crate) fn set_monitor_active(&self, active: bool) {
        lock(&self.fields).monitor_active = active;
    }

    /// Park the status transfer after the monitor stopped.
    pub(crate) fn park_status(&self, transfer: Transfer) {
        let mut fields = lock(&self.fields);
        fields.monitor_active = false;
        if fields.transport.is_some() {
            fields.status_slot = Some(transfer);
        }
    }

    pub(crate) fn take_correction_slot(&self) -> Option<Transfer> {
        lock(&self.fields).correction_slot.take()
    }

    pub(crate) fn restore_correction_slot(&self, transfer: Transfer) {
        let mut fields = lock(&self.fields);
        if fields.transport.is_some() {
            fields.correction_slot = Some(transfer);
        }
    }

    // ─── Command completion rendezvous ─────────────────────────────

    pub(crate) fn command_done(&self) -> (&Mutex<Option<Transfer>>, &Condvar) {
        (&self.command_done, &self.command_cv)
    }

    /// Wake a caller blocked on its command so it can observe `connected`.
    pub(crate) fn wake_command_waiter(&self) {
        let _slot = lock(&self.command_done);
        self.command_cv.notify_all();
    }

    // ─── Shared infrastructure ─────────────────────────────────────

    /// Outstanding-transfer registry.
    pub fn inflight(&self) -> &InFlightRegistry {
        &self.inflight
    }

    pub(crate) fn completions(&self) -> Arc<dyn CompletionHandler> {
        self.completions.clone()
    }

    /// Observability counters.
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    // ─── Open handles ──────────────────────────────────────────────

    /// Number of open device files.
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::Acquire)
    }

    pub(crate) fn handle_opened(&self) -> usize {
        self.open_handles.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn handle_closed(&self) -> usize {
        self.open_handles
            .fetch_sub(1, Ordering::AcqRel)
            .saturating_sub(1)
    }

    /// Point-in-time view for diagnostics.
    pub fn snapshot(&self) -> SessionSnapshot {
        let (state, monitor_active, last_error) = {
            let fields = lock(&self.fields);
            (
                fields.state,
                fields.monitor_active,
                fields.last_error.as_ref().map(ToString::to_string),
            )
        };
        SessionSnapshot {
            device: self.id.to_string(),
            minor: self.minor,
            state,
            connected: self.is_connected(),
            last_commanded: self.last_commanded().bits(),
            limits: self.limit_state(),
            correction_needed: self.correction_needed(),
            correction_in_flight: self.correction_in_flight(),
            monitor_active,
            last_error,
            open_handles: self.open_handles(),
            in_flight: self.inflight.outstanding(),
            stats: self.stats.snapshot(),
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        debug!("{}: session freed", self.node_name());
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.id)
            .field("minor", &self.minor)
            .field("connected", &self.is_connected())
            .field("last_commanded", &self.last_commanded())
            .field("limits", &self.limit_state())
            .finish_non_exhaustive()
    }
}

/// Completion handler shared by every transfer of one session.
///
/// Holds only a `Weak` reference so in-flight transfers never extend the
/// session's lifetime. Routes each completion by kind, then acknowledges
/// it in the in-flight registry.
struct SessionCompletions {
    session: Weak<DeviceSession>,
}

impl CompletionHandler for SessionCompletions {
    fn complete(&self, transfer: Transfer) {
        let Some(session) = self.session.upgrade() else {
            trace!("completion {} for a freed session dropped", transfer.id);
            return;
        };
        let id = transfer.id;
        match transfer.kind {
            TransferKind::StatusPoll => {
                crate::monitor::StatusMonitor::on_complete(&session, transfer)
            }
            TransferKind::Command => {
                crate::command::CommandChannel::on_complete(&session, transfer)
            }
            TransferKind::Correction => {
                crate::correction::CorrectionEngine::on_complete(&session, transfer)
            }
        }
        session.inflight.acknowledge(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        use SessionState::*;
        assert!(Attached.can_advance(Armed));
        assert!(Armed.can_advance(Draining));
        assert!(Draining.can_advance(Draining));
        assert!(Attached.can_advance(Detached));
        assert!(Draining.can_advance(Detached));

        assert!(!Draining.can_advance(Armed));
        assert!(!Armed.can_advance(Attached));
        assert!(!Detached.can_advance(Armed));
        assert!(!Detached.can_advance(Detached));
    }

    #[test]
    fn test_stats_snapshot() {
        let stats = SessionStats::default();
        SessionStats::bump(&stats.corrections_issued);
        SessionStats::bump(&stats.corrections_issued);
        SessionStats::bump(&stats.status_errors);
        let snap = stats.snapshot();
        assert_eq!(snap.corrections_issued, 2);
        assert_eq!(snap.status_errors, 1);
        assert_eq!(snap.commands_sent, 0);
    }
}
