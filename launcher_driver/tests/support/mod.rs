//! Shared helpers for the integration tests.
//!
//! `MockTransport` holds every submitted transfer until the test completes
//! it. Completions run on the calling thread, outside the mock's lock, the
//! same way a transport's dispatch context would call back.

#![allow(dead_code)]

use launcher_common::prelude::*;
use launcher_driver::{DeviceSession, LifecycleController};
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

/// Generous bound for anything the tests wait on.
pub const WAIT: Duration = Duration::from_secs(2);

/// Driver settings with short timeouts.
pub fn fast_config() -> DriverConfig {
    DriverConfig {
        command_timeout_ms: 300,
        drain_timeout_ms: 100,
        ..DriverConfig::default()
    }
}

pub fn controller() -> LifecycleController {
    LifecycleController::new(fast_config()).unwrap()
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
}

/// What the mock saw at submission time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub id: TransferId,
    pub kind: TransferKind,
    pub endpoint: u8,
    pub setup: Option<SetupPacket>,
    pub data: Vec<u8>,
}

type Hook = Box<dyn Fn(&Transfer) + Send + Sync>;

#[derive(Default)]
struct MockState {
    pending: Vec<(Transfer, Arc<dyn CompletionHandler>)>,
    submitted: Vec<Submitted>,
    auto_complete: HashMap<TransferKind, TransferStatus>,
    refuse: HashMap<TransferKind, TransportError>,
    cancelled: Vec<TransferId>,
    ignore_cancel: bool,
    halts_cleared: Vec<u8>,
    clear_halt_error: Option<TransportError>,
    unplugged: bool,
}

/// Deterministic `UsbTransport` for tests.
pub struct MockTransport {
    descriptor: DeviceDescriptor,
    state: Mutex<MockState>,
    changed: Condvar,
    hook: Mutex<Option<Hook>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub fn launcher_descriptor() -> DeviceDescriptor {
    DeviceDescriptor {
        id: DeviceId::LAUNCHER,
        endpoints: vec![EndpointDescriptor {
            address: 0x81,
            kind: EndpointType::Interrupt,
            interval_ms: 10,
            max_packet_size: 8,
        }],
    }
}

impl MockTransport {
    /// A launcher with one interrupt-IN endpoint at 0x81.
    pub fn launcher() -> Arc<Self> {
        Self::with_descriptor(launcher_descriptor())
    }

    pub fn with_descriptor(descriptor: DeviceDescriptor) -> Arc<Self> {
        Arc::new(Self {
            descriptor,
            state: Mutex::new(MockState::default()),
            changed: Condvar::new(),
            hook: Mutex::new(None),
        })
    }

    /// Complete transfers of `kind` inside `submit` with `status`.
    pub fn auto_complete(&self, kind: TransferKind, status: TransferStatus) {
        lock(&self.state).auto_complete.insert(kind, status);
    }

    /// Hold transfers of `kind` again.
    pub fn hold(&self, kind: TransferKind) {
        lock(&self.state).auto_complete.remove(&kind);
    }

    /// Refuse submissions of `kind` synchronously.
    pub fn refuse(&self, kind: TransferKind, error: TransportError) {
        lock(&self.state).refuse.insert(kind, error);
    }

    pub fn accept(&self, kind: TransferKind) {
        lock(&self.state).refuse.remove(&kind);
    }

    /// Record cancel requests without completing the transfer.
    pub fn ignore_cancel(&self, ignore: bool) {
        lock(&self.state).ignore_cancel = ignore;
    }

    pub fn fail_clear_halt(&self, error: Option<TransportError>) {
        lock(&self.state).clear_halt_error = error;
    }

    /// Run `hook` inside `submit`, before the transfer is queued.
    pub fn on_submit(&self, hook: impl Fn(&Transfer) + Send + Sync + 'static) {
        *lock(&self.hook) = Some(Box::new(hook));
    }

    pub fn submitted(&self) -> Vec<Submitted> {
        lock(&self.state).submitted.clone()
    }

    pub fn submitted_of(&self, kind: TransferKind) -> Vec<Submitted> {
        self.submitted().into_iter().filter(|s| s.kind == kind).collect()
    }

    pub fn pending_of(&self, kind: TransferKind) -> usize {
        lock(&self.state)
            .pending
            .iter()
            .filter(|(t, _)| t.kind == kind)
            .count()
    }

    /// Block until at least `count` transfers of `kind` are pending.
    pub fn wait_pending(&self, kind: TransferKind, count: usize) -> bool {
        let state = lock(&self.state);
        let (_state, result) = self
            .changed
            .wait_timeout_while(state, WAIT, |s| {
                s.pending.iter().filter(|(t, _)| t.kind == kind).count() < count
            })
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }

    pub fn cancelled(&self) -> Vec<TransferId> {
        lock(&self.state).cancelled.clone()
    }

    pub fn halts_cleared(&self) -> Vec<u8> {
        lock(&self.state).halts_cleared.clone()
    }

    /// Complete the pending status poll with `payload`.
    pub fn complete_status(&self, payload: &[u8]) -> bool {
        let Some((mut transfer, handler)) = self.take(TransferKind::StatusPoll) else {
            return false;
        };
        let len = payload.len().min(transfer.buffer.len());
        transfer.buffer[..len].copy_from_slice(&payload[..len]);
        transfer.finish(TransferStatus::Completed, len);
        handler.complete(transfer);
        true
    }

    /// Report limit flags on the status channel.
    pub fn report_limits(&self, limits: LimitState) -> bool {
        self.complete_status(&limits.encode())
    }

    /// Complete the oldest pending transfer of `kind` with `status`.
    pub fn complete_next(&self, kind: TransferKind, status: TransferStatus) -> bool {
        let Some((mut transfer, handler)) = self.take(kind) else {
            return false;
        };
        let len = if status.is_success() { transfer.buffer.len() } else { 0 };
        transfer.finish(status, len);
        handler.complete(transfer);
        true
    }

    /// Every pending transfer completes with `Disconnected`; new ones are refused.
    pub fn unplug(&self) {
        let drained: Vec<_> = {
            let mut state = lock(&self.state);
            state.unplugged = true;
            state.pending.drain(..).collect()
        };
        for (mut transfer, handler) in drained {
            transfer.finish(TransferStatus::Disconnected, 0);
            handler.complete(transfer);
        }
    }

    fn take(&self, kind: TransferKind) -> Option<(Transfer, Arc<dyn CompletionHandler>)> {
        let mut state = lock(&self.state);
        let index = state.pending.iter().position(|(t, _)| t.kind == kind)?;
        Some(state.pending.remove(index))
    }
}

impl UsbTransport for MockTransport {
    fn descriptor(&self) -> DeviceDescriptor {
        self.descriptor.clone()
    }

    fn submit(
        &self,
        mut transfer: Transfer,
        handler: Arc<dyn CompletionHandler>,
    ) -> Result<(), SubmitError> {
        if let Some(hook) = lock(&self.hook).as_ref() {
            hook(&transfer);
        }

        let mut state = lock(&self.state);
        if state.unplugged {
            return Err(SubmitError {
                error: TransportError::Disconnected,
                transfer,
            });
        }
        if let Some(error) = state.refuse.get(&transfer.kind).cloned() {
            return Err(SubmitError { error, transfer });
        }
        state.submitted.push(Submitted {
            id: transfer.id,
            kind: transfer.kind,
            endpoint: transfer.endpoint,
            setup: transfer.setup,
            data: transfer.buffer.clone(),
        });

        match state.auto_complete.get(&transfer.kind).cloned() {
            Some(status) => {
                drop(state);
                self.changed.notify_all();
                let len = if status.is_success() { transfer.buffer.len() } else { 0 };
                transfer.finish(status, len);
                handler.complete(transfer);
            }
            None => {
                state.pending.push((transfer, handler));
                drop(state);
                self.changed.notify_all();
            }
        }
        Ok(())
    }

    fn cancel(&self, id: TransferId) {
        let taken = {
            let mut state = lock(&self.state);
            state.cancelled.push(id);
            if state.ignore_cancel {
                None
            } else {
                state
                    .pending
                    .iter()
                    .position(|(t, _)| t.id == id)
                    .map(|index| state.pending.remove(index))
            }
        };
        if let Some((mut transfer, handler)) = taken {
            transfer.finish(TransferStatus::Cancelled, 0);
            handler.complete(transfer);
        }
    }

    fn clear_halt(&self, endpoint: u8) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        state.halts_cleared.push(endpoint);
        match state.clear_halt_error.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Attach a mock launcher and return both ends.
pub fn attach(controller: &LifecycleController) -> (Arc<MockTransport>, Arc<DeviceSession>) {
    let mock = MockTransport::launcher();
    let session = controller.attach(mock.clone()).unwrap();
    (mock, session)
}
