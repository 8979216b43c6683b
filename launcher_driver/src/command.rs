//! Command channel.
//!
//! Delivers one command byte per call as an 8-byte control transfer and
//! blocks the caller until the transfer completes or times out. Calls are
//! serialized per session by the I/O lock; queued callers are admitted in
//! arrival order.

use crate::session::{DeviceSession, SessionStats};
use crate::sync::{lock, wait_while_timeout, IoGuard};
use launcher_common::usb::consts::CONTROL_ENDPOINT;
use launcher_common::usb::error::DriverError;
use launcher_common::usb::transport::{Transfer, TransferId, TransferKind, TransferStatus};
use launcher_common::usb::types::{Command, CommandFrame, SetupPacket};
use tracing::{debug, trace, warn};

/// Serialized command delivery.
pub struct CommandChannel;

impl CommandChannel {
    /// Device-file style submission: the first byte of `payload` is the command.
    ///
    /// Returns the number of bytes consumed (0 for empty input, 1 otherwise).
    /// Blocks on the I/O lock and then on the transfer.
    pub fn submit(session: &DeviceSession, payload: &[u8]) -> Result<usize, DriverError> {
        let Some(&byte) = payload.first() else {
            return Ok(0);
        };
        Self::send(session, Command::from_bits_retain(byte))?;
        Ok(1)
    }

    /// Transmit a command, waiting for the I/O lock.
    pub fn send(session: &DeviceSession, command: Command) -> Result<(), DriverError> {
        if !session.is_connected() {
            return Err(DriverError::NoDevice);
        }
        let io = session.io_lock().acquire();
        Self::transmit(session, &io, command)
    }

    /// Transmit a command only if no other command is outstanding or queued.
    ///
    /// # Errors
    /// `Busy` if the I/O lock is taken.
    pub fn try_send(session: &DeviceSession, command: Command) -> Result<(), DriverError> {
        if !session.is_connected() {
            return Err(DriverError::NoDevice);
        }
        let io = session.io_lock().try_acquire().ok_or(DriverError::Busy)?;
        Self::transmit(session, &io, command)
    }

    /// Issue the transfer and wait for it. Caller holds the I/O lock.
    fn transmit(
        session: &DeviceSession,
        _io: &IoGuard<'_>,
        command: Command,
    ) -> Result<(), DriverError> {
        let result = Self::transmit_locked(session, command);
        if let Err(err) = &result {
            SessionStats::bump(&session.stats().command_failures);
            debug!("{}: command {:#04x} failed: {}", session.node_name(), command.bits(), err);
        }
        result
    }

    fn transmit_locked(session: &DeviceSession, command: Command) -> Result<(), DriverError> {
        // A queued caller may get the lock only after disconnect finished.
        if !session.is_connected() {
            return Err(DriverError::NoDevice);
        }
        let transport = session.transport().ok_or(DriverError::NoDevice)?;

        if session.take_control_halt() {
            debug!("{}: clearing halted control endpoint", session.node_name());
            if let Err(err) = transport.clear_halt(CONTROL_ENDPOINT) {
                warn!("{}: clear halt failed: {}", session.node_name(), err);
                session.mark_control_halted();
                return Err(DriverError::Halted);
            }
        }

        // Published before dispatch so a racing status completion evaluates
        // the direction that is about to be driven.
        session.record_command(command);

        let inflight = session.inflight();
        let id = inflight.next_id();
        inflight.anchor(id, TransferKind::Command).map_err(|err| {
            if session.is_connected() {
                DriverError::Transport(format!("command refused: {err:?}"))
            } else {
                DriverError::NoDevice
            }
        })?;

        let frame = CommandFrame::new(command);
        let mut transfer = Transfer::control_out(
            TransferKind::Command,
            SetupPacket::LAUNCHER_COMMAND,
            frame.as_bytes().to_vec(),
        );
        transfer.rearm(id);

        trace!("{}: submit command {:#04x} as {}", session.node_name(), command.bits(), id);
        if let Err(refused) = transport.submit(transfer, session.completions()) {
            inflight.acknowledge(id);
            return Err(refused.error.into());
        }

        let done = Self::wait_for(session, id)?;
        match done.status {
            TransferStatus::Completed => {
                SessionStats::bump(&session.stats().commands_sent);
                Ok(())
            }
            TransferStatus::Stalled => {
                session.mark_control_halted();
                Err(DriverError::Halted)
            }
            TransferStatus::TimedOut => Err(DriverError::Timeout),
            TransferStatus::Cancelled | TransferStatus::Disconnected if !session.is_connected() => {
                Err(DriverError::NoDevice)
            }
            status => Err(DriverError::Transport(status.to_string())),
        }
    }

    /// Block until the completion of `id` is handed back, the session is
    /// disconnected, or the command timeout elapses.
    fn wait_for(session: &DeviceSession, id: TransferId) -> Result<Transfer, DriverError> {
        let (slot, done) = session.command_done();
        let guard = lock(slot);
        let (mut guard, _timed_out) =
            wait_while_timeout(done, guard, session.config().command_timeout(), |slot| {
                !matches!(slot, Some(t) if t.id == id) && session.is_connected()
            });

        if let Some(transfer) = guard.take_if(|t| t.id == id) {
            return Ok(transfer);
        }
        drop(guard);

        if !session.is_connected() {
            return Err(DriverError::NoDevice);
        }

        warn!("{}: command {} timed out, cancelling", session.node_name(), id);
        if let Some(transport) = session.transport() {
            transport.cancel(id);
        }
        if !session
            .inflight()
            .wait_acknowledged(&[id], session.config().drain_timeout())
        {
            warn!("{}: command {} not acknowledged after cancel", session.node_name(), id);
        }
        Err(DriverError::Timeout)
    }

    /// Completion of a command transfer: hand it to the waiting caller.
    pub(crate) fn on_complete(session: &DeviceSession, transfer: Transfer) {
        trace!("{}: command {} {}", session.node_name(), transfer.id, transfer.status);
        let (slot, done) = session.command_done();
        *lock(slot) = Some(transfer);
        done.notify_all();
    }
}
