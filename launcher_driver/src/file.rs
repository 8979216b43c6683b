//! Device-file handle.
//!
//! What `open` hands out. Each handle holds one reference to its session;
//! the session's memory lives until the last handle and the controller
//! have both let go.

use crate::command::CommandChannel;
use crate::lifecycle::{drain_session, DrainScope};
use crate::session::DeviceSession;
use launcher_common::usb::error::DriverError;
use launcher_common::usb::types::Command;
use std::sync::Arc;
use tracing::debug;

/// Open handle on an attached launcher.
pub struct DeviceFile {
    session: Arc<DeviceSession>,
}

impl DeviceFile {
    pub(crate) fn open(session: Arc<DeviceSession>) -> Result<Self, DriverError> {
        if !session.is_connected() {
            return Err(DriverError::NotFound(session.node_name()));
        }
        let handles = session.handle_opened();
        debug!("{}: opened ({} handles)", session.node_name(), handles);
        Ok(Self { session })
    }

    /// The session behind this handle.
    pub fn session(&self) -> &Arc<DeviceSession> {
        &self.session
    }

    fn ensure_attached(&self) -> Result<(), DriverError> {
        if self.session.is_connected() {
            Ok(())
        } else {
            Err(DriverError::NotFound(self.session.node_name()))
        }
    }

    /// Write contract: the first byte is the command.
    ///
    /// Returns the bytes consumed (0 for empty input, 1 otherwise) or a
    /// negative errno.
    pub fn write(&self, buf: &[u8]) -> isize {
        if buf.is_empty() {
            return 0;
        }
        match self
            .ensure_attached()
            .and_then(|()| CommandChannel::submit(&self.session, buf))
        {
            Ok(consumed) => consumed as isize,
            Err(err) => err.errno() as isize,
        }
    }

    /// Send a command, waiting behind any queued command.
    pub fn send(&self, command: Command) -> Result<(), DriverError> {
        self.ensure_attached()?;
        CommandChannel::send(&self.session, command)
    }

    /// Send a command without waiting for the I/O lock.
    ///
    /// # Errors
    /// `Busy` if another command is outstanding or queued.
    pub fn try_send(&self, command: Command) -> Result<(), DriverError> {
        self.ensure_attached()?;
        CommandChannel::try_send(&self.session, command)
    }

    /// The read path carries no data; always end-of-stream.
    pub fn read(&self, _buf: &mut [u8]) -> isize {
        0
    }

    /// Wait for outstanding command and correction transfers, then report
    /// and clear the recorded error.
    ///
    /// A halted endpoint is reported as `Halted`; anything else as `Transport`.
    pub fn flush(&self) -> Result<(), DriverError> {
        self.ensure_attached()?;
        let _io = self.session.io_lock().acquire();
        drain_session(
            &self.session,
            self.session.config().drain_timeout(),
            DrainScope::Flush,
        );
        match self.session.take_last_error() {
            None => Ok(()),
            Some(DriverError::Halted) => Err(DriverError::Halted),
            Some(err) => Err(DriverError::Transport(err.to_string())),
        }
    }

    /// Flush (while still attached) and release the handle.
    pub fn close(self) {
        if self.session.is_connected() {
            if let Err(err) = self.flush() {
                debug!("{}: flush on close: {}", self.session.node_name(), err);
            }
        }
    }
}

impl Drop for DeviceFile {
    fn drop(&mut self) {
        let remaining = self.session.handle_closed();
        debug!("{}: closed ({} handles)", self.session.node_name(), remaining);
    }
}

impl std::fmt::Debug for DeviceFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceFile")
            .field("node", &self.session.node_name())
            .finish()
    }
}
