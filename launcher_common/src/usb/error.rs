//! Driver error taxonomy.
//!
//! `DriverError` is what callers of the driver see. Each variant maps to a
//! negative errno for the device-file `write()` contract.

use crate::config::ConfigError;
use crate::usb::transport::TransportError;
use thiserror::Error;

/// Errors returned by the launcher driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DriverError {
    /// The session was disconnected or the device vanished.
    #[error("Device disconnected")]
    NoDevice,

    /// No attached session for the requested minor, or it was torn down.
    #[error("No such device: {0}")]
    NotFound(String),

    /// Non-blocking submit attempted while a command is outstanding.
    #[error("Command channel busy")]
    Busy,

    /// The endpoint is stalled and must be cleared before further transfers.
    #[error("Endpoint halted")]
    Halted,

    /// The transfer did not complete in time.
    #[error("Transfer timed out")]
    Timeout,

    /// Generic transport failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Allocation or minor-number exhaustion at attach.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The device identity or descriptor layout is not supported.
    #[error("Unsupported device {vendor_id:04x}:{product_id:04x}")]
    UnsupportedDevice {
        /// idVendor of the rejected device
        vendor_id: u16,
        /// idProduct of the rejected device
        product_id: u16,
    },

    /// Invalid driver configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl DriverError {
    /// Negative errno reported through the device-file contract.
    pub fn errno(&self) -> i32 {
        let code = match self {
            DriverError::NoDevice
            | DriverError::NotFound(_)
            | DriverError::UnsupportedDevice { .. } => libc::ENODEV,
            DriverError::Busy => libc::EAGAIN,
            DriverError::Halted => libc::EPIPE,
            DriverError::Timeout => libc::ETIMEDOUT,
            DriverError::Transport(_) => libc::EIO,
            DriverError::ResourceExhausted(_) => libc::ENOMEM,
            DriverError::Config(_) => libc::EINVAL,
        };
        -code
    }

    /// Returns true for the disconnect class (`NoDevice` / `NotFound`).
    pub const fn is_gone(&self) -> bool {
        matches!(self, DriverError::NoDevice | DriverError::NotFound(_))
    }
}

impl From<TransportError> for DriverError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Disconnected => DriverError::NoDevice,
            TransportError::Stalled => DriverError::Halted,
            TransportError::NoResources => {
                DriverError::ResourceExhausted("transport out of resources".to_string())
            }
            TransportError::Rejected(msg) | TransportError::Io(msg) => DriverError::Transport(msg),
        }
    }
}

impl From<ConfigError> for DriverError {
    fn from(err: ConfigError) -> Self {
        DriverError::Config(err.to_string())
    }
}
