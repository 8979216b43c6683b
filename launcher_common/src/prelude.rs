//! Prelude module for common re-exports.
//!
//! This module provides convenient re-exports of commonly used types
//! so that consumers can do `use launcher_common::prelude::*;` and get
//! the most important types without listing individual paths.

use std::time::Duration;

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, SharedConfig};
pub use crate::usb::config::{DriverConfig, LauncherConfig};

// ─── Protocol ───────────────────────────────────────────────────────
pub use crate::usb::consts::{LAUNCHER_PRODUCT_ID, LAUNCHER_VENDOR_ID};
pub use crate::usb::types::{Command, CommandFrame, DeviceId, LimitAxis, LimitState, SetupPacket};

// ─── Transport ──────────────────────────────────────────────────────
pub use crate::usb::error::DriverError;
pub use crate::usb::transport::{
    CompletionHandler, DeviceDescriptor, Direction, EndpointDescriptor, EndpointType,
    SubmitError, Transfer, TransferId, TransferKind, TransferStatus, TransportError,
    UsbTransport,
};

/// Default blocking timeout for a command control transfer.
pub const DEFAULT_COMMAND_TIMEOUT: Duration =
    Duration::from_millis(crate::usb::consts::DEFAULT_COMMAND_TIMEOUT_MS);

/// Default bounded wait used by drain before force-cancelling.
pub const DEFAULT_DRAIN_TIMEOUT: Duration =
    Duration::from_millis(crate::usb::consts::DEFAULT_DRAIN_TIMEOUT_MS);
