//! Asynchronous USB transport contract.
//!
//! This module defines:
//! - `UsbTransport` trait - Interface the driver core uses to reach the device
//! - `Transfer` - One in-flight operation, owning its buffer while in flight
//! - `CompletionHandler` - Callback invoked on the transport's dispatch context
//! - `TransportError` / `SubmitError` - Synchronous failure types
//! - `DeviceDescriptor` / `EndpointDescriptor` - Attach-time identity and layout

use crate::usb::types::{DeviceId, SetupPacket};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Synchronous transport failures (submission refused, halt not cleared, ...).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The device is gone.
    #[error("Device disconnected")]
    Disconnected,

    /// The endpoint is stalled.
    #[error("Endpoint stalled")]
    Stalled,

    /// The transport could not allocate what the request needs.
    #[error("Transport out of resources")]
    NoResources,

    /// The request was malformed or refused.
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Host-side I/O failure.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Identifier of a submitted transfer, unique per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TransferId(pub u64);

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What an in-flight transfer is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferKind {
    /// Perpetually re-armed interrupt-IN read of the limit switches.
    StatusPoll,
    /// Caller-issued command control transfer.
    Command,
    /// Autonomous stop issued by the correction engine.
    Correction,
}

/// Completion status of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TransferStatus {
    /// Not yet completed.
    #[default]
    Pending,
    /// Completed successfully; `actual_length` bytes are valid.
    Completed,
    /// Unlinked on purpose (cancel / drain).
    Cancelled,
    /// The device went away while the transfer was queued.
    Disconnected,
    /// The endpoint stalled.
    Stalled,
    /// The transport gave up waiting for the device.
    TimedOut,
    /// Any other transport failure.
    Failed(String),
}

impl TransferStatus {
    /// Cancellation-class statuses signal teardown and must not be retried.
    #[inline]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, TransferStatus::Cancelled | TransferStatus::Disconnected)
    }

    /// Returns true for `Completed`.
    #[inline]
    pub const fn is_success(&self) -> bool {
        matches!(self, TransferStatus::Completed)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Pending => f.write_str("pending"),
            TransferStatus::Completed => f.write_str("completed"),
            TransferStatus::Cancelled => f.write_str("cancelled"),
            TransferStatus::Disconnected => f.write_str("disconnected"),
            TransferStatus::Stalled => f.write_str("stalled"),
            TransferStatus::TimedOut => f.write_str("timed out"),
            TransferStatus::Failed(msg) => write!(f, "failed: {msg}"),
        }
    }
}

/// Endpoint transfer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointType {
    /// Control endpoint.
    Control,
    /// Interrupt endpoint.
    Interrupt,
    /// Bulk endpoint.
    Bulk,
    /// Isochronous endpoint.
    Isochronous,
}

/// Endpoint data direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to device.
    Out,
    /// Device to host.
    In,
}

/// One endpoint of the active interface setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointDescriptor {
    /// bEndpointAddress (bit 7 set for IN)
    pub address: u8,
    /// Transfer type
    pub kind: EndpointType,
    /// Polling interval in milliseconds (interrupt endpoints)
    pub interval_ms: u8,
    /// wMaxPacketSize
    pub max_packet_size: u16,
}

impl EndpointDescriptor {
    /// Direction encoded in the endpoint address.
    #[inline]
    pub const fn direction(&self) -> Direction {
        if self.address & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    /// Returns true for an interrupt-IN endpoint.
    #[inline]
    pub fn is_interrupt_in(&self) -> bool {
        self.kind == EndpointType::Interrupt && self.direction() == Direction::In
    }
}

/// Device identity and interface layout presented at attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Vendor/product identity
    pub id: DeviceId,
    /// Endpoints of the current alternate setting (control endpoint 0 implied)
    pub endpoints: Vec<EndpointDescriptor>,
}

impl DeviceDescriptor {
    /// First interrupt-IN endpoint, if any.
    pub fn interrupt_in(&self) -> Option<&EndpointDescriptor> {
        self.endpoints.iter().find(|ep| ep.is_interrupt_in())
    }
}

/// One asynchronous operation.
///
/// The transfer owns its buffer. Submitting moves it into the transport;
/// it comes back only through [`CompletionHandler::complete`] (or inside
/// a [`SubmitError`] if the submission was refused).
#[derive(Debug)]
pub struct Transfer {
    /// Session-unique id, used for cancellation
    pub id: TransferId,
    /// Purpose of the transfer
    pub kind: TransferKind,
    /// Target endpoint address
    pub endpoint: u8,
    /// Setup stage for control transfers
    pub setup: Option<SetupPacket>,
    /// Data stage buffer (OUT: payload, IN: receive space)
    pub buffer: Vec<u8>,
    /// Bytes actually transferred
    pub actual_length: usize,
    /// Completion status
    pub status: TransferStatus,
}

impl Transfer {
    /// Build a control-OUT transfer on endpoint 0.
    pub fn control_out(kind: TransferKind, setup: SetupPacket, buffer: Vec<u8>) -> Self {
        Self {
            id: TransferId::default(),
            kind,
            endpoint: 0,
            setup: Some(setup),
            buffer,
            actual_length: 0,
            status: TransferStatus::Pending,
        }
    }

    /// Build an interrupt-IN transfer.
    pub fn interrupt_in(kind: TransferKind, endpoint: u8, buffer: Vec<u8>) -> Self {
        Self {
            id: TransferId::default(),
            kind,
            endpoint,
            setup: None,
            buffer,
            actual_length: 0,
            status: TransferStatus::Pending,
        }
    }

    /// Bytes received or sent.
    #[inline]
    pub fn data(&self) -> &[u8] {
        let len = self.actual_length.min(self.buffer.len());
        &self.buffer[..len]
    }

    /// Reset completion fields before the transfer is submitted again.
    pub fn rearm(&mut self, id: TransferId) {
        self.id = id;
        self.actual_length = 0;
        self.status = TransferStatus::Pending;
    }

    /// Mark the transfer complete with the given status.
    pub fn finish(&mut self, status: TransferStatus, actual_length: usize) {
        self.status = status;
        self.actual_length = actual_length;
    }
}

/// A submission the transport refused; the transfer is handed back.
#[derive(Debug)]
pub struct SubmitError {
    /// Why the transport refused
    pub error: TransportError,
    /// The untouched transfer
    pub transfer: Transfer,
}

/// Callback receiving completed transfers.
///
/// # Context
/// Runs on the transport's dispatch context, concurrently with caller
/// threads. Implementations must not block: no blocking locks, no waits
/// on other transfers.
pub trait CompletionHandler: Send + Sync {
    /// Take back ownership of a completed (or cancelled) transfer.
    fn complete(&self, transfer: Transfer);
}

/// Trait defining the transport the driver core submits transfers to.
///
/// # Contract
///
/// | Operation | Blocking | Completion |
/// |-----------|----------|------------|
/// | `submit()` | never | exactly one `complete()` per accepted transfer |
/// | `cancel()` | never | paired `complete()`, cancellation-class status (1) |
/// | `clear_halt()` | may block | none |
///
/// (1) Unless the transfer already completed.
///
/// A handler may call `submit()` again from inside `complete()`, and may
/// call `clear_halt()` on the endpoint whose transfer just completed.
pub trait UsbTransport: Send + Sync {
    /// Identity and endpoint layout of the attached device.
    fn descriptor(&self) -> DeviceDescriptor;

    /// Queue a transfer.
    ///
    /// # Errors
    /// Returns the transfer inside `SubmitError` if it was not queued.
    fn submit(
        &self,
        transfer: Transfer,
        handler: Arc<dyn CompletionHandler>,
    ) -> Result<(), SubmitError>;

    /// Request asynchronous cancellation of a queued transfer.
    fn cancel(&self, id: TransferId);

    /// Clear a stalled endpoint.
    fn clear_halt(&self, endpoint: u8) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usb::types::DeviceId;

    #[test]
    fn test_cancellation_class() {
        assert!(TransferStatus::Cancelled.is_cancellation());
        assert!(TransferStatus::Disconnected.is_cancellation());
        assert!(!TransferStatus::Stalled.is_cancellation());
        assert!(!TransferStatus::Failed("crc".into()).is_cancellation());
        assert!(TransferStatus::Completed.is_success());
    }

    #[test]
    fn test_interrupt_in_lookup() {
        let descriptor = DeviceDescriptor {
            id: DeviceId::LAUNCHER,
            endpoints: vec![
                EndpointDescriptor {
                    address: 0x02,
                    kind: EndpointType::Interrupt,
                    interval_ms: 10,
                    max_packet_size: 8,
                },
                EndpointDescriptor {
                    address: 0x81,
                    kind: EndpointType::Interrupt,
                    interval_ms: 10,
                    max_packet_size: 8,
                },
            ],
        };
        assert_eq!(descriptor.interrupt_in().map(|ep| ep.address), Some(0x81));
    }

    #[test]
    fn test_transfer_data_clamped_and_rearm() {
        let mut transfer = Transfer::interrupt_in(TransferKind::StatusPoll, 0x81, vec![1, 2, 3]);
        transfer.finish(TransferStatus::Completed, 10);
        assert_eq!(transfer.data(), &[1, 2, 3]);

        transfer.rearm(TransferId(7));
        assert_eq!(transfer.id, TransferId(7));
        assert_eq!(transfer.status, TransferStatus::Pending);
        assert!(transfer.data().is_empty());
    }
}
