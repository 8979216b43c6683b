//! # Launcher Driver Library
//!
//! Actuator-control driver for the USB two-axis launcher turret.
//!
//! Commands go out as blocking control transfers, the limit switches are
//! read by a perpetually re-armed interrupt transfer, and a correction
//! engine stops the turret on its own when it is driven into an end stop.
//! The USB stack is reached only through the `UsbTransport` trait defined
//! in `launcher_common::usb::transport`.
//!
//! # Module Structure
//!
//! - [`lifecycle`] - LifecycleController: attach, open, suspend, reset, disconnect, drain
//! - [`session`] - DeviceSession: per-device state and synchronization
//! - [`command`] - CommandChannel: serialized command transfers
//! - [`monitor`] - StatusMonitor: status-channel listener
//! - [`correction`] - CorrectionEngine: limit correction rule table
//! - [`file`] - DeviceFile: the handle returned by `open`
//! - [`registry`] - DeviceRegistry: minor-number table
//! - [`inflight`] - In-flight transfer registry used by drain
//! - [`sync`] - FIFO I/O lock
//! - [`transport`] - Transport backends (simulation)
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        launcher_driver                            │
//! │  ┌──────────────┐  open   ┌────────────┐  submit  ┌─────────────┐ │
//! │  │  Lifecycle   │────────►│ DeviceFile │─────────►│  Command    │ │
//! │  │  Controller  │         └────────────┘          │  Channel    │ │
//! │  └──────┬───────┘                                 └──────┬──────┘ │
//! │         │ attach / drain        ┌───────────────┐        │        │
//! │         ▼                       │ DeviceSession │◄───────┘        │
//! │  ┌──────────────┐   re-arm      │ (state, locks)│                 │
//! │  │   Status     │──────────────►└───────▲───────┘                 │
//! │  │   Monitor    │   evaluate/apply      │                         │
//! │  └──────┬───────┘──────────────►┌───────┴───────┐                 │
//! │         │                       │  Correction   │                 │
//! │         │                       │  Engine       │                 │
//! │         │                       └───────┬───────┘                 │
//! └─────────┼───────────────────────────────┼─────────────────────────┘
//!           ▼          UsbTransport         ▼
//!   ┌─────────────────────────────────────────────────┐
//!   │  SimulatedLauncher / USB stack (dispatch ctx)   │
//!   └─────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod command;
pub mod correction;
pub mod file;
pub mod inflight;
pub mod lifecycle;
pub mod monitor;
pub mod registry;
pub mod session;
pub mod sync;
pub mod transport;

// Re-export key types for convenience
pub use crate::command::CommandChannel;
pub use crate::correction::CorrectionEngine;
pub use crate::file::DeviceFile;
pub use crate::lifecycle::LifecycleController;
pub use crate::monitor::StatusMonitor;
pub use crate::registry::DeviceRegistry;
pub use crate::session::{DeviceSession, SessionSnapshot, SessionState, StatsSnapshot};
pub use crate::transport::{SimulatedLauncher, SimulationConfig};
