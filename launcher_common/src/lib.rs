//! Launcher Common Library
//!
//! Shared constants, wire protocol, transport contract and configuration
//! loading for the launcher driver workspace.
//!
//! # Module Structure
//!
//! - [`usb`] - Device identity, wire protocol, transport contract, driver config
//! - [`config`] - Configuration loading traits and types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use launcher_common::prelude::*;
//!
//! let frame = CommandFrame::new(Command::UP);
//! assert_eq!(frame.as_bytes()[1], 0x02);
//! ```

pub mod config;
pub mod prelude;
pub mod usb;
