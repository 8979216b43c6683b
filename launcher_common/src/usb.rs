//! USB launcher device definitions.
//!
//! This module contains the device identity, the vendor-specific wire
//! protocol, the asynchronous transport contract consumed by the driver
//! core, and the driver configuration types.

pub mod config;
pub mod consts;
pub mod error;
pub mod transport;
pub mod types;
