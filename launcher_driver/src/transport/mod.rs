//! Transport backends.
//!
//! The driver core only sees `UsbTransport`. Backends are selected by name
//! and configured from their `[transport.<name>]` table.

pub mod simulation;

pub use simulation::{SimulatedLauncher, SimulationConfig};

/// Name of the simulated backend's configuration table.
pub const SIMULATION_BACKEND: &str = "simulation";
