//! Simulated launcher backend.
//!
//! A software model of the turret behind the `UsbTransport` contract, for
//! development and end-to-end tests without hardware.

mod config;
mod device;
mod turret;

pub use config::SimulationConfig;
pub use device::SimulatedLauncher;
pub use turret::{AxisModel, TurretModel};
