//! Device registry.
//!
//! Minor-number table of attached sessions. Owned by the
//! `LifecycleController` through constructor injection rather than global
//! state, so each controller has its own table.

use crate::session::DeviceSession;
use crate::sync::lock;
use launcher_common::usb::error::DriverError;
use launcher_common::usb::types::DeviceId;
use std::sync::{Arc, Mutex};

enum Slot {
    Free,
    /// Claimed by an attach that has not finished yet.
    Reserved,
    Bound(Arc<DeviceSession>),
}

/// Table of device minors.
///
/// A bound slot holds the controller's own reference to the session.
pub struct DeviceRegistry {
    slots: Mutex<Vec<Slot>>,
}

impl DeviceRegistry {
    /// Create a registry with `capacity` minors.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new((0..capacity).map(|_| Slot::Free).collect()),
        }
    }

    /// Number of minors.
    pub fn capacity(&self) -> usize {
        lock(&self.slots).len()
    }

    /// Reserve the lowest free minor.
    ///
    /// # Errors
    /// `ResourceExhausted` if every minor is in use.
    pub fn claim(&self) -> Result<usize, DriverError> {
        let mut slots = lock(&self.slots);
        let minor = slots
            .iter()
            .position(|slot| matches!(slot, Slot::Free))
            .ok_or_else(|| {
                DriverError::ResourceExhausted(format!("all {} minors in use", slots.len()))
            })?;
        slots[minor] = Slot::Reserved;
        Ok(minor)
    }

    /// Publish a session in a reserved minor.
    ///
    /// # Errors
    /// `NotFound` if the minor was not reserved.
    pub fn bind(&self, minor: usize, session: Arc<DeviceSession>) -> Result<(), DriverError> {
        let mut slots = lock(&self.slots);
        match slots.get_mut(minor) {
            Some(slot) if matches!(slot, Slot::Reserved) => {
                *slot = Slot::Bound(session);
                Ok(())
            }
            _ => Err(DriverError::NotFound(format!("minor {minor} not reserved"))),
        }
    }

    /// Free a minor. Returns the bound session, if any.
    pub fn release(&self, minor: usize) -> Option<Arc<DeviceSession>> {
        let mut slots = lock(&self.slots);
        let slot = slots.get_mut(minor)?;
        match std::mem::replace(slot, Slot::Free) {
            Slot::Bound(session) => Some(session),
            Slot::Reserved | Slot::Free => None,
        }
    }

    /// Session bound to `minor`.
    pub fn get(&self, minor: usize) -> Option<Arc<DeviceSession>> {
        match lock(&self.slots).get(minor)? {
            Slot::Bound(session) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    /// All bound sessions with the given identity.
    pub fn find(&self, id: DeviceId) -> Vec<Arc<DeviceSession>> {
        self.sessions()
            .into_iter()
            .filter(|session| session.device_id() == id)
            .collect()
    }

    /// All bound sessions in minor order.
    pub fn sessions(&self) -> Vec<Arc<DeviceSession>> {
        lock(&self.slots)
            .iter()
            .filter_map(|slot| match slot {
                Slot::Bound(session) => Some(Arc::clone(session)),
                _ => None,
            })
            .collect()
    }

    /// Number of bound sessions.
    pub fn len(&self) -> usize {
        lock(&self.slots)
            .iter()
            .filter(|slot| matches!(slot, Slot::Bound(_)))
            .count()
    }

    /// Returns true if no session is bound.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
