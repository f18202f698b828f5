//! Shared-memory address bridge.
//!
//! Same-host peers can be reached over a shared-memory side channel that
//! names peers by its own small slot numbers. The bridge assigns those
//! slots lazily and maps them back to forward identifiers.

use std::fmt;

use tracing::debug;

use crate::addr::FiAddr;
use crate::error::{AvError, Resource, Result};

/// Peer slot in the shared-memory transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShmSlot(u16);

impl ShmSlot {
    pub const fn new(slot: u16) -> Self {
        Self(slot)
    }

    pub const fn get(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for ShmSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed-capacity slot → forward identifier table.
#[derive(Debug)]
pub struct ShmBridge {
    slots: Vec<Option<FiAddr>>,
    used: usize,
}

impl ShmBridge {
    /// `capacity` is clamped to the slot number space.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.min(usize::from(u16::MAX) + 1);
        Self {
            slots: vec![None; capacity],
            used: 0,
        }
    }

    /// Take the lowest free slot for `fi_addr`.
    ///
    /// [`AvError::ResourceExhausted`] here is not fatal: the peer stays
    /// reachable over the primary transport.
    pub fn assign(&mut self, fi_addr: FiAddr) -> Result<ShmSlot> {
        let (index, entry) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, entry)| entry.is_none())
            .ok_or(AvError::ResourceExhausted(Resource::ShmSlots))?;
        let slot = u16::try_from(index)
            .map(ShmSlot)
            .map_err(|_| AvError::ResourceExhausted(Resource::ShmSlots))?;

        *entry = Some(fi_addr);
        self.used += 1;
        debug!(%fi_addr, %slot, "assigned shm slot");
        Ok(slot)
    }

    pub fn release(&mut self, slot: ShmSlot) -> Result<FiAddr> {
        let fi_addr = self
            .slots
            .get_mut(usize::from(slot.0))
            .and_then(Option::take)
            .ok_or(AvError::NotFound)?;
        self.used -= 1;
        debug!(%fi_addr, %slot, "released shm slot");
        Ok(fi_addr)
    }

    pub fn peer(&self, slot: ShmSlot) -> Option<FiAddr> {
        self.slots.get(usize::from(slot.0)).copied().flatten()
    }

    pub fn used(&self) -> usize {
        self.used
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|entry| *entry = None);
        self.used = 0;
    }
}
