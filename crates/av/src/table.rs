//! Address table utility: assigns dense slots to inserted peers.

use slab::Slab;

use crate::addr::AvType;
use crate::conn::ConnKey;
use crate::error::{AvError, Resource, Result};

/// Slot allocator shared with the generic address-vector layer.
///
/// Every entry gets a dense slot index regardless of mode; `av_type`
/// tells the registry whether that index is also the forward identifier
/// handed to the application.
pub trait AddressTable {
    fn av_type(&self) -> AvType;

    /// Maximum number of simultaneously assigned slots.
    fn capacity(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Assign a slot to `conn`. Fails with [`AvError::ResourceExhausted`]
    /// when the table is full.
    fn assign(&mut self, conn: ConnKey) -> Result<usize>;

    /// Free a slot. Fails with [`AvError::NotFound`] if it is not assigned.
    fn release(&mut self, index: usize) -> Result<ConnKey>;

    fn get(&self, index: usize) -> Option<ConnKey>;
}

/// Bounded in-process [`AddressTable`]. Freed slots are reused before the
/// table grows, so indices stay dense.
#[derive(Debug)]
pub struct UtilAddressTable {
    av_type: AvType,
    capacity: usize,
    entries: Slab<ConnKey>,
}

impl UtilAddressTable {
    pub fn new(av_type: AvType, capacity: usize) -> Self {
        Self {
            av_type,
            capacity,
            entries: Slab::new(),
        }
    }
}

impl AddressTable for UtilAddressTable {
    fn av_type(&self) -> AvType {
        self.av_type
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn assign(&mut self, conn: ConnKey) -> Result<usize> {
        if self.entries.len() >= self.capacity {
            return Err(AvError::ResourceExhausted(Resource::Connections));
        }
        Ok(self.entries.insert(conn))
    }

    fn release(&mut self, index: usize) -> Result<ConnKey> {
        self.entries.try_remove(index).ok_or(AvError::NotFound)
    }

    fn get(&self, index: usize) -> Option<ConnKey> {
        self.entries.get(index).copied()
    }
}
