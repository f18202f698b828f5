//! Software address handle provider.
//!
//! Hands out synthetic handles instead of programming a device. Used for
//! loopback endpoints and in tests, where `with_capacity` stands in for a
//! full device handle table.

use crate::addr::Gid;
use crate::ah::AhProvider;
use crate::error::{AvError, Resource, Result};

/// Handle produced by [`LoopbackAhProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackAh {
    serial: u64,
    gid: Gid,
}

impl LoopbackAh {
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn gid(&self) -> &Gid {
        &self.gid
    }
}

#[derive(Debug, Default)]
pub struct LoopbackAhProvider {
    capacity: Option<usize>,
    live: usize,
    created: u64,
    destroyed: u64,
}

impl LoopbackAhProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail creation once `capacity` handles are live.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: Some(capacity),
            ..Self::default()
        }
    }

    pub fn live(&self) -> usize {
        self.live
    }

    pub fn created(&self) -> u64 {
        self.created
    }

    pub fn destroyed(&self) -> u64 {
        self.destroyed
    }
}

impl AhProvider for LoopbackAhProvider {
    type Handle = LoopbackAh;

    fn create_ah(&mut self, gid: &Gid) -> Result<Self::Handle> {
        if self.capacity.is_some_and(|cap| self.live >= cap) {
            return Err(AvError::ResourceExhausted(Resource::AddressHandles));
        }
        self.live += 1;
        self.created += 1;
        Ok(LoopbackAh {
            serial: self.created,
            gid: *gid,
        })
    }

    fn destroy_ah(&mut self, _handle: Self::Handle) -> Result<()> {
        self.live = self
            .live
            .checked_sub(1)
            .ok_or_else(|| AvError::Transport("destroy without live handle".into()))?;
        self.destroyed += 1;
        Ok(())
    }
}
