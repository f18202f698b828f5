//! Connection records.

use std::fmt;

use crate::addr::{EpAddr, FiAddr};
use crate::ah::AhId;
use crate::shm::ShmSlot;

/// Stable arena index of a connection record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnKey(usize);

impl ConnKey {
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    pub const fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for ConnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Registered: resolvable by forward identifier and address.
    Live,
    /// Removed, but kept resolvable by its exact reverse key.
    Retired,
}

/// One peer endpoint, bound to a shared address handle.
///
/// `P` is the per-peer session state of the reliability layer; the address
/// vector only creates it (via `Default`) and hands it out.
#[derive(Debug)]
pub struct Connection<P = ()> {
    ahn: AhId,
    ep_addr: EpAddr,
    fi_addr: FiAddr,
    util_index: usize,
    state: ConnState,
    is_local: bool,
    shm_slot: Option<ShmSlot>,
    peer: P,
}

impl<P> Connection<P> {
    pub(crate) fn new(
        ahn: AhId,
        ep_addr: EpAddr,
        fi_addr: FiAddr,
        util_index: usize,
        is_local: bool,
        peer: P,
    ) -> Self {
        Self {
            ahn,
            ep_addr,
            fi_addr,
            util_index,
            state: ConnState::Live,
            is_local,
            shm_slot: None,
            peer,
        }
    }

    pub fn ahn(&self) -> AhId {
        self.ahn
    }

    pub fn ep_addr(&self) -> &EpAddr {
        &self.ep_addr
    }

    pub fn qpn(&self) -> u16 {
        self.ep_addr.qpn()
    }

    pub fn connid(&self) -> u32 {
        self.ep_addr.connid()
    }

    /// Forward identifier. For a retired connection this is the identifier it
    /// had while registered; it may since have been reassigned.
    pub fn fi_addr(&self) -> FiAddr {
        self.fi_addr
    }

    /// Slot in the address table utility (equal to `fi_addr` in table mode).
    pub fn util_index(&self) -> usize {
        self.util_index
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        self.state == ConnState::Live
    }

    /// Peer lives on this host and can use the shared-memory side channel.
    pub fn is_local(&self) -> bool {
        self.is_local
    }

    pub fn shm_slot(&self) -> Option<ShmSlot> {
        self.shm_slot
    }

    pub fn peer(&self) -> &P {
        &self.peer
    }

    pub fn peer_mut(&mut self) -> &mut P {
        &mut self.peer
    }

    pub(crate) fn set_shm_slot(&mut self, slot: Option<ShmSlot>) {
        self.shm_slot = slot;
    }

    pub(crate) fn retire(&mut self) {
        self.state = ConnState::Retired;
    }
}
