//! Error taxonomy surfaced to the transport.

use strum::{Display, IntoStaticStr};
use thiserror::Error;

/// Bounded resource that can run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Resource {
    AddressHandles,
    Connections,
    ShmSlots,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AvError {
    /// Malformed or short raw address.
    #[error("invalid address ({len} bytes)")]
    InvalidAddress { len: usize },
    #[error("{0} exhausted")]
    ResourceExhausted(Resource),
    /// Lookup on an unregistered or removed key.
    #[error("address not found")]
    NotFound,
    /// Double release or use of a stale address handle.
    #[error("invalid address handle")]
    InvalidHandle,
    /// Address handle provider failure other than exhaustion.
    #[error("transport error: {0}")]
    Transport(String),
}

impl AvError {
    /// The resource this error reports as exhausted, if any.
    pub fn exhausted(&self) -> Option<Resource> {
        match self {
            Self::ResourceExhausted(resource) => Some(*resource),
            _ => None,
        }
    }
}

pub type Result<T, E = AvError> = std::result::Result<T, E>;
