//! Address vector for reliable-datagram transports.
//!
//! Maps peer endpoint addresses to connection records that share
//! deduplicated device address handles, and resolves the compact sender
//! identifiers carried by inbound packets (address handle number, queue pair
//! number, connection identifier) back to the right connection, including
//! across peer restarts that reuse the same numbers.
//!
//! The address vector is driven from a single progress context and does no
//! locking of its own; see [`SharedAddressVector`] for the caller-side lock.

pub mod addr;
pub mod ah;
pub mod av;
pub mod config;
pub mod conn;
pub mod error;
pub mod loopback;
mod metrics;
pub mod registry;
pub mod reverse;
pub mod shm;
pub mod table;

pub use addr::{AvType, EP_ADDR_LEN, EpAddr, FiAddr, GID_LEN, Gid};
pub use ah::{AHN_SPACE, AddressHandle, AhId, AhProvider, AhTable};
pub use av::{AddressVector, InsertResult, SharedAddressVector};
pub use config::{AvConfig, ConfigError, HistoryRetention, MIN_AV_SIZE, SHM_MAX_AV_COUNT};
pub use conn::{ConnKey, ConnState, Connection};
pub use error::{AvError, Resource, Result};
pub use loopback::{LoopbackAh, LoopbackAhProvider};
pub use registry::ConnectionRegistry;
pub use reverse::{CurrentKey, ExactKey, PublishOutcome, ReverseIndex};
pub use shm::{ShmBridge, ShmSlot};
pub use table::{AddressTable, UtilAddressTable};
