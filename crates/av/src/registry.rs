//! Connection registry: one connection per inserted peer address.

use std::collections::HashMap;
use std::fmt;

use slab::Slab;
use tracing::{debug, warn};

use crate::addr::{AvType, EpAddr, FiAddr};
use crate::ah::{AhProvider, AhTable};
use crate::conn::{ConnKey, Connection};
use crate::error::{AvError, Result};
use crate::table::AddressTable;

/// Connection arena with forward (identifier → connection) resolution.
///
/// Retired connections stay in the arena, keeping their address handle
/// reference, until [`free_retired`](Self::free_retired) is called.
pub struct ConnectionRegistry<D: AhProvider, A: AddressTable, P> {
    ah_table: AhTable<D>,
    table: A,
    conns: Slab<Connection<P>>,
    by_addr: HashMap<EpAddr, ConnKey>,
    retired: usize,
}

impl<D: AhProvider, A: AddressTable, P> ConnectionRegistry<D, A, P> {
    pub fn new(ah_table: AhTable<D>, table: A) -> Self {
        Self {
            ah_table,
            table,
            conns: Slab::new(),
            by_addr: HashMap::new(),
            retired: 0,
        }
    }

    pub fn av_type(&self) -> AvType {
        self.table.av_type()
    }

    /// Register `addr`, or return the existing connection for it.
    ///
    /// Returns the key and whether the connection was created. On failure
    /// nothing is registered and no address handle reference is kept.
    pub fn insert(&mut self, addr: EpAddr, is_local: bool) -> Result<(ConnKey, bool)>
    where
        P: Default,
    {
        if let Some(&key) = self.by_addr.get(&addr) {
            return Ok((key, false));
        }

        let ahn = self.ah_table.acquire(addr.gid())?;

        let key = ConnKey::new(self.conns.vacant_key());
        let util_index = match self.table.assign(key) {
            Ok(index) => index,
            Err(e) => {
                if let Err(release) = self.ah_table.release(ahn) {
                    warn!(%ahn, error = %release, "failed to roll back address handle");
                }
                return Err(e);
            }
        };

        let fi_addr = match self.table.av_type() {
            AvType::Table => FiAddr::new(util_index as u64),
            AvType::Map => FiAddr::new(key.index() as u64),
        };

        let inserted = self.conns.insert(Connection::new(
            ahn,
            addr,
            fi_addr,
            util_index,
            is_local,
            P::default(),
        ));
        debug_assert_eq!(inserted, key.index());
        self.by_addr.insert(addr, key);

        debug!(%addr, %fi_addr, %ahn, "registered connection");
        Ok((key, true))
    }

    /// Unregister a live connection.
    ///
    /// With `retain` the record becomes retired and keeps its address
    /// handle; otherwise it is freed and the handle reference released.
    pub fn remove(&mut self, key: ConnKey, retain: bool) -> Result<Option<Connection<P>>> {
        let conn = self
            .conns
            .get(key.index())
            .filter(|conn| conn.is_live())
            .ok_or(AvError::NotFound)?;
        let util_index = conn.util_index();
        let addr = *conn.ep_addr();

        self.table.release(util_index)?;
        self.by_addr.remove(&addr);

        if retain {
            if let Some(conn) = self.conns.get_mut(key.index()) {
                conn.retire();
            }
            self.retired += 1;
            debug!(%addr, "retired connection");
            return Ok(None);
        }

        let conn = self.conns.remove(key.index());
        self.ah_table.release(conn.ahn())?;
        debug!(%addr, "removed connection");
        Ok(Some(conn))
    }

    /// Free a retired connection and release its address handle reference.
    pub fn free_retired(&mut self, key: ConnKey) -> Result<Connection<P>> {
        if self.conns.get(key.index()).is_none_or(|conn| conn.is_live()) {
            return Err(AvError::NotFound);
        }
        let conn = self.conns.remove(key.index());
        self.retired -= 1;
        self.ah_table.release(conn.ahn())?;
        debug!(addr = %conn.ep_addr(), "freed retired connection");
        Ok(conn)
    }

    /// Live connection named by a forward identifier.
    pub fn resolve_forward(&self, fi_addr: FiAddr) -> Result<ConnKey> {
        let index = usize::try_from(fi_addr.as_u64()).map_err(|_| AvError::NotFound)?;
        let key = match self.table.av_type() {
            AvType::Table => self.table.get(index).ok_or(AvError::NotFound)?,
            AvType::Map => ConnKey::new(index),
        };
        match self.conns.get(key.index()) {
            Some(conn) if conn.is_live() && conn.fi_addr() == fi_addr => Ok(key),
            _ => Err(AvError::NotFound),
        }
    }

    pub fn lookup_addr(&self, addr: &EpAddr) -> Option<ConnKey> {
        self.by_addr.get(addr).copied()
    }

    pub fn get(&self, key: ConnKey) -> Option<&Connection<P>> {
        self.conns.get(key.index())
    }

    pub fn get_mut(&mut self, key: ConnKey) -> Option<&mut Connection<P>> {
        self.conns.get_mut(key.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = (ConnKey, &Connection<P>)> {
        self.conns.iter().map(|(index, conn)| (ConnKey::new(index), conn))
    }

    /// Live connections.
    pub fn used(&self) -> usize {
        self.table.len()
    }

    /// Retired connections still held for historical lookups.
    pub fn retired(&self) -> usize {
        self.retired
    }

    pub fn ah_table(&self) -> &AhTable<D> {
        &self.ah_table
    }

    /// Drop every connection and destroy every address handle.
    pub fn clear(&mut self) -> Result<()> {
        let mut result = Ok(());
        for conn in self.conns.drain() {
            if conn.is_live() {
                if let Err(e) = self.table.release(conn.util_index()) {
                    warn!(fi_addr = %conn.fi_addr(), error = %e, "failed to release address table slot");
                    result = result.and(Err(e));
                }
            }
        }
        self.by_addr.clear();
        self.retired = 0;
        result.and(self.ah_table.clear())
    }
}

impl<D: AhProvider, A: AddressTable, P> fmt::Debug for ConnectionRegistry<D, A, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("av_type", &self.table.av_type())
            .field("used", &self.table.len())
            .field("retired", &self.retired)
            .field("ah_table", &self.ah_table)
            .finish()
    }
}
