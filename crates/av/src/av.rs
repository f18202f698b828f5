//! Address vector: insert, remove and resolve peers.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::addr::{AvType, EpAddr, FiAddr, Gid};
use crate::ah::{AddressHandle, AhId, AhProvider, AhTable};
use crate::config::{AvConfig, ConfigError, HistoryRetention};
use crate::conn::{ConnKey, Connection};
use crate::error::{AvError, Result};
use crate::metrics::AvMetrics;
use crate::registry::ConnectionRegistry;
use crate::reverse::{ExactKey, ReverseIndex};
use crate::shm::{ShmBridge, ShmSlot};
use crate::table::{AddressTable, UtilAddressTable};

/// Address vector behind the caller-side lock, for endpoints driven from
/// more than one thread. The address vector itself never locks.
pub type SharedAddressVector<D, A = UtilAddressTable, P = ()> = Arc<Mutex<AddressVector<D, A, P>>>;

/// Result of an insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    New(FiAddr),
    /// The address was already registered; its identifier is returned.
    Existing(FiAddr),
}

impl InsertResult {
    pub fn fi_addr(&self) -> FiAddr {
        match self {
            Self::New(fi_addr) | Self::Existing(fi_addr) => *fi_addr,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::New(_))
    }
}

/// Maps peer addresses to connections and packet sender identifiers back to
/// connections.
///
/// `P` is the per-peer session state carried by every connection.
pub struct AddressVector<D: AhProvider, A: AddressTable = UtilAddressTable, P = ()> {
    config: AvConfig,
    local_gid: Option<Gid>,
    registry: ConnectionRegistry<D, A, P>,
    reverse: ReverseIndex,
    shm: ShmBridge,
    metrics: AvMetrics,
}

impl<D: AhProvider, P> AddressVector<D, UtilAddressTable, P> {
    /// Open an address vector backed by the built-in address table.
    pub fn open(provider: D, config: AvConfig) -> Result<Self, ConfigError> {
        let table = UtilAddressTable::new(config.av_type, config.capacity());
        Self::with_table(provider, table, config)
    }
}

impl<D: AhProvider, A: AddressTable, P> AddressVector<D, A, P> {
    /// Open an address vector on a caller-supplied address table. The
    /// table's mode must match `config.av_type`.
    pub fn with_table(provider: D, table: A, config: AvConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        if table.av_type() != config.av_type {
            return Err(ConfigError::ModeMismatch {
                configured: config.av_type,
                table: table.av_type(),
            });
        }

        debug!(
            av_type = %config.av_type,
            capacity = table.capacity(),
            history = %config.history,
            "opened address vector"
        );

        let ah_table = AhTable::new(provider, config.address_handle_limit());
        Ok(Self {
            local_gid: None,
            registry: ConnectionRegistry::new(ah_table, table),
            reverse: ReverseIndex::new(),
            shm: ShmBridge::new(config.shm_capacity),
            metrics: AvMetrics::default(),
            config,
        })
    }

    /// Peers with this GID are flagged as same-host.
    pub fn with_local_gid(mut self, gid: Gid) -> Self {
        self.local_gid = Some(gid);
        self
    }

    pub fn into_shared(self) -> SharedAddressVector<D, A, P> {
        Arc::new(Mutex::new(self))
    }

    pub fn config(&self) -> &AvConfig {
        &self.config
    }

    pub fn av_type(&self) -> AvType {
        self.registry.av_type()
    }

    /// Register a peer address and publish it for reverse resolution.
    ///
    /// Inserting an address that is already registered is not an error; the
    /// existing forward identifier comes back as [`InsertResult::Existing`].
    pub fn insert(&mut self, addr: &EpAddr) -> Result<InsertResult>
    where
        P: Default,
    {
        if let Some(conn) = self
            .registry
            .lookup_addr(addr)
            .and_then(|key| self.registry.get(key))
        {
            trace!(%addr, fi_addr = %conn.fi_addr(), "address already registered");
            self.metrics.inc_insert_existing();
            return Ok(InsertResult::Existing(conn.fi_addr()));
        }

        let is_local = self.local_gid.as_ref() == Some(addr.gid());
        let (key, _) = self
            .registry
            .insert(*addr, is_local)
            .inspect_err(|e| self.metrics.record_error(e))?;

        let conn = self.registry.get(key).ok_or(AvError::NotFound)?;
        let fi_addr = conn.fi_addr();
        let outcome = self.reverse.publish(exact_key(conn), key);

        if let Some(old) = outcome.superseded {
            debug!(%addr, superseded = %old, "newer connection took over reverse entry");
        }
        // Only a retired record can hold the exact key of a new connection.
        if let Some(evicted) = outcome.evicted {
            if let Err(e) = self.registry.free_retired(evicted) {
                warn!(%addr, evicted = %evicted, error = %e, "failed to free evicted connection");
            }
        }

        self.metrics.inc_insert();
        self.update_gauges();
        Ok(InsertResult::New(fi_addr))
    }

    /// Parse and insert a serialized endpoint address.
    pub fn insert_raw(&mut self, bytes: &[u8]) -> Result<InsertResult>
    where
        P: Default,
    {
        let addr = EpAddr::from_bytes(bytes)?;
        self.insert(&addr)
    }

    /// Insert each address independently.
    pub fn insert_many(&mut self, addrs: &[EpAddr]) -> Vec<Result<InsertResult>>
    where
        P: Default,
    {
        addrs.iter().map(|addr| self.insert(addr)).collect()
    }

    /// Unregister a peer.
    ///
    /// Under [`HistoryRetention::Retain`] the connection stays resolvable by
    /// [`resolve_exact`](Self::resolve_exact) until pruned.
    pub fn remove(&mut self, fi_addr: FiAddr) -> Result<()> {
        let key = self.registry.resolve_forward(fi_addr)?;
        let conn = self.registry.get(key).ok_or(AvError::NotFound)?;
        let exact = exact_key(conn);
        let shm_slot = conn.shm_slot();
        let retain = self.config.history == HistoryRetention::Retain;

        // Index entries go first. The freed key and handle number can be
        // reused even when the device fails to destroy the handle.
        self.reverse.unpublish(exact, key, !retain);
        if let Some(slot) = shm_slot {
            if let Err(e) = self.shm.release(slot) {
                warn!(%fi_addr, %slot, error = %e, "shm slot already released");
            }
            if let Some(conn) = self.registry.get_mut(key) {
                conn.set_shm_slot(None);
            }
        }

        let removed = self.registry.remove(key, retain);
        self.update_gauges();
        removed?;

        debug!(%fi_addr, retain, "removed address");
        self.metrics.inc_remove();
        Ok(())
    }

    /// Remove in order, stopping at the first failure.
    pub fn remove_many(&mut self, fi_addrs: &[FiAddr]) -> Result<()> {
        for &fi_addr in fi_addrs {
            self.remove(fi_addr)?;
        }
        Ok(())
    }

    pub fn resolve_forward(&self, fi_addr: FiAddr) -> Result<&Connection<P>> {
        let key = self.registry.resolve_forward(fi_addr)?;
        self.registry.get(key).ok_or(AvError::NotFound)
    }

    pub fn resolve_forward_mut(&mut self, fi_addr: FiAddr) -> Result<&mut Connection<P>> {
        let key = self.registry.resolve_forward(fi_addr)?;
        self.registry.get_mut(key).ok_or(AvError::NotFound)
    }

    /// Stored peer address for a forward identifier.
    pub fn lookup(&self, fi_addr: FiAddr) -> Result<EpAddr> {
        self.resolve_forward(fi_addr).map(|conn| *conn.ep_addr())
    }

    /// Most recent connection for `(ahn, qpn)`. Only safe when the transport
    /// cannot see packets from an older connection on the same queue.
    pub fn resolve_current(&self, ahn: u16, qpn: u16) -> Result<&Connection<P>> {
        let key = self.reverse.resolve_current(AhId::new(ahn), qpn);
        self.connection_or_miss(key)
    }

    /// Connection with exactly this `(ahn, qpn, connid)`, current or not.
    pub fn resolve_exact(&self, ahn: u16, qpn: u16, connid: u32) -> Result<&Connection<P>> {
        let ahn = AhId::new(ahn);
        let key = self.reverse.resolve_exact(ahn, qpn, connid);
        if key.is_some() && key != self.reverse.resolve_current(ahn, qpn) {
            self.metrics.inc_stale_lookup();
        }
        self.connection_or_miss(key)
    }

    /// Receive-path resolution.
    ///
    /// The current entry answers when the packet carries no connection
    /// identifier or when the identifiers agree; otherwise the packet is from
    /// an older connection and the historical entry is used.
    pub fn resolve_packet(&self, ahn: u16, qpn: u16, connid: Option<u32>) -> Result<&Connection<P>> {
        let key = self.find_packet(AhId::new(ahn), qpn, connid)?;
        self.registry.get(key).ok_or(AvError::NotFound)
    }

    pub fn resolve_packet_mut(
        &mut self,
        ahn: u16,
        qpn: u16,
        connid: Option<u32>,
    ) -> Result<&mut Connection<P>> {
        let key = self.find_packet(AhId::new(ahn), qpn, connid)?;
        self.registry.get_mut(key).ok_or(AvError::NotFound)
    }

    fn find_packet(&self, ahn: AhId, qpn: u16, connid: Option<u32>) -> Result<ConnKey> {
        if let Some(key) = self.reverse.resolve_current(ahn, qpn) {
            let matches = self
                .registry
                .get(key)
                .is_some_and(|conn| connid.is_none_or(|id| conn.connid() == id));
            if matches {
                return Ok(key);
            }
        }

        match connid.and_then(|connid| self.reverse.resolve_exact(ahn, qpn, connid)) {
            Some(key) => {
                trace!(%ahn, qpn, ?connid, "packet from superseded connection");
                self.metrics.inc_stale_lookup();
                Ok(key)
            }
            None => {
                self.metrics.inc_reverse_miss();
                Err(AvError::NotFound)
            }
        }
    }

    fn connection_or_miss(&self, key: Option<ConnKey>) -> Result<&Connection<P>> {
        match key.and_then(|key| self.registry.get(key)) {
            Some(conn) => Ok(conn),
            None => {
                self.metrics.inc_reverse_miss();
                Err(AvError::NotFound)
            }
        }
    }

    /// Shared-memory slot for a same-host peer, assigned on first use.
    ///
    /// Fails with [`AvError::NotFound`] for unknown or remote peers and with
    /// [`AvError::ResourceExhausted`] when every slot is taken; in both cases
    /// the peer should be reached over the primary transport.
    pub fn shm_slot_for(&mut self, fi_addr: FiAddr) -> Result<ShmSlot> {
        let key = self.registry.resolve_forward(fi_addr)?;
        let conn = self.registry.get(key).ok_or(AvError::NotFound)?;
        if let Some(slot) = conn.shm_slot() {
            return Ok(slot);
        }
        if !conn.is_local() {
            return Err(AvError::NotFound);
        }

        let slot = self.shm.assign(fi_addr).inspect_err(|e| {
            debug!(%fi_addr, error = %e, "no shm slot, falling back to primary transport");
            self.metrics.record_error(e);
        })?;
        if let Some(conn) = self.registry.get_mut(key) {
            conn.set_shm_slot(Some(slot));
        }
        self.update_gauges();
        Ok(slot)
    }

    /// Already assigned shared-memory slot, if any.
    pub fn shm_slot(&self, fi_addr: FiAddr) -> Option<ShmSlot> {
        self.resolve_forward(fi_addr)
            .ok()
            .and_then(|conn| conn.shm_slot())
    }

    /// Forward identifier of the peer behind a shared-memory slot.
    pub fn shm_peer(&self, slot: ShmSlot) -> Result<FiAddr> {
        self.shm.peer(slot).ok_or(AvError::NotFound)
    }

    /// Free one retained connection and release its address handle.
    pub fn prune_history(&mut self, ahn: u16, qpn: u16, connid: u32) -> Result<()> {
        let exact = ExactKey {
            ahn: AhId::new(ahn),
            qpn,
            connid,
        };
        let key = self
            .reverse
            .resolve_exact(exact.ahn, qpn, connid)
            .ok_or(AvError::NotFound)?;
        if self.registry.get(key).is_none_or(|conn| conn.is_live()) {
            return Err(AvError::NotFound);
        }

        self.reverse.remove_exact(exact, key);
        self.registry.free_retired(key)?;
        self.update_gauges();
        Ok(())
    }

    /// Free every retained connection. Returns how many were freed.
    pub fn prune_all_history(&mut self) -> usize {
        let retired: Vec<_> = self
            .registry
            .iter()
            .filter(|(_, conn)| !conn.is_live())
            .map(|(key, conn)| (key, exact_key(conn)))
            .collect();

        let mut pruned = 0;
        for (key, exact) in retired {
            self.reverse.remove_exact(exact, key);
            match self.registry.free_retired(key) {
                Ok(_) => pruned += 1,
                Err(e) => warn!(conn = %key, error = %e, "failed to prune retained connection"),
            }
        }

        if pruned > 0 {
            debug!(pruned, "pruned retained connections");
            self.update_gauges();
        }
        pruned
    }

    /// Live connections.
    pub fn connections(&self) -> impl Iterator<Item = &Connection<P>> {
        self.registry
            .iter()
            .map(|(_, conn)| conn)
            .filter(|conn| conn.is_live())
    }

    pub fn used(&self) -> usize {
        self.registry.used()
    }

    pub fn shm_used(&self) -> usize {
        self.shm.used()
    }

    /// Removed connections still held for exact reverse lookups.
    pub fn retained(&self) -> usize {
        self.registry.retired()
    }

    pub fn address_handles(&self) -> usize {
        self.registry.ah_table().len()
    }

    pub fn address_handle(&self, ahn: u16) -> Option<&AddressHandle<D::Handle>> {
        self.registry.ah_table().get(AhId::new(ahn))
    }

    pub fn provider(&self) -> &D {
        self.registry.ah_table().provider()
    }

    /// Remove every connection and destroy every address handle.
    pub fn close(mut self) -> Result<()> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<()> {
        self.reverse.clear();
        self.shm.clear();
        let result = self.registry.clear();
        self.update_gauges();
        result
    }

    fn update_gauges(&self) {
        self.metrics.set_sizes(
            self.registry.used(),
            self.registry.ah_table().len(),
            self.shm.used(),
        );
    }
}

impl<D: AhProvider, A: AddressTable, P> Drop for AddressVector<D, A, P> {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            warn!(error = %e, "failed to tear down address vector");
        }
    }
}

impl<D: AhProvider, A: AddressTable, P> fmt::Debug for AddressVector<D, A, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressVector")
            .field("config", &self.config)
            .field("local_gid", &self.local_gid)
            .field("registry", &self.registry)
            .field("reverse", &self.reverse)
            .field("shm", &self.shm)
            .finish()
    }
}

fn exact_key<P>(conn: &Connection<P>) -> ExactKey {
    ExactKey {
        ahn: conn.ahn(),
        qpn: conn.qpn(),
        connid: conn.connid(),
    }
}
