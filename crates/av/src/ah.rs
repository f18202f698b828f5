//! Address handle table: one shared, reference-counted low-level handle per
//! distinct raw address.

use std::collections::HashMap;
use std::fmt;

use slab::Slab;
use tracing::{debug, trace, warn};

use crate::addr::Gid;
use crate::error::{AvError, Resource, Result};

/// Size of the numeric handle identifier space.
pub const AHN_SPACE: usize = u16::MAX as usize + 1;

/// Creates and destroys low-level address handles on the device.
///
/// Creation is expensive (it usually reaches into the device's own handle
/// table), which is why the table deduplicates by raw address.
pub trait AhProvider {
    type Handle: fmt::Debug;

    /// Create a handle for `gid`. Fails with [`AvError::ResourceExhausted`]
    /// when the device cannot hold another handle.
    fn create_ah(&mut self, gid: &Gid) -> Result<Self::Handle>;

    fn destroy_ah(&mut self, handle: Self::Handle) -> Result<()>;
}

/// Numeric address handle identifier, carried in every packet header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AhId(u16);

impl AhId {
    pub const fn new(ahn: u16) -> Self {
        Self(ahn)
    }

    pub const fn get(&self) -> u16 {
        self.0
    }

    fn index(&self) -> usize {
        usize::from(self.0)
    }
}

impl From<u16> for AhId {
    fn from(ahn: u16) -> Self {
        Self(ahn)
    }
}

impl fmt::Display for AhId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A deduplicated device address handle.
#[derive(Debug)]
pub struct AddressHandle<H> {
    gid: Gid,
    handle: H,
    ahn: AhId,
    refcnt: usize,
}

impl<H> AddressHandle<H> {
    pub fn gid(&self) -> &Gid {
        &self.gid
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }

    pub fn ahn(&self) -> AhId {
        self.ahn
    }

    /// Number of connections sharing this handle.
    pub fn refcnt(&self) -> usize {
        self.refcnt
    }
}

/// Raw address → address handle dedup table.
pub struct AhTable<D: AhProvider> {
    provider: D,
    handles: Slab<AddressHandle<D::Handle>>,
    by_gid: HashMap<Gid, AhId>,
    limit: usize,
}

impl<D: AhProvider> AhTable<D> {
    /// `limit` caps the number of distinct raw addresses; it is clamped to
    /// the handle identifier space.
    pub fn new(provider: D, limit: usize) -> Self {
        Self {
            provider,
            handles: Slab::new(),
            by_gid: HashMap::new(),
            limit: limit.min(AHN_SPACE),
        }
    }

    /// Get the handle for `gid`, creating it on first use.
    ///
    /// Every successful call must be paired with one [`release`](Self::release).
    pub fn acquire(&mut self, gid: &Gid) -> Result<AhId> {
        if let Some(&ahn) = self.by_gid.get(gid) {
            let ah = self
                .handles
                .get_mut(ahn.index())
                .ok_or(AvError::InvalidHandle)?;
            ah.refcnt += 1;
            trace!(%gid, %ahn, refcnt = ah.refcnt, "reused address handle");
            return Ok(ahn);
        }

        if self.handles.len() >= self.limit {
            return Err(AvError::ResourceExhausted(Resource::AddressHandles));
        }
        let ahn = u16::try_from(self.handles.vacant_key())
            .map(AhId)
            .map_err(|_| AvError::ResourceExhausted(Resource::AddressHandles))?;

        let handle = self.provider.create_ah(gid)?;
        let key = self.handles.insert(AddressHandle {
            gid: *gid,
            handle,
            ahn,
            refcnt: 1,
        });
        debug_assert_eq!(key, ahn.index());
        self.by_gid.insert(*gid, ahn);

        debug!(%gid, %ahn, "created address handle");
        Ok(ahn)
    }

    /// Drop one reference. The low-level handle is destroyed with the last one.
    pub fn release(&mut self, ahn: AhId) -> Result<()> {
        let Some(ah) = self.handles.get_mut(ahn.index()) else {
            warn!(%ahn, "release of untracked address handle");
            return Err(AvError::InvalidHandle);
        };

        ah.refcnt -= 1;
        if ah.refcnt > 0 {
            trace!(%ahn, refcnt = ah.refcnt, "released address handle reference");
            return Ok(());
        }

        let ah = self.handles.remove(ahn.index());
        self.by_gid.remove(&ah.gid);
        debug!(gid = %ah.gid, %ahn, "destroying address handle");
        self.provider.destroy_ah(ah.handle)
    }

    pub fn get(&self, ahn: AhId) -> Option<&AddressHandle<D::Handle>> {
        self.handles.get(ahn.index())
    }

    pub fn lookup(&self, gid: &Gid) -> Option<AhId> {
        self.by_gid.get(gid).copied()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn provider(&self) -> &D {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut D {
        &mut self.provider
    }

    /// Destroy every handle regardless of reference counts.
    ///
    /// Returns the first provider error; the table is empty either way.
    pub fn clear(&mut self) -> Result<()> {
        self.by_gid.clear();
        let mut result = Ok(());
        for ah in self.handles.drain() {
            if let Err(e) = self.provider.destroy_ah(ah.handle) {
                warn!(ahn = %ah.ahn, error = %e, "failed to destroy address handle");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}

impl<D: AhProvider> fmt::Debug for AhTable<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AhTable")
            .field("handles", &self.handles.len())
            .field("limit", &self.limit)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::loopback::LoopbackAhProvider;

    fn test_gid(n: u8) -> Gid {
        Gid::new([n; 16])
    }

    #[test]
    fn test_acquire_dedups() {
        let mut table = AhTable::new(LoopbackAhProvider::new(), AHN_SPACE);

        let a = table.acquire(&test_gid(1)).unwrap();
        let b = table.acquire(&test_gid(1)).unwrap();

        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(a).unwrap().refcnt(), 2);
        assert_eq!(table.provider().created(), 1);
    }

    #[test]
    fn test_release_to_zero_destroys() {
        let mut table = AhTable::new(LoopbackAhProvider::new(), AHN_SPACE);
        let gid = test_gid(1);

        let ahn = table.acquire(&gid).unwrap();
        table.acquire(&gid).unwrap();

        table.release(ahn).unwrap();
        assert_eq!(table.get(ahn).unwrap().refcnt(), 1);
        assert_eq!(table.provider().destroyed(), 0);

        table.release(ahn).unwrap();
        assert!(table.get(ahn).is_none());
        assert!(table.lookup(&gid).is_none());
        assert!(table.is_empty());
        assert_eq!(table.provider().destroyed(), 1);

        assert_matches!(table.release(ahn), Err(AvError::InvalidHandle));
    }

    #[test]
    fn test_distinct_gids_get_distinct_ids() {
        let mut table = AhTable::new(LoopbackAhProvider::new(), AHN_SPACE);

        let a = table.acquire(&test_gid(1)).unwrap();
        let b = table.acquire(&test_gid(2)).unwrap();

        assert_ne!(a, b);
        assert_eq!(table.lookup(&test_gid(2)), Some(b));
    }

    #[test]
    fn test_ids_recycled_after_release() {
        let mut table = AhTable::new(LoopbackAhProvider::new(), AHN_SPACE);

        let a = table.acquire(&test_gid(1)).unwrap();
        table.release(a).unwrap();
        let b = table.acquire(&test_gid(2)).unwrap();

        assert_eq!(a, b);
        assert_eq!(table.get(b).unwrap().gid(), &test_gid(2));
    }

    #[test]
    fn test_limit() {
        let mut table = AhTable::new(LoopbackAhProvider::new(), 1);

        table.acquire(&test_gid(1)).unwrap();
        assert_matches!(
            table.acquire(&test_gid(2)),
            Err(AvError::ResourceExhausted(Resource::AddressHandles))
        );
        // Existing entries are still shareable at the limit.
        table.acquire(&test_gid(1)).unwrap();
    }

    #[test]
    fn test_provider_exhaustion_leaves_no_entry() {
        let mut table = AhTable::new(LoopbackAhProvider::with_capacity(1), AHN_SPACE);

        table.acquire(&test_gid(1)).unwrap();
        assert_matches!(
            table.acquire(&test_gid(2)),
            Err(AvError::ResourceExhausted(Resource::AddressHandles))
        );
        assert_eq!(table.len(), 1);
        assert!(table.lookup(&test_gid(2)).is_none());
    }

    #[test]
    fn test_clear_destroys_all() {
        let mut table = AhTable::new(LoopbackAhProvider::new(), AHN_SPACE);
        table.acquire(&test_gid(1)).unwrap();
        table.acquire(&test_gid(1)).unwrap();
        table.acquire(&test_gid(2)).unwrap();

        table.clear().unwrap();

        assert!(table.is_empty());
        assert_eq!(table.provider().live(), 0);
        assert_eq!(table.provider().destroyed(), 2);
    }
}
