//! Address vector metrics

use core::fmt;

use metrics::{Counter, Gauge};

use crate::error::{AvError, Resource};

/// Address vector metrics
#[derive(Clone)]
pub(crate) struct AvMetrics {
    /// Number of connections created by insert
    insert_total: Counter,
    /// Number of inserts answered by an already registered address
    insert_existing_total: Counter,
    /// Number of removed connections
    remove_total: Counter,
    /// Number of reverse lookups that found no connection
    reverse_lookup_miss_total: Counter,
    /// Number of packets resolved to a connection that is no longer current
    stale_lookup_total: Counter,
    /// Live connections
    connections: Gauge,
    /// Live address handles
    address_handles: Gauge,
    /// Assigned shared-memory slots
    shm_slots: Gauge,
}

impl Default for AvMetrics {
    fn default() -> Self {
        Self {
            insert_total: metrics::counter!("rdm_av.insert_total"),
            insert_existing_total: metrics::counter!("rdm_av.insert_existing_total"),
            remove_total: metrics::counter!("rdm_av.remove_total"),
            reverse_lookup_miss_total: metrics::counter!("rdm_av.reverse_lookup_miss_total"),
            stale_lookup_total: metrics::counter!("rdm_av.stale_lookup_total"),
            connections: metrics::gauge!("rdm_av.connections"),
            address_handles: metrics::gauge!("rdm_av.address_handles"),
            shm_slots: metrics::gauge!("rdm_av.shm_slots"),
        }
    }
}

impl fmt::Debug for AvMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AvMetrics").finish_non_exhaustive()
    }
}

impl AvMetrics {
    pub(crate) fn inc_insert(&self) {
        self.insert_total.increment(1);
    }

    pub(crate) fn inc_insert_existing(&self) {
        self.insert_existing_total.increment(1);
    }

    pub(crate) fn inc_remove(&self) {
        self.remove_total.increment(1);
    }

    pub(crate) fn inc_reverse_miss(&self) {
        self.reverse_lookup_miss_total.increment(1);
    }

    pub(crate) fn inc_stale_lookup(&self) {
        self.stale_lookup_total.increment(1);
    }

    /// Counts exhaustion failures by resource; other errors are not recorded.
    pub(crate) fn record_error(&self, error: &AvError) {
        if let Some(resource) = error.exhausted() {
            self.inc_exhausted(resource);
        }
    }

    fn inc_exhausted(&self, resource: Resource) {
        let resource: &'static str = resource.into();
        metrics::counter!("rdm_av.exhausted_total", "resource" => resource).increment(1);
    }

    pub(crate) fn set_sizes(&self, connections: usize, address_handles: usize, shm_slots: usize) {
        self.connections.set(connections as f64);
        self.address_handles.set(address_handles as f64);
        self.shm_slots.set(shm_slots as f64);
    }
}
