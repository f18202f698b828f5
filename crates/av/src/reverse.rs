//! Reverse resolution: packet sender identifiers → connection.
//!
//! Packets carry only the sender's address handle number and queue pair
//! number, optionally with its connection identifier. Both numbers are
//! small and get reused: a peer that restarts comes back on the same
//! handle and often the same queue pair, with a new queue key. A single map
//! keyed on `(ahn, qpn)` would then route delayed packets from the old
//! incarnation to the new one.
//!
//! Two views are kept instead:
//! - **current** `(ahn, qpn)` → the most recently published connection,
//!   the fast path when the packet carries no connection identifier.
//! - **historical** `(ahn, qpn, connid)` → every published connection,
//!   including superseded ones, for exact matching.

use std::collections::HashMap;

use tracing::trace;

use crate::ah::AhId;
use crate::conn::ConnKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CurrentKey {
    pub ahn: AhId,
    pub qpn: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExactKey {
    pub ahn: AhId,
    pub qpn: u16,
    pub connid: u32,
}

impl ExactKey {
    pub fn current(&self) -> CurrentKey {
        CurrentKey {
            ahn: self.ahn,
            qpn: self.qpn,
        }
    }
}

/// What a publish displaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    /// Previous holder of the current entry; still reachable by exact key.
    pub superseded: Option<ConnKey>,
    /// Previous holder of the exact entry; no longer reachable at all.
    pub evicted: Option<ConnKey>,
}

#[derive(Debug, Default)]
pub struct ReverseIndex {
    current: HashMap<CurrentKey, ConnKey>,
    historical: HashMap<ExactKey, ConnKey>,
}

impl ReverseIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `conn` the current connection for its `(ahn, qpn)` and record it
    /// under its exact key. Last writer wins in both views.
    pub fn publish(&mut self, key: ExactKey, conn: ConnKey) -> PublishOutcome {
        let superseded = self
            .current
            .insert(key.current(), conn)
            .filter(|&old| old != conn);
        let evicted = self.historical.insert(key, conn).filter(|&old| old != conn);
        PublishOutcome { superseded, evicted }
    }

    /// Withdraw `conn` from the current view (if it still holds its entry)
    /// and, with `prune`, from the historical view.
    pub fn unpublish(&mut self, key: ExactKey, conn: ConnKey, prune: bool) {
        let current = key.current();
        if self.current.get(&current) == Some(&conn) {
            self.current.remove(&current);
        }
        if prune {
            self.remove_exact(key, conn);
        }
    }

    /// Remove the historical entry for `key` if it names `conn`.
    pub fn remove_exact(&mut self, key: ExactKey, conn: ConnKey) -> bool {
        if self.historical.get(&key) == Some(&conn) {
            self.historical.remove(&key);
            true
        } else {
            false
        }
    }

    pub fn resolve_current(&self, ahn: AhId, qpn: u16) -> Option<ConnKey> {
        let conn = self.current.get(&CurrentKey { ahn, qpn }).copied();
        trace!(%ahn, qpn, ?conn, "current reverse lookup");
        conn
    }

    pub fn resolve_exact(&self, ahn: AhId, qpn: u16, connid: u32) -> Option<ConnKey> {
        let conn = self.historical.get(&ExactKey { ahn, qpn, connid }).copied();
        trace!(%ahn, qpn, connid, ?conn, "exact reverse lookup");
        conn
    }

    pub fn current_len(&self) -> usize {
        self.current.len()
    }

    pub fn historical_len(&self) -> usize {
        self.historical.len()
    }

    pub fn clear(&mut self) {
        self.current.clear();
        self.historical.clear();
    }
}
