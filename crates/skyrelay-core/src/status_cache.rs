//! Latest-value telemetry store.
//!
//! Written at each client's ingress rate, read once per broadcaster tick.
//! No history is kept: an upsert replaces the previous entry wholesale, so
//! a reader can never observe a torn mix of old and new fields.

use dashmap::DashMap;
use skyrelay_types::{AircraftStatus, ConnectionId, StatusEntry};

/// Latest [`StatusEntry`] per connection.
#[derive(Debug, Default)]
pub struct StatusCache {
    entries: DashMap<ConnectionId, StatusEntry>,
}

impl StatusCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the latest status for a connection, stamping it with the
    /// current time.
    pub fn upsert(&self, id: ConnectionId, status: AircraftStatus) {
        self.entries.insert(id, StatusEntry::now(status));
    }

    /// Point-in-time copy of every entry, ordered by connection id.
    ///
    /// The copy owns its data, so callers iterate and do I/O without
    /// holding any shard lock.
    pub fn snapshot(&self) -> Vec<(ConnectionId, StatusEntry)> {
        let mut copy: Vec<(ConnectionId, StatusEntry)> = self
            .entries
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        copy.sort_by_key(|(id, _)| *id);
        copy
    }

    /// Latest entry for one connection.
    pub fn get(&self, id: ConnectionId) -> Option<StatusEntry> {
        self.entries.get(&id).map(|entry| entry.value().clone())
    }

    /// Drop the entry for a connection, returning it.
    pub fn remove(&self, id: ConnectionId) -> Option<StatusEntry> {
        self.entries.remove(&id).map(|(_, entry)| entry)
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
