//! Connection registry
//!
//! Tracks every connection between accept and cleanup using DashMap for
//! thread-safe access.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use wsession_core::Connection;

/// Identity -> connection map
///
/// Snapshots are returned in accept order.
pub struct ConnectionRegistry {
    connections: DashMap<String, Arc<Connection>>,
    sequence: AtomicU64,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Sequence number for the next accepted connection
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Insert a connection. Returns false if its identity is already taken.
    pub fn register(&self, connection: Arc<Connection>) -> bool {
        match self.connections.entry(connection.id().to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                tracing::debug!(connection_id = %connection.id(), "Connection registered");
                slot.insert(connection);
                true
            }
        }
    }

    /// Remove a connection if present
    pub fn remove(&self, id: &str) -> Option<Arc<Connection>> {
        let removed = self.connections.remove(id).map(|(_, conn)| conn);
        if removed.is_some() {
            tracing::debug!(connection_id = %id, "Connection removed");
        }
        removed
    }

    pub fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|r| r.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }

    /// Registered entries, open or not
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Entries whose transport is open
    pub fn connected_count(&self) -> usize {
        self.connections.iter().filter(|r| r.is_connected()).count()
    }

    /// Identities of open entries, in accept order
    pub fn connected_ids(&self) -> Vec<String> {
        self.connected_snapshot()
            .iter()
            .map(|conn| conn.id().to_string())
            .collect()
    }

    /// Open entries, in accept order
    pub fn connected_snapshot(&self) -> Vec<Arc<Connection>> {
        let mut connections: Vec<_> = self
            .connections
            .iter()
            .filter(|r| r.is_connected())
            .map(|r| r.clone())
            .collect();
        connections.sort_by_key(|conn| conn.sequence());
        connections
    }

    /// All entries, in accept order
    pub fn list_all(&self) -> Vec<Arc<Connection>> {
        let mut connections: Vec<_> = self.connections.iter().map(|r| r.clone()).collect();
        connections.sort_by_key(|conn| conn.sequence());
        connections
    }

    /// Remove and return every entry
    pub fn drain(&self) -> Vec<Arc<Connection>> {
        let ids: Vec<String> = self.connections.iter().map(|r| r.key().clone()).collect();
        let mut drained: Vec<_> = ids.iter().filter_map(|id| self.remove(id)).collect();
        drained.sort_by_key(|conn| conn.sequence());
        drained
    }

    pub fn clear(&self) {
        self.connections.clear();
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.connections.len())
            .finish()
    }
}
