//! Thread-safe client-to-target bindings using DashMap.

use std::sync::Arc;

use dashmap::DashMap;

use super::BackendTarget;

/// Client identity as seen by the proxy: the remote IP of the connection.
///
/// Clients sharing a NAT or an upstream proxy share one identity.
pub type ClientId = String;

/// Shared table of client bindings.
///
/// Uses `DashMap` so that binds and lookups lock only the shard holding
/// the client, and a binding is swapped as a whole `Arc`. Bindings are
/// last-write-wins and never expire, so the table grows with the number
/// of distinct clients seen over the process lifetime.
pub struct AffinityTable {
    bindings: DashMap<ClientId, Arc<BackendTarget>>,
}

impl AffinityTable {
    /// Creates a new empty table.
    pub fn new() -> Self {
        Self {
            bindings: DashMap::new(),
        }
    }

    /// Binds a client to a target, replacing any previous binding.
    ///
    /// Returns the previous target, if there was one.
    pub fn bind(&self, client: &str, target: Arc<BackendTarget>) -> Option<Arc<BackendTarget>> {
        self.bindings.insert(client.to_string(), target)
    }

    /// Returns the target a client is currently bound to.
    pub fn lookup(&self, client: &str) -> Option<Arc<BackendTarget>> {
        self.bindings.get(client).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the number of bound clients.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }
}

impl Default for AffinityTable {
    fn default() -> Self {
        Self::new()
    }
}
