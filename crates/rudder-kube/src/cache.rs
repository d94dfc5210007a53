//! Cluster cache and per-resource lock registry
//!
//! Both structures are shared by every worker of a reconciliation pass and
//! are safe to use concurrently without external synchronization.
//!
//! The cache remembers the last thing the cluster told us about an object,
//! success or failure, keyed by [`ResourceIdentity::id_with_version`]. It never
//! expires during a pass; entries go away only on explicit eviction. Evicting
//! an object drops the entries of all its API versions.
//!
//! The lock registry hands out one async mutex per
//! [`ResourceIdentity::id`], created lazily and kept for the process
//! lifetime. Different identities never contend.

use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};

use rudder_core::ResourceIdentity;

use crate::error::CachedError;

/// What the cluster last returned for an object
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry {
    Object(Value),
    Error(CachedError),
}

/// Process-lifetime cache of retrieved objects and errors
#[derive(Debug, Default)]
pub struct ClusterCache {
    entries: DashMap<String, CacheEntry>,
}

impl ClusterCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    pub fn set(&self, key: impl Into<String>, entry: CacheEntry) {
        self.entries.insert(key.into(), entry);
    }

    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop the entries of every API version of this object
    pub fn delete_all_versions(&self, identity: &ResourceIdentity) {
        self.entries.retain(|key, _| !same_object(key, identity));
    }

    /// Drop cached "no such kind" failures, once new kinds may be served
    pub fn evict_unknown_kinds(&self) {
        self.entries
            .retain(|_, entry| !matches!(entry, CacheEntry::Error(CachedError::NoSuchKind { .. })));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// Keys are `namespace:group:version:kind:name`; no part may contain a colon
fn same_object(key: &str, identity: &ResourceIdentity) -> bool {
    let parts: Vec<&str> = key.split(':').collect();
    parts.len() == 5
        && parts[0] == identity.namespace().unwrap_or("")
        && parts[1] == identity.group()
        && parts[3] == identity.kind()
        && parts[4] == identity.name()
}

/// Lazily created mutex per resource identity
#[derive(Debug, Default)]
pub struct LockRegistry {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex guarding this identity, shared by every caller
    pub fn lock_for(&self, identity: &ResourceIdentity) -> Arc<Mutex<()>> {
        self.locks
            .entry(identity.id())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the identity's mutex; released when the guard drops
    pub async fn acquire(&self, identity: &ResourceIdentity) -> OwnedMutexGuard<()> {
        self.lock_for(identity).lock_owned().await
    }
}
