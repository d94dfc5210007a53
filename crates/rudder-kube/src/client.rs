//! Cluster client with request caching and per-resource serialization
//!
//! Every operation takes the resource's lock from the [`LockRegistry`] before
//! touching the backend or the cache, and releases it on every exit path
//! (the guard is dropped on return, error or panic). Two workers touching
//! the same object therefore never interleave a get with an apply.
//!
//! Caching rules:
//! - `get` with `try_cache` replays whatever was stored, errors included
//! - real creates and applies store their outcome; dry runs never touch the cache
//! - merge patches store their outcome, except a not-found
//! - deletes evict the entries of every API version of the object
//!
//! Any real write of a `CustomResourceDefinition` resets the kind mapper and
//! forgets cached "no such kind" failures.

use std::sync::Arc;

use kube::api::PropagationPolicy;
use serde_json::Value;

use rudder_core::{RemoteResource, ResourceIdentity};

use crate::backend::ClusterBackend;
use crate::cache::{CacheEntry, ClusterCache, LockRegistry};
use crate::error::{CachedError, Result};

/// Options for [`ClusterClient::get`]
#[derive(Debug, Clone, Copy, Default)]
pub struct GetOptions {
    /// Serve from the cache when an entry exists
    pub try_cache: bool,
}

impl GetOptions {
    pub fn cached() -> Self {
        Self { try_cache: true }
    }
}

/// Options for [`ClusterClient::create`]
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOptions {
    /// Override `spec.replicas` of the created object
    pub force_replicas: Option<i32>,
}

/// Options for [`ClusterClient::apply`]
#[derive(Debug, Clone, Copy, Default)]
pub struct ApplyOptions {
    pub dry_run: bool,
}

impl ApplyOptions {
    pub fn dry_run() -> Self {
        Self { dry_run: true }
    }
}

/// Options for [`ClusterClient::delete`]
#[derive(Debug, Clone)]
pub struct DeleteOptions {
    pub propagation_policy: PropagationPolicy,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            propagation_policy: PropagationPolicy::Foreground,
        }
    }
}

/// Cached, lock-serialized access to cluster objects
pub struct ClusterClient {
    backend: Arc<dyn ClusterBackend>,
    cache: ClusterCache,
    locks: LockRegistry,
}

impl ClusterClient {
    pub fn new(backend: Arc<dyn ClusterBackend>) -> Self {
        Self {
            backend,
            cache: ClusterCache::new(),
            locks: LockRegistry::new(),
        }
    }

    pub fn cache(&self) -> &ClusterCache {
        &self.cache
    }

    /// Retrieve a live object
    pub async fn get(&self, identity: &ResourceIdentity, opts: GetOptions) -> Result<RemoteResource> {
        let _guard = self.locks.acquire(identity).await;
        let key = identity.id_with_version();

        if opts.try_cache {
            match self.cache.get(&key) {
                Some(CacheEntry::Object(obj)) => {
                    tracing::trace!(resource = %identity, "cache hit");
                    return Ok(RemoteResource::new(identity.clone(), obj));
                }
                Some(CacheEntry::Error(err)) => {
                    tracing::trace!(resource = %identity, "cached error hit");
                    return Err(err.replay());
                }
                None => {}
            }
        }

        tracing::debug!(resource = %identity, "getting resource");
        match self.backend.get(identity).await {
            Ok(obj) => {
                self.cache.set(key, CacheEntry::Object(obj.clone()));
                Ok(RemoteResource::new(identity.clone(), obj))
            }
            Err(err) => {
                self.cache.set(
                    key,
                    CacheEntry::Error(CachedError::from_error(&err, "get", &identity.human_id())),
                );
                Err(err)
            }
        }
    }

    /// Create an object with server-side apply
    pub async fn create(
        &self,
        identity: &ResourceIdentity,
        object: &Value,
        opts: CreateOptions,
    ) -> Result<RemoteResource> {
        let _guard = self.locks.acquire(identity).await;

        let object = match opts.force_replicas {
            Some(replicas) => with_replicas(object, replicas),
            None => object.clone(),
        };

        tracing::debug!(resource = %identity, "creating resource");
        let result = self.backend.apply(identity, &object, false).await;
        self.store_write_outcome(identity, "create", &result);

        result.map(|obj| RemoteResource::new(identity.clone(), obj))
    }

    /// Server-side apply an object, optionally as a dry run
    pub async fn apply(
        &self,
        identity: &ResourceIdentity,
        object: &Value,
        opts: ApplyOptions,
    ) -> Result<RemoteResource> {
        let _guard = self.locks.acquire(identity).await;

        if opts.dry_run {
            tracing::debug!(resource = %identity, "dry-run applying resource");
            return self
                .backend
                .apply(identity, object, true)
                .await
                .map(|obj| RemoteResource::new(identity.clone(), obj));
        }

        tracing::debug!(resource = %identity, "applying resource");
        let result = self.backend.apply(identity, object, false).await;
        self.store_write_outcome(identity, "apply", &result);

        result.map(|obj| RemoteResource::new(identity.clone(), obj))
    }

    /// JSON merge patch an object
    pub async fn merge_patch(&self, identity: &ResourceIdentity, patch: &Value) -> Result<RemoteResource> {
        let _guard = self.locks.acquire(identity).await;
        let key = identity.id_with_version();

        tracing::debug!(resource = %identity, "merge patching resource");
        match self.backend.merge_patch(identity, patch).await {
            Ok(obj) => {
                self.cache.set(key, CacheEntry::Object(obj.clone()));
                Ok(RemoteResource::new(identity.clone(), obj))
            }
            Err(err) if err.is_not_found() => Err(err),
            Err(err) => {
                self.cache.set(
                    key,
                    CacheEntry::Error(CachedError::from_error(
                        &err,
                        "merge patch",
                        &identity.human_id(),
                    )),
                );
                Err(err)
            }
        }
    }

    /// Delete an object; deleting something already gone succeeds
    pub async fn delete(&self, identity: &ResourceIdentity, opts: DeleteOptions) -> Result<()> {
        let _guard = self.locks.acquire(identity).await;

        tracing::debug!(resource = %identity, "deleting resource");
        match self.backend.delete(identity, opts.propagation_policy).await {
            Ok(()) => {}
            Err(err) if err.is_not_found() => {
                tracing::debug!(resource = %identity, "resource already gone");
            }
            Err(err) => return Err(err),
        }

        self.cache.delete_all_versions(identity);
        Ok(())
    }

    fn store_write_outcome(
        &self,
        identity: &ResourceIdentity,
        operation: &'static str,
        result: &Result<Value>,
    ) {
        let key = identity.id_with_version();
        match result {
            Ok(obj) => {
                self.cache.set(key, CacheEntry::Object(obj.clone()));
                if identity.is_crd() {
                    self.backend.reset_mapper();
                    self.cache.evict_unknown_kinds();
                }
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                self.cache.set(
                    key,
                    CacheEntry::Error(CachedError::from_error(err, operation, &identity.human_id())),
                );
            }
        }
    }
}

fn with_replicas(object: &Value, replicas: i32) -> Value {
    let mut object = object.clone();
    if let Some(root) = object.as_object_mut() {
        let spec = root
            .entry("spec")
            .or_insert_with(|| Value::Object(Default::default()));
        if let Some(spec) = spec.as_object_mut() {
            spec.insert("replicas".to_string(), Value::from(replicas));
        }
    }
    object
}
