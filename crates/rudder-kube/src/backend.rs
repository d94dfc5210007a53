//! Raw cluster access
//!
//! [`ClusterBackend`] is the seam between the cluster client (which owns
//! caching, locking and error policy) and the transport. [`KubeBackend`]
//! talks to a real API server through kube-rs; tests use
//! [`crate::fake::FakeCluster`].

use std::sync::Arc;

use async_trait::async_trait;
use kube::{
    Client,
    api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PropagationPolicy},
};
use serde_json::Value;

use rudder_core::ResourceIdentity;

use crate::error::{KubeError, Result, classify_api_error};
use crate::mapper::{ClusterMapper, DiscoveryMapper};

/// Field manager name for Server-Side Apply
pub const FIELD_MANAGER: &str = "rudder";

/// Transport-level operations on single objects
///
/// Implementations classify failures (NotFound, NoSuchKind, Immutable) but
/// never cache.
#[async_trait]
pub trait ClusterBackend: Send + Sync {
    async fn get(&self, identity: &ResourceIdentity) -> Result<Value>;

    /// Server-side apply with [`FIELD_MANAGER`] and `force=true`
    async fn apply(&self, identity: &ResourceIdentity, object: &Value, dry_run: bool) -> Result<Value>;

    /// JSON merge patch with [`FIELD_MANAGER`]
    async fn merge_patch(&self, identity: &ResourceIdentity, patch: &Value) -> Result<Value>;

    async fn delete(&self, identity: &ResourceIdentity, propagation: PropagationPolicy) -> Result<()>;

    /// Invalidate kind mappings after the set of known kinds changed
    fn reset_mapper(&self);
}

/// Backend talking to a real API server
pub struct KubeBackend {
    client: Client,
    mapper: Arc<DiscoveryMapper>,
}

impl KubeBackend {
    pub fn new(client: Client, mapper: Arc<DiscoveryMapper>) -> Self {
        Self { client, mapper }
    }

    async fn api(&self, identity: &ResourceIdentity) -> Result<Api<DynamicObject>> {
        let resolved = self.mapper.resolve(identity).await?;

        if resolved.namespaced {
            let ns = identity.namespace().unwrap_or("default");
            Ok(Api::namespaced_with(self.client.clone(), ns, &resolved.api_resource))
        } else {
            Ok(Api::all_with(self.client.clone(), &resolved.api_resource))
        }
    }
}

fn to_value(obj: DynamicObject) -> Result<Value> {
    Ok(serde_json::to_value(obj)?)
}

#[async_trait]
impl ClusterBackend for KubeBackend {
    async fn get(&self, identity: &ResourceIdentity) -> Result<Value> {
        let api = self.api(identity).await?;
        let obj = api
            .get(identity.name())
            .await
            .map_err(|e| classify_api_error(e, "get", &identity.human_id()))?;
        to_value(obj)
    }

    async fn apply(&self, identity: &ResourceIdentity, object: &Value, dry_run: bool) -> Result<Value> {
        let api = self.api(identity).await?;

        let mut params = PatchParams::apply(FIELD_MANAGER);
        params.force = true;
        params.dry_run = dry_run;

        let operation = if dry_run { "dry-run apply" } else { "apply" };
        let obj = api
            .patch(identity.name(), &params, &Patch::Apply(object))
            .await
            .map_err(|e| classify_api_error(e, operation, &identity.human_id()))?;
        to_value(obj)
    }

    async fn merge_patch(&self, identity: &ResourceIdentity, patch: &Value) -> Result<Value> {
        let api = self.api(identity).await?;

        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };

        let obj = api
            .patch(identity.name(), &params, &Patch::Merge(patch))
            .await
            .map_err(|e| classify_api_error(e, "merge patch", &identity.human_id()))?;
        to_value(obj)
    }

    async fn delete(&self, identity: &ResourceIdentity, propagation: PropagationPolicy) -> Result<()> {
        let api = self.api(identity).await?;

        let params = DeleteParams {
            propagation_policy: Some(propagation),
            ..Default::default()
        };

        api.delete(identity.name(), &params)
            .await
            .map(|_| ())
            .map_err(|e| classify_api_error(e, "delete", &identity.human_id()))
    }

    fn reset_mapper(&self) {
        self.mapper.reset();
    }
}

/// Convert a kube error without taxonomy context (used by the factory)
pub(crate) fn connect_error(source: kube::Error) -> KubeError {
    KubeError::Api {
        operation: "connect",
        resource: "cluster".to_string(),
        source,
    }
}
