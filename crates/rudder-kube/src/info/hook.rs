//! Decisions for hook resources

use rudder_core::{HookResource, RemoteResource, ResourceIdentity};

use super::{Observation, Policy, UpToDateStatus, observe};
use crate::client::ClusterClient;
use crate::error::Result;

/// A hook together with what the cluster has for it
///
/// Hooks recreate by default: unless a delete policy says otherwise, an
/// existing hook object is deleted and created again on every run.
#[derive(Debug, Clone)]
pub struct HookResourceInfo {
    resource: HookResource,
    policy: Policy,
    observed: Observation,
}

#[tracing::instrument(skip_all, fields(resource = %resource.identity()))]
pub async fn build_hook_resource_info(client: &ClusterClient, resource: HookResource) -> Result<HookResourceInfo> {
    let policy = Policy {
        recreate: resource.recreate(),
        delete_on_succeeded: resource.delete_on_succeeded(),
        delete_on_failed: resource.delete_on_failed(),
        keep_on_delete: resource.keep_on_delete(),
        replicas_on_creation: resource.default_replicas_on_creation(),
        never_tracked: Policy::never_tracked(resource.identity(), resource.track_termination_mode()),
    };
    let observed = observe(client, resource.spec(), policy.recreate).await?;

    Ok(HookResourceInfo {
        resource,
        policy,
        observed,
    })
}

impl HookResourceInfo {
    pub fn identity(&self) -> &ResourceIdentity {
        self.resource.identity()
    }

    pub fn resource(&self) -> &HookResource {
        &self.resource
    }

    pub fn live(&self) -> Option<&RemoteResource> {
        self.observed.live.as_ref()
    }

    pub fn dry_run(&self) -> Option<&RemoteResource> {
        self.observed.dry_run.as_ref()
    }

    pub fn dry_run_error(&self) -> Option<&str> {
        self.observed.dry_run_error.as_deref()
    }

    pub fn exists(&self) -> bool {
        self.observed.exists()
    }

    pub fn up_to_date(&self) -> UpToDateStatus {
        self.observed.up_to_date
    }

    pub fn should_create(&self) -> bool {
        self.observed.should_create()
    }

    pub fn should_recreate(&self) -> bool {
        self.observed.should_recreate(&self.policy)
    }

    pub fn should_update(&self) -> bool {
        self.observed.should_update(&self.policy)
    }

    pub fn should_apply(&self) -> bool {
        self.observed.should_apply(&self.policy)
    }

    pub fn should_cleanup(&self, release_namespace: &str) -> bool {
        self.observed.should_cleanup(&self.policy, release_namespace)
    }

    pub fn should_cleanup_on_failed(&self, prev_release_failed: bool, release_namespace: &str) -> bool {
        self.observed
            .should_cleanup_on_failed(&self.policy, prev_release_failed, release_namespace)
    }

    pub fn should_keep_on_delete(&self, release_namespace: &str) -> bool {
        self.observed.should_keep_on_delete(&self.policy, release_namespace)
    }

    pub fn should_track_readiness(&self, prev_release_failed: bool) -> bool {
        self.observed.should_track_readiness(&self.policy, prev_release_failed)
    }

    pub fn force_replicas(&self) -> Option<i32> {
        self.observed.force_replicas(&self.policy)
    }

    pub fn live_uid(&self) -> Option<&str> {
        self.observed.live_uid()
    }
}
