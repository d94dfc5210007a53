//! Decisions for the release namespace

use rudder_core::{ReleaseNamespace, RemoteResource, ResourceIdentity};

use super::{Observation, Policy, UpToDateStatus, observe};
use crate::client::ClusterClient;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct ReleaseNamespaceInfo {
    resource: ReleaseNamespace,
    observed: Observation,
}

const POLICY: Policy = Policy {
    recreate: false,
    delete_on_succeeded: false,
    delete_on_failed: false,
    keep_on_delete: true,
    replicas_on_creation: None,
    never_tracked: false,
};

/// Build the info of the namespace a release is deployed into
#[tracing::instrument(skip_all, fields(resource = %resource.identity()))]
pub async fn build_release_namespace_info(
    client: &ClusterClient,
    resource: ReleaseNamespace,
) -> Result<ReleaseNamespaceInfo> {
    let observed = observe(client, resource.spec(), POLICY.recreate).await?;
    Ok(ReleaseNamespaceInfo { resource, observed })
}

impl ReleaseNamespaceInfo {
    pub fn identity(&self) -> &ResourceIdentity {
        self.resource.identity()
    }

    pub fn resource(&self) -> &ReleaseNamespace {
        &self.resource
    }

    pub fn live(&self) -> Option<&RemoteResource> {
        self.observed.live.as_ref()
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

    pub fn should_update(&self) -> bool {
        self.observed.should_update(&POLICY)
    }

    pub fn should_apply(&self) -> bool {
        self.observed.should_apply(&POLICY)
    }

    pub fn should_track_readiness(&self) -> bool {
        self.observed.should_track_readiness(&POLICY, false)
    }

    pub fn live_uid(&self) -> Option<&str> {
        self.observed.live_uid()
    }
}
