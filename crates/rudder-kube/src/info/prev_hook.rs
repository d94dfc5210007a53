//! Decisions for hooks of the previous release

use std::collections::HashSet;

use rudder_core::{DeployType, HookResource, RemoteResource, ResourceIdentity};

use super::{observe_live, should_delete_previous};
use crate::client::ClusterClient;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct PrevHookResourceInfo {
    resource: HookResource,
    live: Option<RemoteResource>,
}

#[tracing::instrument(skip_all, fields(resource = %resource.identity()))]
pub async fn build_prev_hook_resource_info(
    client: &ClusterClient,
    resource: HookResource,
) -> Result<PrevHookResourceInfo> {
    let live = observe_live(client, resource.identity()).await?;
    Ok(PrevHookResourceInfo { resource, live })
}

impl PrevHookResourceInfo {
    pub fn identity(&self) -> &ResourceIdentity {
        self.resource.identity()
    }

    pub fn resource(&self) -> &HookResource {
        &self.resource
    }

    pub fn live(&self) -> Option<&RemoteResource> {
        self.live.as_ref()
    }

    pub fn exists(&self) -> bool {
        self.live.is_some()
    }

    pub fn should_keep_on_delete(&self, release_namespace: &str) -> bool {
        self.resource.keep_on_delete()
            || self
                .live
                .as_ref()
                .is_some_and(|live| live.keep_on_delete(release_namespace))
    }

    pub fn should_delete(
        &self,
        current_release_uids: &HashSet<String>,
        deploy_type: DeployType,
        release_namespace: &str,
    ) -> bool {
        should_delete_previous(
            self.live.as_ref(),
            self.resource.keep_on_delete(),
            release_namespace,
            current_release_uids,
            deploy_type,
        )
    }

    pub fn live_uid(&self) -> Option<&str> {
        self.live.as_ref().and_then(RemoteResource::uid)
    }
}
