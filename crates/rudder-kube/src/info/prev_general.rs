//! Decisions for general resources of the previous release
//!
//! These are never applied again, so only the live object is retrieved.
//! The only question is whether the new release still wants the object.

use std::collections::HashSet;

use rudder_core::{DeployType, GeneralResource, RemoteResource, ResourceIdentity};

use super::{observe_live, should_delete_previous};
use crate::client::ClusterClient;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct PrevGeneralResourceInfo {
    resource: GeneralResource,
    live: Option<RemoteResource>,
}

#[tracing::instrument(skip_all, fields(resource = %resource.identity()))]
pub async fn build_prev_general_resource_info(
    client: &ClusterClient,
    resource: GeneralResource,
) -> Result<PrevGeneralResourceInfo> {
    let live = observe_live(client, resource.identity()).await?;
    Ok(PrevGeneralResourceInfo { resource, live })
}

impl PrevGeneralResourceInfo {
    pub fn identity(&self) -> &ResourceIdentity {
        self.resource.identity()
    }

    pub fn resource(&self) -> &GeneralResource {
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

    /// Whether the object should go away after this operation
    ///
    /// True when it exists, is not kept, and either the release is being
    /// uninstalled or the new release no longer carries this exact object.
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeCluster;
    use rudder_core::ResourceSpec;
    use serde_json::json;
    use std::sync::Arc;

    fn cm(name: &str) -> GeneralResource {
        let object = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": name, "namespace": "app" },
        });
        GeneralResource::new(ResourceSpec::new(object, "templates/cm.yaml", "app").unwrap())
    }

    #[tokio::test]
    async fn test_dropped_resource_is_deleted() {
        let old = cm("old");
        let fake = FakeCluster::new().with_object(old.identity(), old.object().clone());
        let client = ClusterClient::new(Arc::new(fake.clone()));

        let info = build_prev_general_resource_info(&client, old).await.unwrap();

        assert!(info.exists());
        assert!(info.should_delete(&HashSet::new(), DeployType::Upgrade, "app"));
        assert_eq!(fake.operation_counts().dry_run_applies, 0);
    }

    #[tokio::test]
    async fn test_carried_over_resource_is_kept() {
        let old = cm("same");
        let fake = FakeCluster::new().with_object(old.identity(), old.object().clone());
        let client = ClusterClient::new(Arc::new(fake));

        let info = build_prev_general_resource_info(&client, old).await.unwrap();
        let uids: HashSet<String> = info.live_uid().map(str::to_string).into_iter().collect();

        assert!(!info.should_delete(&uids, DeployType::Upgrade, "app"));
        assert!(info.should_delete(&uids, DeployType::Uninstall, "app"));
    }

    #[tokio::test]
    async fn test_absent_resource_is_not_deleted() {
        let client = ClusterClient::new(Arc::new(FakeCluster::new()));
        let info = build_prev_general_resource_info(&client, cm("gone")).await.unwrap();

        assert!(!info.exists());
        assert!(!info.should_delete(&HashSet::new(), DeployType::Uninstall, "app"));
    }
}
