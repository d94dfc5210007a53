//! Decisions for standalone CRDs
//!
//! CRDs are created or updated in place, never recreated and never cleaned
//! up by a release: deleting a CRD deletes every custom resource of its kind.

use rudder_core::{RemoteResource, ResourceIdentity, StandaloneCrd};

use super::{Observation, Policy, UpToDateStatus, observe};
use crate::client::ClusterClient;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct StandaloneCrdInfo {
    resource: StandaloneCrd,
    observed: Observation,
}

const POLICY: Policy = Policy {
    recreate: false,
    delete_on_succeeded: false,
    delete_on_failed: false,
    keep_on_delete: true,
    replicas_on_creation: None,
    never_tracked: true,
};

#[tracing::instrument(skip_all, fields(resource = %resource.identity()))]
pub async fn build_standalone_crd_info(client: &ClusterClient, resource: StandaloneCrd) -> Result<StandaloneCrdInfo> {
    let observed = observe(client, resource.spec(), POLICY.recreate).await?;
    Ok(StandaloneCrdInfo { resource, observed })
}

impl StandaloneCrdInfo {
    pub fn identity(&self) -> &ResourceIdentity {
        self.resource.identity()
    }

    pub fn resource(&self) -> &StandaloneCrd {
        &self.resource
    }

    pub fn live(&self) -> Option<&RemoteResource> {
        self.observed.live.as_ref()
    }

    pub fn dry_run(&self) -> Option<&RemoteResource> {
        self.observed.dry_run.as_ref()
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

    pub fn live_uid(&self) -> Option<&str> {
        self.observed.live_uid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeCluster;
    use rudder_core::ResourceSpec;
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn crd(versions: Value) -> StandaloneCrd {
        let object = json!({
            "apiVersion": "apiextensions.k8s.io/v1",
            "kind": "CustomResourceDefinition",
            "metadata": { "name": "widgets.example.com" },
            "spec": { "group": "example.com", "scope": "Namespaced", "versions": versions }
        });
        StandaloneCrd::new(ResourceSpec::new(object, "crds/widgets.yaml", "app").unwrap())
    }

    #[tokio::test]
    async fn test_crd_is_cluster_scoped_and_created() {
        let client = ClusterClient::new(Arc::new(FakeCluster::new()));
        let info = build_standalone_crd_info(&client, crd(json!([{ "name": "v1" }])))
            .await
            .unwrap();

        assert!(info.identity().namespace().is_none());
        assert!(info.should_create());
        assert!(!info.should_update() && !info.should_apply());
    }

    #[tokio::test]
    async fn test_new_version_is_an_update() {
        let old = crd(json!([{ "name": "v1" }]));
        let fake = FakeCluster::new().with_object(old.identity(), old.object().clone());
        let client = ClusterClient::new(Arc::new(fake));

        let info = build_standalone_crd_info(&client, crd(json!([{ "name": "v1" }, { "name": "v2" }])))
            .await
            .unwrap();

        assert_eq!(info.up_to_date(), UpToDateStatus::No);
        assert!(info.should_update());
    }
}
