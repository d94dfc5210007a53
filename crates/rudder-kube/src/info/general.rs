//! Decisions for the steady-state resources of a release

use rudder_core::{GeneralResource, RemoteResource, ResourceIdentity};

use super::{Observation, Policy, UpToDateStatus, observe};
use crate::client::ClusterClient;
use crate::error::Result;

/// A general resource together with what the cluster has for it
#[derive(Debug, Clone)]
pub struct GeneralResourceInfo {
    resource: GeneralResource,
    policy: Policy,
    observed: Observation,
}

#[tracing::instrument(skip_all, fields(resource = %resource.identity()))]
pub async fn build_general_resource_info(
    client: &ClusterClient,
    resource: GeneralResource,
) -> Result<GeneralResourceInfo> {
    let policy = policy_of(&resource);
    let observed = observe(client, resource.spec(), policy.recreate).await?;
    Ok(GeneralResourceInfo {
        resource,
        policy,
        observed,
    })
}

fn policy_of(resource: &GeneralResource) -> Policy {
    Policy {
        recreate: resource.recreate(),
        delete_on_succeeded: resource.delete_on_succeeded(),
        delete_on_failed: resource.delete_on_failed(),
        keep_on_delete: resource.keep_on_delete(),
        replicas_on_creation: resource.default_replicas_on_creation(),
        never_tracked: Policy::never_tracked(resource.identity(), resource.track_termination_mode()),
    }
}

impl GeneralResourceInfo {
    pub fn identity(&self) -> &ResourceIdentity {
        self.resource.identity()
    }

    pub fn resource(&self) -> &GeneralResource {
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

    /// Replica override to send with the create, if any
    pub fn force_replicas(&self) -> Option<i32> {
        self.observed.force_replicas(&self.policy)
    }

    pub fn live_uid(&self) -> Option<&str> {
        self.observed.live_uid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KubeError;
    use crate::fake::{FakeCluster, FakeFailure};
    use rudder_core::ResourceSpec;
    use serde_json::{Value, json};
    use std::sync::Arc;

    fn deployment(replicas: i64, annotations: Value) -> Value {
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "web", "namespace": "app", "annotations": annotations },
            "spec": { "replicas": replicas }
        })
    }

    fn resource(object: Value) -> GeneralResource {
        GeneralResource::new(ResourceSpec::new(object, "templates/web.yaml", "app").unwrap())
    }

    fn id() -> ResourceIdentity {
        ResourceIdentity::new("apps", "v1", "Deployment", Some("app".into()), "web")
    }

    fn client(fake: &FakeCluster) -> ClusterClient {
        ClusterClient::new(Arc::new(fake.clone()))
    }

    #[tokio::test]
    async fn test_absent_resource_should_be_created() {
        let fake = FakeCluster::new();
        let info = build_general_resource_info(&client(&fake), resource(deployment(2, json!({}))))
            .await
            .unwrap();

        assert!(!info.exists());
        assert!(info.should_create());
        assert!(!info.should_recreate() && !info.should_update() && !info.should_apply());
        assert!(info.live_uid().is_none());
        assert_eq!(fake.operation_counts().dry_run_applies, 0);
    }

    #[tokio::test]
    async fn test_unknown_kind_should_be_created() {
        let fake = FakeCluster::new().with_unknown_kind("example.com/v1", "Widget");
        let widget = json!({
            "apiVersion": "example.com/v1",
            "kind": "Widget",
            "metadata": { "name": "w", "namespace": "app" },
            "spec": { "size": 3 }
        });
        let info = build_general_resource_info(&client(&fake), resource(widget))
            .await
            .unwrap();

        assert!(!info.exists());
        assert!(info.should_create());
        assert!(info.dry_run().is_none());
        assert!(info.dry_run_error().is_none());
        assert_eq!(fake.operation_counts().dry_run_applies, 0);
    }

    #[tokio::test]
    async fn test_identical_resource_is_up_to_date() {
        let fake = FakeCluster::new().with_object(&id(), deployment(2, json!({})));
        let info = build_general_resource_info(&client(&fake), resource(deployment(2, json!({}))))
            .await
            .unwrap();

        assert!(info.exists());
        assert_eq!(info.up_to_date(), UpToDateStatus::Yes);
        assert!(!info.should_create() && !info.should_recreate());
        assert!(!info.should_update() && !info.should_apply());
        assert!(!info.should_cleanup("app"));
        assert_eq!(info.live_uid(), Some("uid-1"));
    }

    #[tokio::test]
    async fn test_up_to_date_with_cleanup_policy() {
        let annotations = json!({ "rudder.io/delete-policy": "succeeded" });
        let fake = FakeCluster::new().with_object(&id(), deployment(2, annotations.clone()));
        let info = build_general_resource_info(&client(&fake), resource(deployment(2, annotations)))
            .await
            .unwrap();

        assert_eq!(info.up_to_date(), UpToDateStatus::Yes);
        assert!(info.should_cleanup("app"));
    }

    #[tokio::test]
    async fn test_malformed_ledger_error_names_resource() {
        let mut live = deployment(2, json!({}));
        live["metadata"]["managedFields"] = json!([{
            "manager": "someone",
            "operation": "Update",
            "fieldsType": "FieldsV1",
            "fieldsV1": { "f:spec": "not-a-fieldset" }
        }]);
        let fake = FakeCluster::new().with_object(&id(), live);

        let err = build_general_resource_info(&client(&fake), resource(deployment(2, json!({}))))
            .await
            .unwrap_err();

        assert!(matches!(err, KubeError::Resource { .. }), "{:?}", err);
        let msg = err.to_string();
        assert!(msg.contains("app:Deployment/web"), "{}", msg);
        assert!(msg.contains("managed fields"), "{}", msg);
    }

    #[tokio::test]
    async fn test_changed_resource_should_be_updated() {
        let fake = FakeCluster::new().with_object(&id(), deployment(2, json!({})));
        let info = build_general_resource_info(&client(&fake), resource(deployment(5, json!({}))))
            .await
            .unwrap();

        assert_eq!(info.up_to_date(), UpToDateStatus::No);
        assert!(info.should_update());
        assert!(info.dry_run().is_some());
    }

    #[tokio::test]
    async fn test_immutable_with_recreate_is_swallowed() {
        let annotations = json!({ "rudder.io/delete-policy": "before-creation" });
        let fake = FakeCluster::new()
            .with_object(&id(), deployment(2, annotations.clone()))
            .with_apply_failure(&id(), FakeFailure::Immutable);

        let info = build_general_resource_info(&client(&fake), resource(deployment(2, annotations)))
            .await
            .unwrap();

        assert!(info.should_recreate());
        assert!(!info.should_update() && !info.should_apply() && !info.should_create());
        assert!(info.dry_run_error().is_some());
    }

    #[tokio::test]
    async fn test_immutable_without_recreate_is_fatal() {
        let fake = FakeCluster::new()
            .with_object(&id(), deployment(2, json!({})))
            .with_apply_failure(&id(), FakeFailure::Immutable);

        let err = build_general_resource_info(&client(&fake), resource(deployment(2, json!({}))))
            .await
            .unwrap_err();
        assert!(err.is_immutable());
    }

    #[tokio::test]
    async fn test_transient_dry_run_failure_is_unknown() {
        let fake = FakeCluster::new()
            .with_object(&id(), deployment(2, json!({})))
            .with_apply_failure(&id(), FakeFailure::Transient);

        let info = build_general_resource_info(&client(&fake), resource(deployment(2, json!({}))))
            .await
            .unwrap();

        assert_eq!(info.up_to_date(), UpToDateStatus::Unknown);
        assert!(info.should_apply());
        assert!(!info.should_update());
    }

    #[tokio::test]
    async fn test_live_keep_annotation() {
        let fake = FakeCluster::new().with_object(
            &id(),
            deployment(2, json!({ "helm.sh/resource-policy": "keep" })),
        );
        let info = build_general_resource_info(&client(&fake), resource(deployment(2, json!({}))))
            .await
            .unwrap();

        assert!(info.should_keep_on_delete("app"));
    }

    #[tokio::test]
    async fn test_force_replicas_on_create() {
        let fake = FakeCluster::new();
        let info = build_general_resource_info(
            &client(&fake),
            resource(deployment(1, json!({ "rudder.io/replicas-on-creation": "3" }))),
        )
        .await
        .unwrap();

        assert_eq!(info.force_replicas(), Some(3));
    }

    #[tokio::test]
    async fn test_legacy_ledger_fixed_before_dry_run() {
        let mut live = deployment(2, json!({}));
        live["metadata"]["managedFields"] = json!([
            {
                "manager": "rudder",
                "operation": "Update",
                "fieldsType": "FieldsV1",
                "fieldsV1": { "f:spec": { "f:replicas": {} } }
            },
            {
                "manager": "kubectl-edit",
                "operation": "Update",
                "fieldsType": "FieldsV1",
                "fieldsV1": { "f:spec": { "f:replicas": {} } }
            }
        ]);
        let fake = FakeCluster::new().with_object(&id(), live);
        let client = client(&fake);

        let info = build_general_resource_info(&client, resource(deployment(2, json!({}))))
            .await
            .unwrap();

        assert_eq!(fake.operation_counts().merge_patches, 1);
        let ledger = info.live().unwrap().managed_fields().unwrap().as_array().unwrap().clone();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0]["manager"], "rudder");
        assert_eq!(ledger[0]["operation"], "Apply");

        // A second pass finds nothing to fix
        let again = ClusterClient::new(Arc::new(fake.clone()));
        build_general_resource_info(&again, resource(deployment(2, json!({}))))
            .await
            .unwrap();
        assert_eq!(fake.operation_counts().merge_patches, 1);
    }
}
