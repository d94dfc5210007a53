//! Desired resources of a release
//!
//! A rendered manifest is split into four categories, each wrapping a
//! [`ResourceSpec`]:
//!
//! - [`HookResource`]: tied to a release phase (`pre-install`, `post-upgrade`, ...)
//! - [`GeneralResource`]: the steady-state resource set
//! - [`StandaloneCrd`]: CRDs installed before anything else
//! - [`ReleaseNamespace`]: the namespace the release lives in
//!
//! Policy accessors are lenient: a malformed annotation yields the default.
//! Call `validate()` to surface malformed annotations as errors.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::annotations::{
    self, DeletePolicy, ResourceRef, TrackTerminationMode, get_annotation, helm, rudder,
};
use crate::error::{CoreError, Result};
use crate::identity::ResourceIdentity;
use crate::phase::{DeployType, HookPhase};

/// A desired object together with its identity and provenance
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSpec {
    identity: ResourceIdentity,
    object: Value,
    file_path: String,
    annotations: BTreeMap<String, String>,
}

impl ResourceSpec {
    /// Build from a rendered manifest, deriving the identity from it
    pub fn new(object: Value, file_path: impl Into<String>, default_namespace: &str) -> Result<Self> {
        let identity = ResourceIdentity::from_object(&object, default_namespace)?;
        Ok(Self::from_parts(identity, object, file_path))
    }

    /// Build from an already known identity
    pub fn from_parts(identity: ResourceIdentity, object: Value, file_path: impl Into<String>) -> Self {
        let annotations = annotations::annotations_of(&object);
        Self {
            identity,
            object,
            file_path: file_path.into(),
            annotations,
        }
    }

    /// Same identity and provenance, different content
    pub fn with_object(&self, object: Value) -> Self {
        Self::from_parts(self.identity.clone(), object, self.file_path.clone())
    }

    pub fn identity(&self) -> &ResourceIdentity {
        &self.identity
    }

    pub fn object(&self) -> &Value {
        &self.object
    }

    pub fn into_object(self) -> Value {
        self.object
    }

    /// Template file this resource was rendered from
    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }

    fn annotation(&self, rudder_key: &'static str, helm_key: &'static str) -> Option<(&str, &str)> {
        get_annotation(&self.annotations, rudder_key, helm_key)
    }

    fn native_annotation(&self, key: &'static str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    fn invalid(&self, key: &str, value: &str, reason: String) -> CoreError {
        CoreError::annotation(self.identity.human_id(), key, value, reason)
    }

    fn keep_on_delete(&self) -> bool {
        annotations::declares_keep(&self.annotations)
    }

    fn default_replicas_on_creation(&self) -> Option<i32> {
        self.native_annotation(rudder::REPLICAS_ON_CREATION)
            .and_then(|v| annotations::parse_replicas(v).ok())
    }

    fn track_termination_mode(&self) -> TrackTerminationMode {
        self.native_annotation(rudder::TRACK_TERMINATION_MODE)
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }

    fn wait_for(&self) -> Vec<ResourceRef> {
        self.native_annotation(rudder::WAIT_FOR)
            .and_then(|v| annotations::parse_wait_for(v).ok())
            .unwrap_or_default()
    }

    /// Checks shared by every category
    fn validate_common(&self) -> Result<()> {
        if let Some((key, value)) = self.annotation(rudder::RESOURCE_POLICY, helm::RESOURCE_POLICY) {
            annotations::parse_resource_policy(value).map_err(|e| self.invalid(key, value, e))?;
        }
        if let Some(value) = self.native_annotation(rudder::REPLICAS_ON_CREATION) {
            annotations::parse_replicas(value)
                .map_err(|e| self.invalid(rudder::REPLICAS_ON_CREATION, value, e))?;
        }
        if let Some(value) = self.native_annotation(rudder::TRACK_TERMINATION_MODE) {
            value
                .parse::<TrackTerminationMode>()
                .map_err(|e| self.invalid(rudder::TRACK_TERMINATION_MODE, value, e))?;
        }
        if let Some(value) = self.native_annotation(rudder::WAIT_FOR) {
            annotations::parse_wait_for(value)
                .map_err(|e| self.invalid(rudder::WAIT_FOR, value, e))?;
        }
        Ok(())
    }
}

/// A resource bound to release phases
#[derive(Debug, Clone, PartialEq)]
pub struct HookResource {
    spec: ResourceSpec,
}

impl HookResource {
    pub fn new(spec: ResourceSpec) -> Self {
        Self { spec }
    }

    /// Whether a manifest declares hook phases
    pub fn is_hook(object: &Value) -> bool {
        let annotations = annotations::annotations_of(object);
        get_annotation(&annotations, rudder::HOOK, helm::HOOK).is_some()
    }

    pub fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    pub fn identity(&self) -> &ResourceIdentity {
        self.spec.identity()
    }

    pub fn object(&self) -> &Value {
        self.spec.object()
    }

    pub fn into_spec(self) -> ResourceSpec {
        self.spec
    }

    pub fn phases(&self) -> Vec<HookPhase> {
        self.spec
            .annotation(rudder::HOOK, helm::HOOK)
            .and_then(|(_, v)| annotations::parse_hook_phases(v).ok())
            .unwrap_or_default()
    }

    /// Whether this hook runs during the given operation
    pub fn runs_on(&self, deploy_type: DeployType) -> bool {
        let wanted = deploy_type.hook_phases();
        self.phases().iter().any(|p| wanted.contains(p))
    }

    pub fn weight(&self) -> i32 {
        self.spec
            .annotation(rudder::HOOK_WEIGHT, helm::HOOK_WEIGHT)
            .and_then(|(_, v)| annotations::parse_weight(v).ok())
            .unwrap_or(0)
    }

    /// Hooks without a delete policy are recreated on every run
    pub fn delete_policy(&self) -> DeletePolicy {
        match self
            .spec
            .annotation(rudder::HOOK_DELETE_POLICY, helm::HOOK_DELETE_POLICY)
        {
            Some((_, v)) => annotations::parse_delete_policy(v).unwrap_or_else(|_| DeletePolicy::hook_default()),
            None => DeletePolicy::hook_default(),
        }
    }

    pub fn recreate(&self) -> bool {
        self.delete_policy().before_creation
    }

    pub fn delete_on_succeeded(&self) -> bool {
        self.delete_policy().on_succeeded
    }

    pub fn delete_on_failed(&self) -> bool {
        self.delete_policy().on_failed
    }

    pub fn keep_on_delete(&self) -> bool {
        self.spec.keep_on_delete()
    }

    pub fn default_replicas_on_creation(&self) -> Option<i32> {
        self.spec.default_replicas_on_creation()
    }

    pub fn track_termination_mode(&self) -> TrackTerminationMode {
        self.spec.track_termination_mode()
    }

    pub fn wait_for(&self) -> Vec<ResourceRef> {
        self.spec.wait_for()
    }

    pub fn validate(&self) -> Result<()> {
        match self.spec.annotation(rudder::HOOK, helm::HOOK) {
            Some((key, value)) => {
                annotations::parse_hook_phases(value).map_err(|e| self.spec.invalid(key, value, e))?;
            }
            None => {
                return Err(CoreError::InvalidResource {
                    resource: self.identity().human_id(),
                    reason: "hook declares no phases".to_string(),
                });
            }
        }
        if let Some((key, value)) = self.spec.annotation(rudder::HOOK_WEIGHT, helm::HOOK_WEIGHT) {
            annotations::parse_weight(value).map_err(|e| self.spec.invalid(key, value, e))?;
        }
        if let Some((key, value)) = self
            .spec
            .annotation(rudder::HOOK_DELETE_POLICY, helm::HOOK_DELETE_POLICY)
        {
            annotations::parse_delete_policy(value).map_err(|e| self.spec.invalid(key, value, e))?;
        }
        self.spec.validate_common()
    }
}

/// A steady-state resource of a release
#[derive(Debug, Clone, PartialEq)]
pub struct GeneralResource {
    spec: ResourceSpec,
}

impl GeneralResource {
    pub fn new(spec: ResourceSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    pub fn identity(&self) -> &ResourceIdentity {
        self.spec.identity()
    }

    pub fn object(&self) -> &Value {
        self.spec.object()
    }

    pub fn into_spec(self) -> ResourceSpec {
        self.spec
    }

    pub fn weight(&self) -> i32 {
        self.spec
            .native_annotation(rudder::WEIGHT)
            .and_then(|v| annotations::parse_weight(v).ok())
            .unwrap_or(0)
    }

    pub fn delete_policy(&self) -> DeletePolicy {
        self.spec
            .native_annotation(rudder::DELETE_POLICY)
            .and_then(|v| annotations::parse_delete_policy(v).ok())
            .unwrap_or_default()
    }

    pub fn recreate(&self) -> bool {
        self.delete_policy().before_creation
    }

    pub fn delete_on_succeeded(&self) -> bool {
        self.delete_policy().on_succeeded
    }

    pub fn delete_on_failed(&self) -> bool {
        self.delete_policy().on_failed
    }

    pub fn keep_on_delete(&self) -> bool {
        self.spec.keep_on_delete()
    }

    pub fn default_replicas_on_creation(&self) -> Option<i32> {
        self.spec.default_replicas_on_creation()
    }

    pub fn track_termination_mode(&self) -> TrackTerminationMode {
        self.spec.track_termination_mode()
    }

    pub fn wait_for(&self) -> Vec<ResourceRef> {
        self.spec.wait_for()
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(value) = self.spec.native_annotation(rudder::WEIGHT) {
            annotations::parse_weight(value).map_err(|e| self.spec.invalid(rudder::WEIGHT, value, e))?;
        }
        if let Some(value) = self.spec.native_annotation(rudder::DELETE_POLICY) {
            annotations::parse_delete_policy(value)
                .map_err(|e| self.spec.invalid(rudder::DELETE_POLICY, value, e))?;
        }
        self.spec.validate_common()
    }
}

/// A CRD installed ahead of the release's own resources
#[derive(Debug, Clone, PartialEq)]
pub struct StandaloneCrd {
    spec: ResourceSpec,
}

impl StandaloneCrd {
    pub fn new(spec: ResourceSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    pub fn identity(&self) -> &ResourceIdentity {
        self.spec.identity()
    }

    pub fn object(&self) -> &Value {
        self.spec.object()
    }

    pub fn validate(&self) -> Result<()> {
        if !self.identity().is_crd() {
            return Err(CoreError::InvalidResource {
                resource: self.identity().human_id(),
                reason: "standalone CRD must be an apiextensions.k8s.io CustomResourceDefinition"
                    .to_string(),
            });
        }
        Ok(())
    }
}

/// The namespace a release is deployed into
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseNamespace {
    spec: ResourceSpec,
}

impl ReleaseNamespace {
    pub fn new(spec: ResourceSpec) -> Self {
        Self { spec }
    }

    /// Minimal `v1/Namespace` manifest for a release namespace
    pub fn for_name(name: &str) -> Self {
        let object = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": { "name": name },
        });
        let identity = ResourceIdentity::new("", "v1", "Namespace", None, name);
        Self::new(ResourceSpec::from_parts(identity, object, ""))
    }

    pub fn spec(&self) -> &ResourceSpec {
        &self.spec
    }

    pub fn identity(&self) -> &ResourceIdentity {
        self.spec.identity()
    }

    pub fn object(&self) -> &Value {
        self.spec.object()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(annotations: Value) -> ResourceSpec {
        ResourceSpec::new(
            json!({
                "apiVersion": "batch/v1",
                "kind": "Job",
                "metadata": { "name": "migrate", "annotations": annotations },
            }),
            "templates/job.yaml",
            "app",
        )
        .unwrap()
    }

    #[test]
    fn test_hook_defaults_to_recreate() {
        let hook = HookResource::new(spec(json!({ "helm.sh/hook": "pre-install" })));
        assert!(hook.recreate());
        assert!(!hook.delete_on_succeeded());
        assert_eq!(hook.phases(), vec![HookPhase::PreInstall]);
        assert!(hook.runs_on(DeployType::Initial));
        assert!(!hook.runs_on(DeployType::Upgrade));
        hook.validate().unwrap();
    }

    #[test]
    fn test_hook_explicit_delete_policy() {
        let hook = HookResource::new(spec(json!({
            "rudder.io/hook": "post-upgrade",
            "helm.sh/hook-delete-policy": "hook-succeeded",
            "rudder.io/hook-weight": "-3",
        })));
        assert!(!hook.recreate());
        assert!(hook.delete_on_succeeded());
        assert_eq!(hook.weight(), -3);
    }

    #[test]
    fn test_hook_validation_rejects_bad_phase() {
        let hook = HookResource::new(spec(json!({ "helm.sh/hook": "pre-instal" })));
        let err = hook.validate().unwrap_err();
        assert!(matches!(err, CoreError::InvalidAnnotation { ref key, .. } if key == "helm.sh/hook"));
    }

    #[test]
    fn test_hook_without_phase_is_invalid() {
        let hook = HookResource::new(spec(json!({})));
        assert!(matches!(
            hook.validate(),
            Err(CoreError::InvalidResource { .. })
        ));
    }

    #[test]
    fn test_general_resource_policies() {
        let res = GeneralResource::new(spec(json!({
            "rudder.io/delete-policy": "before-creation,succeeded",
            "rudder.io/replicas-on-creation": "2",
            "rudder.io/track-termination-mode": "NonBlocking",
            "helm.sh/resource-policy": "keep",
        })));
        assert!(res.recreate());
        assert!(res.delete_on_succeeded());
        assert!(!res.delete_on_failed());
        assert_eq!(res.default_replicas_on_creation(), Some(2));
        assert_eq!(res.track_termination_mode(), TrackTerminationMode::NonBlocking);
        assert!(res.keep_on_delete());
        res.validate().unwrap();
    }

    #[test]
    fn test_general_resource_invalid_weight() {
        let res = GeneralResource::new(spec(json!({ "rudder.io/weight": "x" })));
        assert_eq!(res.weight(), 0);
        assert!(res.validate().is_err());
    }

    #[test]
    fn test_invalid_wait_for() {
        let res = GeneralResource::new(spec(json!({ "rudder.io/wait-for": "nope" })));
        assert!(res.validate().is_err());
        assert!(res.wait_for().is_empty());
    }

    #[test]
    fn test_standalone_crd_validation() {
        let crd = StandaloneCrd::new(
            ResourceSpec::new(
                json!({
                    "apiVersion": "apiextensions.k8s.io/v1",
                    "kind": "CustomResourceDefinition",
                    "metadata": { "name": "widgets.example.com" },
                }),
                "crds/widgets.yaml",
                "app",
            )
            .unwrap(),
        );
        crd.validate().unwrap();
        assert_eq!(crd.identity().namespace(), None);

        let not_crd = StandaloneCrd::new(spec(json!({})));
        assert!(not_crd.validate().is_err());
    }

    #[test]
    fn test_release_namespace_for_name() {
        let ns = ReleaseNamespace::for_name("app");
        assert!(ns.identity().is_namespace());
        assert_eq!(ns.identity().name(), "app");
    }
}
