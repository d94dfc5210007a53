//! Annotation parsing with Helm compatibility
//!
//! Rudder reads both `rudder.io/*` and `helm.sh/*` annotations so existing
//! charts keep working. When both are present the native key wins.
//!
//! Every parser here is strict and returns the reason a value was rejected.
//! Resource types call them leniently for their accessors (falling back to
//! defaults) and strictly from `validate()`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::phase::HookPhase;

/// Rudder-native annotations
pub mod rudder {
    /// Hook phases
    pub const HOOK: &str = "rudder.io/hook";
    /// Hook weight for ordering
    pub const HOOK_WEIGHT: &str = "rudder.io/hook-weight";
    /// Hook delete policy
    pub const HOOK_DELETE_POLICY: &str = "rudder.io/hook-delete-policy";
    /// Resource policy (keep on uninstall)
    pub const RESOURCE_POLICY: &str = "rudder.io/resource-policy";
    /// Weight of a general resource
    pub const WEIGHT: &str = "rudder.io/weight";
    /// Delete policy of a general resource
    pub const DELETE_POLICY: &str = "rudder.io/delete-policy";
    /// Replica count used only when the object is created
    pub const REPLICAS_ON_CREATION: &str = "rudder.io/replicas-on-creation";
    /// Whether readiness tracking blocks the release
    pub const TRACK_TERMINATION_MODE: &str = "rudder.io/track-termination-mode";
    /// Wait for other resources before deploying
    pub const WAIT_FOR: &str = "rudder.io/wait-for";
}

/// Helm-compatible annotations (for migration)
pub mod helm {
    /// Hook phase annotation
    pub const HOOK: &str = "helm.sh/hook";
    /// Hook weight for ordering
    pub const HOOK_WEIGHT: &str = "helm.sh/hook-weight";
    /// Hook delete policy
    pub const HOOK_DELETE_POLICY: &str = "helm.sh/hook-delete-policy";
    /// Resource policy (keep on uninstall)
    pub const RESOURCE_POLICY: &str = "helm.sh/resource-policy";
    /// Owning release name
    pub const RELEASE_NAME: &str = "meta.helm.sh/release-name";
    /// Owning release namespace
    pub const RELEASE_NAMESPACE: &str = "meta.helm.sh/release-namespace";
    /// Label naming the managing tool
    pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
    /// Value written to the managed-by label
    pub const MANAGED_BY_VALUE: &str = "Helm";
}

pub const RESOURCE_POLICY_KEEP: &str = "keep";

/// Read `metadata.annotations` of a manifest
pub fn annotations_of(object: &Value) -> BTreeMap<String, String> {
    string_map_at(object, "annotations")
}

/// Read `metadata.labels` of a manifest
pub fn labels_of(object: &Value) -> BTreeMap<String, String> {
    string_map_at(object, "labels")
}

fn string_map_at(object: &Value, field: &str) -> BTreeMap<String, String> {
    object
        .get("metadata")
        .and_then(|m| m.get(field))
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

/// Get annotation value, preferring Rudder over Helm
pub fn get_annotation<'a>(
    annotations: &'a BTreeMap<String, String>,
    rudder_key: &'a str,
    helm_key: &'a str,
) -> Option<(&'a str, &'a str)> {
    annotations
        .get(rudder_key)
        .map(|v| (rudder_key, v.as_str()))
        .or_else(|| annotations.get(helm_key).map(|v| (helm_key, v.as_str())))
}

/// Parse a comma-separated list of hook phases
pub fn parse_hook_phases(value: &str) -> Result<Vec<HookPhase>, String> {
    let phases = value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(HookPhase::from_str)
        .collect::<Result<Vec<_>, _>>()?;

    if phases.is_empty() {
        return Err("at least one hook phase is required".to_string());
    }
    Ok(phases)
}

/// Parse a weight
pub fn parse_weight(value: &str) -> Result<i32, String> {
    value
        .trim()
        .parse()
        .map_err(|_| "weight must be an integer".to_string())
}

/// Parse a replica count
pub fn parse_replicas(value: &str) -> Result<i32, String> {
    match value.trim().parse::<i32>() {
        Ok(n) if n >= 0 => Ok(n),
        _ => Err("replicas must be a non-negative integer".to_string()),
    }
}

/// Check a resource policy value, returning whether it asks to keep the resource
pub fn parse_resource_policy(value: &str) -> Result<bool, String> {
    match value.trim() {
        RESOURCE_POLICY_KEEP => Ok(true),
        "" => Ok(false),
        _ => Err(format!("only \"{}\" is supported", RESOURCE_POLICY_KEEP)),
    }
}

/// Whether an annotation map asks to keep the resource on delete
pub fn declares_keep(annotations: &BTreeMap<String, String>) -> bool {
    get_annotation(annotations, rudder::RESOURCE_POLICY, helm::RESOURCE_POLICY)
        .and_then(|(_, v)| parse_resource_policy(v).ok())
        .unwrap_or(false)
}

/// Delete policies, combinable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeletePolicy {
    /// Delete the existing object before creating it again
    pub before_creation: bool,
    /// Delete once the resource became ready
    pub on_succeeded: bool,
    /// Delete if the resource failed
    pub on_failed: bool,
}

impl DeletePolicy {
    /// Helm's default for hooks without a policy
    pub fn hook_default() -> Self {
        Self {
            before_creation: true,
            ..Default::default()
        }
    }
}

/// Parse a comma-separated delete policy
///
/// Accepts both hook spellings (`before-hook-creation`, `hook-succeeded`,
/// `hook-failed`) and the general-resource ones (`before-creation`,
/// `succeeded`, `failed`).
pub fn parse_delete_policy(value: &str) -> Result<DeletePolicy, String> {
    let mut policy = DeletePolicy::default();

    for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match item {
            "before-hook-creation" | "before-creation" => policy.before_creation = true,
            "hook-succeeded" | "succeeded" => policy.on_succeeded = true,
            "hook-failed" | "failed" => policy.on_failed = true,
            other => return Err(format!("unknown delete policy \"{}\"", other)),
        }
    }

    Ok(policy)
}

/// How readiness tracking of a resource affects the release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackTerminationMode {
    /// Wait for the resource before moving on (default)
    #[default]
    WaitUntilResourceReady,
    /// Track in the background, never block
    NonBlocking,
}

impl FromStr for TrackTerminationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "WaitUntilResourceReady" => Ok(Self::WaitUntilResourceReady),
            "NonBlocking" => Ok(Self::NonBlocking),
            other => Err(format!(
                "unknown mode \"{}\", expected WaitUntilResourceReady or NonBlocking",
                other
            )),
        }
    }
}

/// Reference to a Kubernetes resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub kind: String,
    pub name: String,
}

impl ResourceRef {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Parse wait-for dependencies
/// Format: "Kind/name" or "Kind/name,Kind/name"
pub fn parse_wait_for(value: &str) -> Result<Vec<ResourceRef>, String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|dep| match dep.split_once('/') {
            Some((kind, name)) if !kind.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(ResourceRef::new(kind, name))
            }
            _ => Err(format!("dependency \"{}\" must look like Kind/name", dep)),
        })
        .collect()
}
