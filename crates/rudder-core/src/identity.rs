//! Resource identity
//!
//! A [`ResourceIdentity`] names one object on the cluster. It is immutable
//! once built and carries two derived keys:
//!
//! - [`ResourceIdentity::id`]: version-agnostic, the same object served under
//!   `apps/v1` and `apps/v1beta2` shares it (used for locking)
//! - [`ResourceIdentity::id_with_version`]: includes the API version, so two
//!   representations of the same object never collide in a cache

use std::fmt;

use serde_json::Value;

use crate::error::{CoreError, Result};

/// Built-in kinds that are never namespaced
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "Node",
    "PersistentVolume",
    "StorageClass",
    "ClusterRole",
    "ClusterRoleBinding",
    "CustomResourceDefinition",
    "PriorityClass",
    "IngressClass",
    "RuntimeClass",
    "CSIDriver",
    "CSINode",
    "VolumeAttachment",
    "APIService",
    "MutatingWebhookConfiguration",
    "ValidatingWebhookConfiguration",
    "ValidatingAdmissionPolicy",
    "ValidatingAdmissionPolicyBinding",
    "CertificateSigningRequest",
    "FlowSchema",
    "PriorityLevelConfiguration",
];

/// Check whether a built-in kind is cluster-scoped
pub fn is_cluster_scoped_kind(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS.contains(&kind)
}

/// Identity of a Kubernetes object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceIdentity {
    group: String,
    version: String,
    kind: String,
    namespace: Option<String>,
    name: String,
}

impl ResourceIdentity {
    /// Create an identity from its parts
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
        namespace: Option<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
            namespace: namespace.filter(|ns| !ns.is_empty()),
            name: name.into(),
        }
    }

    /// Derive an identity from a manifest
    ///
    /// Namespaced objects without `metadata.namespace` land in
    /// `default_namespace`; built-in cluster-scoped kinds never get one.
    /// List manifests (`*List` with an `items` array) may omit the name,
    /// since they are expanded into their items before anything is deployed.
    pub fn from_object(object: &Value, default_namespace: &str) -> Result<Self> {
        let api_version = object
            .get("apiVersion")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::MissingField {
                field: "apiVersion".to_string(),
            })?;
        let kind = object
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::MissingField {
                field: "kind".to_string(),
            })?;
        let metadata = object.get("metadata");
        let name = match metadata
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
        {
            Some(name) => name,
            None if is_list_manifest(object) => "",
            None => {
                return Err(CoreError::MissingField {
                    field: "metadata.name".to_string(),
                });
            }
        };

        let (group, version) = split_api_version(api_version);

        let namespace = if is_cluster_scoped_kind(kind) {
            None
        } else {
            Some(
                metadata
                    .and_then(|m| m.get("namespace"))
                    .and_then(Value::as_str)
                    .filter(|ns| !ns.is_empty())
                    .unwrap_or(default_namespace)
                    .to_string(),
            )
        };

        Ok(Self::new(group, version, kind, namespace, name))
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// (group, version, kind)
    pub fn gvk(&self) -> (&str, &str, &str) {
        (&self.group, &self.version, &self.kind)
    }

    /// `apiVersion` as written in manifests ("v1" for the core group)
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Version-agnostic key
    pub fn id(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.namespace.as_deref().unwrap_or(""),
            self.group,
            self.kind,
            self.name
        )
    }

    /// Key that also encodes the API version
    pub fn id_with_version(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.namespace.as_deref().unwrap_or(""),
            self.group,
            self.version,
            self.kind,
            self.name
        )
    }

    /// Short form for logs and error messages
    pub fn human_id(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}:{}/{}", ns, self.kind, self.name),
            None => format!("{}/{}", self.kind, self.name),
        }
    }

    pub fn is_crd(&self) -> bool {
        self.group == "apiextensions.k8s.io" && self.kind == "CustomResourceDefinition"
    }

    pub fn is_namespace(&self) -> bool {
        self.group.is_empty() && self.kind == "Namespace"
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.human_id())
    }
}

/// `*List` kind carrying an `items` array
pub fn is_list_manifest(object: &Value) -> bool {
    let is_list_kind = object
        .get("kind")
        .and_then(Value::as_str)
        .is_some_and(|k| k.ends_with("List"));
    is_list_kind && object.get("items").is_some_and(Value::is_array)
}

/// Split an apiVersion into group and version
///
/// - "apps/v1" -> ("apps", "v1")
/// - "v1" -> ("", "v1")
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.rsplit_once('/') {
        Some((g, v)) => (g, v),
        None => ("", api_version),
    }
}
