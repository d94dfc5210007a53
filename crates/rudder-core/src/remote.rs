//! Live objects retrieved from the cluster

use std::collections::BTreeMap;

use serde_json::Value;

use crate::annotations::{self, helm};
use crate::identity::ResourceIdentity;

/// A live object as returned by the API server
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResource {
    identity: ResourceIdentity,
    object: Value,
}

impl RemoteResource {
    pub fn new(identity: ResourceIdentity, object: Value) -> Self {
        Self { identity, object }
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

    pub fn uid(&self) -> Option<&str> {
        self.metadata_str("uid")
    }

    pub fn resource_version(&self) -> Option<&str> {
        self.metadata_str("resourceVersion")
    }

    fn metadata_str(&self, field: &str) -> Option<&str> {
        self.object
            .get("metadata")
            .and_then(|m| m.get(field))
            .and_then(Value::as_str)
    }

    pub fn annotations(&self) -> BTreeMap<String, String> {
        annotations::annotations_of(&self.object)
    }

    pub fn labels(&self) -> BTreeMap<String, String> {
        annotations::labels_of(&self.object)
    }

    /// Raw `metadata.managedFields`, if the server returned any
    pub fn managed_fields(&self) -> Option<&Value> {
        self.object.get("metadata").and_then(|m| m.get("managedFields"))
    }

    /// Whether the live object itself asks to survive deletion
    ///
    /// The release namespace is always kept: deleting it would take every
    /// other object of the release (and of anyone else) down with it.
    pub fn keep_on_delete(&self, release_namespace: &str) -> bool {
        if self.identity.is_namespace() && self.identity.name() == release_namespace {
            return true;
        }
        annotations::declares_keep(&self.annotations())
    }

    /// Why this object cannot be adopted by the release, if it cannot
    ///
    /// Unowned objects (no release annotation) are adoptable, as are objects
    /// already owned by the same release in the same namespace.
    pub fn non_adoptable_reason(&self, release_name: &str, release_namespace: &str) -> Option<String> {
        let annotations = self.annotations();

        let owner = match annotations.get(helm::RELEASE_NAME) {
            Some(owner) => owner,
            None => return None,
        };
        if owner != release_name {
            return Some(format!(
                "annotation {}={:?} must be {:?}",
                helm::RELEASE_NAME,
                owner,
                release_name
            ));
        }

        match annotations.get(helm::RELEASE_NAMESPACE) {
            Some(ns) if ns == release_namespace => None,
            Some(ns) => Some(format!(
                "annotation {}={:?} must be {:?}",
                helm::RELEASE_NAMESPACE,
                ns,
                release_namespace
            )),
            None => Some(format!(
                "annotation {} is missing, expected {:?}",
                helm::RELEASE_NAMESPACE,
                release_namespace
            )),
        }
    }

    pub fn adoptable_by(&self, release_name: &str, release_namespace: &str) -> bool {
        self.non_adoptable_reason(release_name, release_namespace)
            .is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn remote(annotations: Value) -> RemoteResource {
        let id = ResourceIdentity::new("", "v1", "ConfigMap", Some("app".into()), "cfg");
        RemoteResource::new(
            id,
            json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": { "name": "cfg", "uid": "abc", "annotations": annotations },
            }),
        )
    }

    #[test]
    fn test_uid() {
        assert_eq!(remote(json!({})).uid(), Some("abc"));
    }

    #[test]
    fn test_unowned_is_adoptable() {
        assert!(remote(json!({})).adoptable_by("rel", "app"));
    }

    #[test]
    fn test_same_release_is_adoptable() {
        let r = remote(json!({
            "meta.helm.sh/release-name": "rel",
            "meta.helm.sh/release-namespace": "app",
        }));
        assert!(r.adoptable_by("rel", "app"));
    }

    #[test]
    fn test_other_release_is_not_adoptable() {
        let r = remote(json!({
            "meta.helm.sh/release-name": "other",
            "meta.helm.sh/release-namespace": "app",
        }));
        let reason = r.non_adoptable_reason("rel", "app").unwrap();
        assert!(reason.contains("release-name"));
        assert!(reason.contains("other"));
    }

    #[test]
    fn test_other_namespace_is_not_adoptable() {
        let r = remote(json!({
            "meta.helm.sh/release-name": "rel",
            "meta.helm.sh/release-namespace": "elsewhere",
        }));
        assert!(!r.adoptable_by("rel", "app"));
    }

    #[test]
    fn test_keep_on_delete() {
        assert!(remote(json!({ "helm.sh/resource-policy": "keep" })).keep_on_delete("app"));
        assert!(!remote(json!({})).keep_on_delete("app"));

        let ns = RemoteResource::new(
            ResourceIdentity::new("", "v1", "Namespace", None, "app"),
            json!({ "metadata": { "name": "app" } }),
        );
        assert!(ns.keep_on_delete("app"));
        assert!(!ns.keep_on_delete("other"));
    }
}
