//! Structural comparison of a live object with its dry-run projection
//!
//! Only the paths our own apply would write are compared. Those are read
//! from our `Apply` entry in the dry-run result's ledger, falling back to
//! the paths of the desired object when the server returned no ledger.
//! Server-defaulted fields and fields owned by other managers never count
//! as a difference.

use serde_json::Value;

use rudder_core::RemoteResource;

use crate::error::{KubeError, Result};
use crate::managed_fields::{self, FieldSet};

/// Paths where live and dry-run disagree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldDiff {
    pub changed_paths: Vec<String>,
}

impl FieldDiff {
    pub fn is_different(&self) -> bool {
        !self.changed_paths.is_empty()
    }
}

/// Compare `live` and `dry_run` on the fields we declare in `desired`
pub fn diff_declared_fields(live: &RemoteResource, dry_run: &RemoteResource, desired: &Value) -> Result<FieldDiff> {
    let entries = managed_fields::parse_entries(dry_run.managed_fields())?;
    let fields = match managed_fields::applied_fieldset(&entries)? {
        Some(fields) => fields,
        None => FieldSet::from_object(desired),
    };

    let mut diff = FieldDiff::default();
    compare(&fields, Some(live.object()), Some(dry_run.object()), &mut Vec::new(), &mut diff)?;
    Ok(diff)
}

fn compare(
    fields: &FieldSet,
    live: Option<&Value>,
    dry_run: Option<&Value>,
    path: &mut Vec<String>,
    diff: &mut FieldDiff,
) -> Result<()> {
    for member in fields.members() {
        let l = resolve(live, member)?;
        let d = resolve(dry_run, member)?;
        let differs = if fields.children().contains_key(member) {
            l.is_some() != d.is_some()
        } else {
            l != d
        };
        if differs {
            diff.changed_paths.push(render_path(path, member));
        }
    }

    for (key, child) in fields.children() {
        let l = resolve(live, key)?;
        let d = resolve(dry_run, key)?;
        path.push(key.clone());
        compare(child, l, d, path, diff)?;
        path.pop();
    }
    Ok(())
}

/// Step into `value` along one path element
fn resolve<'a>(value: Option<&'a Value>, element: &str) -> Result<Option<&'a Value>> {
    let Some(value) = value else {
        return Ok(None);
    };

    if let Some(field) = element.strip_prefix("f:") {
        return Ok(value.get(field));
    }

    if let Some(raw) = element.strip_prefix("k:") {
        let key: Value = serde_json::from_str(raw)
            .map_err(|e| KubeError::Diff(format!("bad key element {:?}: {}", element, e)))?;
        let key = key
            .as_object()
            .ok_or_else(|| KubeError::Diff(format!("key element {:?} is not an object", element)))?;
        return Ok(value.as_array().and_then(|items| {
            items
                .iter()
                .find(|item| key.iter().all(|(k, v)| item.get(k) == Some(v)))
        }));
    }

    if let Some(raw) = element.strip_prefix("v:") {
        let wanted: Value = serde_json::from_str(raw)
            .map_err(|e| KubeError::Diff(format!("bad value element {:?}: {}", element, e)))?;
        return Ok(value
            .as_array()
            .and_then(|items| items.iter().find(|item| **item == wanted)));
    }

    if let Some(raw) = element.strip_prefix("i:") {
        let index: usize = raw
            .parse()
            .map_err(|e| KubeError::Diff(format!("bad index element {:?}: {}", element, e)))?;
        return Ok(value.as_array().and_then(|items| items.get(index)));
    }

    Err(KubeError::Diff(format!("unknown path element {:?}", element)))
}

fn render_path(prefix: &[String], last: &str) -> String {
    prefix
        .iter()
        .map(String::as_str)
        .chain(std::iter::once(last))
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rudder_core::ResourceIdentity;
    use serde_json::json;

    fn remote(object: Value) -> RemoteResource {
        let id = ResourceIdentity::new("apps", "v1", "Deployment", Some("app".into()), "web");
        RemoteResource::new(id, object)
    }

    fn deployment(replicas: i64, image: &str, extra: Value) -> Value {
        let mut obj = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": "web", "namespace": "app" },
            "spec": {
                "replicas": replicas,
                "template": { "spec": { "containers": [{ "name": "web", "image": image }] } }
            }
        });
        if let (Some(o), Some(e)) = (obj.as_object_mut(), extra.as_object()) {
            for (k, v) in e {
                o.insert(k.clone(), v.clone());
            }
        }
        obj
    }

    #[test]
    fn test_identical_declared_fields() {
        let desired = deployment(2, "nginx:1", json!({}));
        let live = remote(deployment(2, "nginx:1", json!({ "status": { "ready": 1 } })));
        let dry = remote(deployment(2, "nginx:1", json!({})));

        let diff = diff_declared_fields(&live, &dry, &desired).unwrap();
        assert!(!diff.is_different());
    }

    #[test]
    fn test_changed_image_detected() {
        let desired = deployment(2, "nginx:2", json!({}));
        let live = remote(deployment(2, "nginx:1", json!({})));
        let dry = remote(deployment(2, "nginx:2", json!({})));

        let diff = diff_declared_fields(&live, &dry, &desired).unwrap();
        assert!(diff.is_different());
        assert!(diff.changed_paths.iter().any(|p| p.ends_with("f:image")));
    }

    #[test]
    fn test_undeclared_fields_ignored() {
        // Live carries a field set by another controller; dry-run keeps it too
        let desired = deployment(2, "nginx:1", json!({}));
        let mut live_obj = deployment(2, "nginx:1", json!({}));
        live_obj["spec"]["progressDeadlineSeconds"] = json!(600);
        let dry_obj = deployment(2, "nginx:1", json!({}));

        let diff = diff_declared_fields(&remote(live_obj), &remote(dry_obj), &desired).unwrap();
        assert!(!diff.is_different());
    }

    #[test]
    fn test_uses_dry_run_ledger() {
        // The ledger says we only own replicas, so the image mismatch is not ours
        let desired = deployment(3, "nginx:1", json!({}));
        let live = remote(deployment(2, "nginx:1", json!({})));
        let dry = remote(deployment(
            2,
            "nginx:9",
            json!({ "metadata": {
                "name": "web",
                "namespace": "app",
                "managedFields": [{
                    "manager": "rudder",
                    "operation": "Apply",
                    "fieldsType": "FieldsV1",
                    "fieldsV1": { "f:spec": { "f:replicas": {} } }
                }]
            } }),
        ));

        let diff = diff_declared_fields(&live, &dry, &desired).unwrap();
        assert!(!diff.is_different());
    }

    #[test]
    fn test_malformed_path_is_error() {
        let desired = deployment(2, "nginx:1", json!({}));
        let live = remote(deployment(2, "nginx:1", json!({})));
        let dry = remote(deployment(
            2,
            "nginx:1",
            json!({ "metadata": {
                "name": "web",
                "managedFields": [{
                    "manager": "rudder",
                    "operation": "Apply",
                    "fieldsType": "FieldsV1",
                    "fieldsV1": { "x:spec": {} }
                }]
            } }),
        ));

        let err = diff_declared_fields(&live, &dry, &desired).unwrap_err();
        assert!(matches!(err, KubeError::Diff(_)));
    }

    #[test]
    fn test_list_item_presence() {
        let desired = deployment(2, "nginx:1", json!({}));
        let mut live_obj = deployment(2, "nginx:1", json!({}));
        live_obj["spec"]["template"]["spec"]["containers"] = json!([]);
        let dry = remote(deployment(2, "nginx:1", json!({})));

        let diff = diff_declared_fields(&remote(live_obj), &dry, &desired).unwrap();
        assert!(diff.is_different());
    }
}
