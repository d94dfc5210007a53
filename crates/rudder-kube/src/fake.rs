//! In-memory cluster backend for testing
//!
//! `FakeCluster` keeps objects in a map and simulates just enough of the API
//! server for the reconciliation pipeline: server-side apply with a field
//! manager ledger, JSON merge patch, delete, and typed errors. Failures and
//! latency can be injected per resource.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{FieldsV1, ManagedFieldsEntry};
use kube::api::PropagationPolicy;
use kube::core::ErrorResponse;
use serde_json::{Map, Value};

use rudder_core::ResourceIdentity;

use crate::backend::{ClusterBackend, FIELD_MANAGER};
use crate::error::{KubeError, Result, classify_api_error};
use crate::managed_fields::{self, FieldSet};

/// Failure to inject into apply calls of one resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeFailure {
    /// The server rejects a change to an immutable field
    Immutable,
    /// An opaque server-side failure
    Transient,
}

/// Counts of operations performed for testing assertions
#[derive(Debug, Default, Clone)]
pub struct OperationCounts {
    pub gets: usize,
    pub applies: usize,
    pub dry_run_applies: usize,
    pub merge_patches: usize,
    pub deletes: usize,
    pub mapper_resets: usize,
}

#[derive(Debug, Default)]
struct InFlight {
    current: usize,
    max: usize,
}

/// In-memory cluster for testing
#[derive(Clone, Default)]
pub struct FakeCluster {
    /// Storage: identity id -> object
    objects: Arc<RwLock<HashMap<String, Value>>>,
    failures: Arc<RwLock<HashMap<String, FakeFailure>>>,
    unknown_kinds: Arc<RwLock<HashSet<String>>>,
    operations: Arc<RwLock<OperationCounts>>,
    in_flight: Arc<RwLock<HashMap<String, InFlight>>>,
    next_uid: Arc<AtomicU64>,
    delay: Option<Duration>,
}

impl FakeCluster {
    /// Create an empty cluster
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate an object; `uid` and `resourceVersion` are filled in when missing
    pub fn with_object(self, identity: &ResourceIdentity, mut object: Value) -> Self {
        if let Some(metadata) = object.get_mut("metadata").and_then(Value::as_object_mut) {
            if !metadata.contains_key("uid") {
                metadata.insert("uid".to_string(), Value::from(self.fresh_uid()));
            }
            if !metadata.contains_key("resourceVersion") {
                metadata.insert("resourceVersion".to_string(), Value::from("1"));
            }
        }
        write(&self.objects).insert(identity.id(), object);
        self
    }

    /// Make every apply (dry-run or not) of `identity` fail
    pub fn with_apply_failure(self, identity: &ResourceIdentity, failure: FakeFailure) -> Self {
        write(&self.failures).insert(identity.id(), failure);
        self
    }

    /// Answer `NoSuchKind` for a kind until the mapper is reset
    pub fn with_unknown_kind(self, api_version: &str, kind: &str) -> Self {
        write(&self.unknown_kinds).insert(format!("{}/{}", api_version, kind));
        self
    }

    /// Delay every call by `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Get operation counts for assertions
    pub fn operation_counts(&self) -> OperationCounts {
        read(&self.operations).clone()
    }

    /// Reset operation counts
    pub fn reset_counts(&self) {
        *write(&self.operations) = OperationCounts::default();
    }

    /// Stored object, bypassing counters
    pub fn object(&self, identity: &ResourceIdentity) -> Option<Value> {
        read(&self.objects).get(&identity.id()).cloned()
    }

    /// Highest number of calls seen in flight at once for one identity
    pub fn max_in_flight(&self, identity: &ResourceIdentity) -> usize {
        read(&self.in_flight)
            .get(&identity.id())
            .map(|f| f.max)
            .unwrap_or(0)
    }

    fn fresh_uid(&self) -> String {
        format!("uid-{}", self.next_uid.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn count(&self, f: impl FnOnce(&mut OperationCounts)) {
        f(&mut write(&self.operations));
    }

    async fn enter(&self, identity: &ResourceIdentity) {
        {
            let mut in_flight = write(&self.in_flight);
            let entry = in_flight.entry(identity.id()).or_default();
            entry.current += 1;
            entry.max = entry.max.max(entry.current);
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn leave(&self, identity: &ResourceIdentity) {
        if let Some(entry) = write(&self.in_flight).get_mut(&identity.id()) {
            entry.current = entry.current.saturating_sub(1);
        }
    }

    fn check_kind(&self, identity: &ResourceIdentity) -> Result<()> {
        let key = format!("{}/{}", identity.api_version(), identity.kind());
        if read(&self.unknown_kinds).contains(&key) {
            return Err(KubeError::NoSuchKind {
                api_version: identity.api_version(),
                kind: identity.kind().to_string(),
            });
        }
        Ok(())
    }

    fn not_found(identity: &ResourceIdentity, operation: &'static str) -> KubeError {
        api_error(404, "NotFound", &format!("{} not found", identity.human_id()), operation, identity)
    }

    fn do_get(&self, identity: &ResourceIdentity) -> Result<Value> {
        self.check_kind(identity)?;
        read(&self.objects)
            .get(&identity.id())
            .cloned()
            .ok_or_else(|| Self::not_found(identity, "get"))
    }

    fn do_apply(&self, identity: &ResourceIdentity, desired: &Value, dry_run: bool) -> Result<Value> {
        self.check_kind(identity)?;
        let operation = if dry_run { "dry-run apply" } else { "apply" };

        match read(&self.failures).get(&identity.id()) {
            Some(FakeFailure::Immutable) => {
                return Err(api_error(
                    422,
                    "Invalid",
                    &format!("{} is invalid: spec: Invalid value: field is immutable", identity.name()),
                    operation,
                    identity,
                ));
            }
            Some(FakeFailure::Transient) => {
                return Err(api_error(500, "InternalError", "etcdserver: request timed out", operation, identity));
            }
            None => {}
        }

        let existing = read(&self.objects).get(&identity.id()).cloned();
        let mut merged = existing.clone().unwrap_or_else(|| Value::Object(Map::new()));
        merge_apply(&mut merged, desired);

        let previous_ledger = existing
            .as_ref()
            .and_then(|e| e.get("metadata"))
            .and_then(|m| m.get("managedFields"));
        let ledger = apply_ledger(previous_ledger, desired, identity)?;

        let ledger = serde_json::to_value(ledger)?;
        let version = next_resource_version(existing.as_ref());
        if let Some(metadata) = metadata_mut(&mut merged) {
            metadata.insert("managedFields".to_string(), ledger);
            if !metadata.contains_key("uid") {
                metadata.insert("uid".to_string(), Value::from(self.fresh_uid()));
            }
            metadata.insert("resourceVersion".to_string(), Value::from(version));
        }

        if !dry_run {
            write(&self.objects).insert(identity.id(), merged.clone());
        }
        Ok(merged)
    }

    fn do_merge_patch(&self, identity: &ResourceIdentity, patch: &Value) -> Result<Value> {
        self.check_kind(identity)?;
        let mut objects = write(&self.objects);
        let object = objects
            .get_mut(&identity.id())
            .ok_or_else(|| Self::not_found(identity, "merge patch"))?;

        let version = next_resource_version(Some(&*object));
        merge_patch(object, patch);
        if let Some(metadata) = metadata_mut(object) {
            metadata.insert("resourceVersion".to_string(), Value::from(version));
        }
        Ok(object.clone())
    }

    fn do_delete(&self, identity: &ResourceIdentity) -> Result<()> {
        self.check_kind(identity)?;
        write(&self.objects)
            .remove(&identity.id())
            .map(|_| ())
            .ok_or_else(|| Self::not_found(identity, "delete"))
    }
}

#[async_trait]
impl ClusterBackend for FakeCluster {
    async fn get(&self, identity: &ResourceIdentity) -> Result<Value> {
        self.enter(identity).await;
        self.count(|c| c.gets += 1);
        let result = self.do_get(identity);
        self.leave(identity);
        result
    }

    async fn apply(&self, identity: &ResourceIdentity, object: &Value, dry_run: bool) -> Result<Value> {
        self.enter(identity).await;
        self.count(|c| {
            if dry_run {
                c.dry_run_applies += 1;
            } else {
                c.applies += 1;
            }
        });
        let result = self.do_apply(identity, object, dry_run);
        self.leave(identity);
        result
    }

    async fn merge_patch(&self, identity: &ResourceIdentity, patch: &Value) -> Result<Value> {
        self.enter(identity).await;
        self.count(|c| c.merge_patches += 1);
        let result = self.do_merge_patch(identity, patch);
        self.leave(identity);
        result
    }

    async fn delete(&self, identity: &ResourceIdentity, _propagation: PropagationPolicy) -> Result<()> {
        self.enter(identity).await;
        self.count(|c| c.deletes += 1);
        let result = self.do_delete(identity);
        self.leave(identity);
        result
    }

    fn reset_mapper(&self) {
        self.count(|c| c.mapper_resets += 1);
        write(&self.unknown_kinds).clear();
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn api_error(
    code: u16,
    reason: &str,
    message: &str,
    operation: &'static str,
    identity: &ResourceIdentity,
) -> KubeError {
    let error = kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: reason.to_string(),
        code,
    });
    classify_api_error(error, operation, &identity.human_id())
}

fn metadata_mut(object: &mut Value) -> Option<&mut Map<String, Value>> {
    object
        .as_object_mut()?
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
}

fn next_resource_version(object: Option<&Value>) -> String {
    let current = object
        .and_then(|o| o.get("metadata"))
        .and_then(|m| m.get("resourceVersion"))
        .and_then(Value::as_str)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    (current + 1).to_string()
}

/// Apply-style merge: objects merge recursively, everything else replaces
fn merge_apply(target: &mut Value, desired: &Value) {
    match (target, desired) {
        (Value::Object(t), Value::Object(d)) => {
            for (key, value) in d {
                if key == "managedFields" {
                    continue;
                }
                let nested = value.is_object() && t.get(key).is_some_and(Value::is_object);
                if !nested {
                    t.insert(key.clone(), value.clone());
                } else if let Some(existing) = t.get_mut(key) {
                    merge_apply(existing, value);
                }
            }
        }
        (target, desired) => *target = desired.clone(),
    }
}

/// RFC 7386 JSON merge patch
fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(p) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(t) = target {
        for (key, value) in p {
            if value.is_null() {
                t.remove(key);
            } else {
                merge_patch(t.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// Ledger after a forced apply: we own what we sent, others lose it
fn apply_ledger(
    previous: Option<&Value>,
    desired: &Value,
    identity: &ResourceIdentity,
) -> Result<Vec<ManagedFieldsEntry>> {
    let own = FieldSet::from_object(desired);
    let mut ledger = Vec::new();
    let mut placed = false;

    for entry in managed_fields::parse_entries(previous)? {
        let same_subresource = entry.subresource.as_deref().unwrap_or("").is_empty();
        let is_own_apply = entry.manager.as_deref() == Some(FIELD_MANAGER)
            && entry.operation.as_deref() == Some("Apply");

        if same_subresource && is_own_apply {
            if !placed {
                ledger.push(own_entry(&own, identity));
                placed = true;
            }
            continue;
        }
        if !same_subresource {
            ledger.push(entry);
            continue;
        }
        let rest = managed_fields::entry_fieldset(&entry)?.difference(&own);
        if !rest.is_empty() {
            ledger.push(ManagedFieldsEntry {
                fields_v1: Some(FieldsV1(rest.to_fields_v1())),
                ..entry
            });
        }
    }

    if !placed {
        ledger.push(own_entry(&own, identity));
    }
    Ok(ledger)
}

fn own_entry(own: &FieldSet, identity: &ResourceIdentity) -> ManagedFieldsEntry {
    ManagedFieldsEntry {
        api_version: Some(identity.api_version()),
        fields_type: Some("FieldsV1".to_string()),
        fields_v1: Some(FieldsV1(own.to_fields_v1())),
        manager: Some(FIELD_MANAGER.to_string()),
        operation: Some("Apply".to_string()),
        subresource: None,
        time: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id() -> ResourceIdentity {
        ResourceIdentity::new("", "v1", "ConfigMap", Some("app".into()), "cfg")
    }

    fn cm(data: Value) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": { "name": "cfg", "namespace": "app" },
            "data": data,
        })
    }

    #[tokio::test]
    async fn test_apply_creates_and_records_ledger() {
        let fake = FakeCluster::new();
        let obj = fake.apply(&id(), &cm(json!({ "a": "1" })), false).await.unwrap();

        assert_eq!(obj["metadata"]["uid"], "uid-1");
        assert_eq!(obj["metadata"]["resourceVersion"], "1");
        let ledger = managed_fields::parse_entries(obj["metadata"].get("managedFields")).unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger[0].manager.as_deref(), Some(FIELD_MANAGER));
        assert!(fake.object(&id()).is_some());
    }

    #[tokio::test]
    async fn test_dry_run_is_not_stored() {
        let fake = FakeCluster::new();
        fake.apply(&id(), &cm(json!({ "a": "1" })), true).await.unwrap();
        assert!(fake.object(&id()).is_none());
        assert_eq!(fake.operation_counts().dry_run_applies, 1);
        assert_eq!(fake.operation_counts().applies, 0);
    }

    #[tokio::test]
    async fn test_apply_takes_fields_from_other_managers() {
        let fake = FakeCluster::new().with_object(
            &id(),
            json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {
                    "name": "cfg",
                    "namespace": "app",
                    "managedFields": [{
                        "manager": "someone",
                        "operation": "Update",
                        "fieldsType": "FieldsV1",
                        "fieldsV1": { "f:data": { "f:a": {}, "f:b": {} } }
                    }]
                },
                "data": { "a": "0", "b": "0" }
            }),
        );

        let obj = fake.apply(&id(), &cm(json!({ "a": "1" })), false).await.unwrap();
        assert_eq!(obj["data"], json!({ "a": "1", "b": "0" }));

        let ledger = managed_fields::parse_entries(obj["metadata"].get("managedFields")).unwrap();
        let someone = ledger
            .iter()
            .find(|e| e.manager.as_deref() == Some("someone"))
            .unwrap();
        assert_eq!(
            managed_fields::entry_fieldset(someone).unwrap(),
            FieldSet::from_fields_v1(&json!({ "f:data": { "f:b": {} } })).unwrap()
        );
    }

    #[tokio::test]
    async fn test_merge_patch_removes_nulls() {
        let fake = FakeCluster::new().with_object(&id(), cm(json!({ "a": "1", "b": "2" })));
        let obj = fake
            .merge_patch(&id(), &json!({ "data": { "a": null, "c": "3" } }))
            .await
            .unwrap();
        assert_eq!(obj["data"], json!({ "b": "2", "c": "3" }));
        assert_eq!(obj["metadata"]["resourceVersion"], "2");
    }

    #[tokio::test]
    async fn test_injected_failures_are_classified() {
        let fake = FakeCluster::new().with_apply_failure(&id(), FakeFailure::Immutable);
        let err = fake.apply(&id(), &cm(json!({})), true).await.unwrap_err();
        assert!(err.is_immutable());

        let missing = ResourceIdentity::new("", "v1", "ConfigMap", Some("app".into()), "missing");
        assert!(fake.get(&missing).await.unwrap_err().is_not_found());
        assert!(fake.delete(&missing, PropagationPolicy::Foreground).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_unknown_kind_until_reset() {
        let widget = ResourceIdentity::new("example.com", "v1", "Widget", Some("app".into()), "w");
        let fake = FakeCluster::new().with_unknown_kind("example.com/v1", "Widget");

        assert!(fake.get(&widget).await.unwrap_err().is_no_such_kind());
        fake.reset_mapper();
        assert!(fake.get(&widget).await.unwrap_err().is_not_found());
        assert_eq!(fake.operation_counts().mapper_resets, 1);
    }
}
