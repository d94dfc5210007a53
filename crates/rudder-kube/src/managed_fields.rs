//! Client-side repair of the field ownership ledger
//!
//! Older tooling wrote the fields we declare under other manager names
//! (a stale `Update` entry of our own manager, `kubectl edit`, managers with
//! the deprecated `rudder-` prefix). Left alone, those entries keep a claim
//! on our fields and every dry-run apply reports a spurious difference.
//! [`reconcile`] folds them into our `Apply` entry and trims everyone else
//! so no field path is owned twice within the same subresource.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{FieldsV1, ManagedFieldsEntry};
use serde_json::{Map, Value, json};

use rudder_core::RemoteResource;

use crate::backend::FIELD_MANAGER;
use crate::error::{KubeError, Result};

/// Manager name `kubectl edit` records its changes under
pub const LEGACY_EDIT_MANAGER: &str = "kubectl-edit";

/// Prefix of manager names used by earlier releases of this engine
pub const DEPRECATED_MANAGER_PREFIX: &str = "rudder-";

const APPLY_OPERATION: &str = "Apply";
const FIELDS_TYPE: &str = "FieldsV1";

/// A set of field paths in the `FieldsV1` trie format
///
/// A key mapping to `{}` is a member. A key mapping to a non-empty object is
/// a child set; a `"."` entry inside it makes the key a member as well.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSet {
    members: BTreeSet<String>,
    children: BTreeMap<String, FieldSet>,
}

impl FieldSet {
    pub fn from_fields_v1(value: &Value) -> Result<Self> {
        let map = value.as_object().ok_or_else(|| {
            KubeError::ManagedFields(format!("expected an object in fieldset, got {}", value))
        })?;

        let mut set = FieldSet::default();
        for (key, sub) in map {
            if key == "." {
                continue;
            }
            let sub_map = sub.as_object().ok_or_else(|| {
                KubeError::ManagedFields(format!("expected an object under {:?}, got {}", key, sub))
            })?;

            if sub_map.is_empty() || sub_map.contains_key(".") {
                set.members.insert(key.clone());
            }
            let child = FieldSet::from_fields_v1(sub)?;
            if !child.is_empty() {
                set.children.insert(key.clone(), child);
            }
        }
        Ok(set)
    }

    /// Fields a server-side apply of `object` would claim
    ///
    /// Object fields become `f:` entries, list items keyed by a string `name`
    /// become `k:` entries, scalar lists become `v:` entries, and any other
    /// list is atomic. Identity fields, `managedFields` and `status` are
    /// never owned through apply.
    pub fn from_object(object: &Value) -> Self {
        let mut set = FieldSet::default();
        let Some(map) = object.as_object() else {
            return set;
        };

        for (key, value) in map {
            if matches!(key.as_str(), "apiVersion" | "kind" | "status") {
                continue;
            }
            let field = format!("f:{}", key);
            if key == "metadata" {
                let mut metadata = value.clone();
                if let Some(m) = metadata.as_object_mut() {
                    for ignored in ["name", "namespace", "managedFields", "uid", "resourceVersion"] {
                        m.remove(ignored);
                    }
                }
                let child = Self::from_value(&metadata);
                if !child.is_empty() {
                    set.children.insert(field, child);
                }
                continue;
            }
            set.insert_value(field, value);
        }
        set
    }

    fn from_value(value: &Value) -> Self {
        let mut set = FieldSet::default();
        if let Some(map) = value.as_object() {
            for (key, value) in map {
                set.insert_value(format!("f:{}", key), value);
            }
        }
        set
    }

    fn insert_value(&mut self, key: String, value: &Value) {
        match value {
            Value::Null => {}
            Value::Object(map) if !map.is_empty() => {
                let child = Self::from_value(value);
                if !child.is_empty() {
                    self.children.insert(key, child);
                }
            }
            Value::Array(items) if !items.is_empty() && items.iter().all(has_name_key) => {
                let mut child = FieldSet::default();
                for item in items {
                    let name = item.get("name").cloned().unwrap_or(Value::Null);
                    let item_key = format!("k:{}", json!({ "name": name }));
                    let item_set = Self::from_value(item);
                    child.members.insert(item_key.clone());
                    if !item_set.is_empty() {
                        child.children.insert(item_key, item_set);
                    }
                }
                self.children.insert(key, child);
            }
            Value::Array(items) if !items.is_empty() && items.iter().all(is_scalar) => {
                let mut child = FieldSet::default();
                for item in items {
                    child.members.insert(format!("v:{}", item));
                }
                self.children.insert(key, child);
            }
            _ => {
                self.members.insert(key);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty() && self.children.is_empty()
    }

    pub fn members(&self) -> &BTreeSet<String> {
        &self.members
    }

    pub fn children(&self) -> &BTreeMap<String, FieldSet> {
        &self.children
    }

    pub fn union(&self, other: &FieldSet) -> FieldSet {
        let mut out = self.clone();
        out.members.extend(other.members.iter().cloned());
        for (key, child) in &other.children {
            let merged = match out.children.get(key) {
                Some(existing) => existing.union(child),
                None => child.clone(),
            };
            out.children.insert(key.clone(), merged);
        }
        out
    }

    /// Paths in `self` that are not in `other`
    pub fn difference(&self, other: &FieldSet) -> FieldSet {
        let members = self.members.difference(&other.members).cloned().collect();
        let mut children = BTreeMap::new();
        for (key, child) in &self.children {
            let rest = match other.children.get(key) {
                Some(theirs) => child.difference(theirs),
                None => child.clone(),
            };
            if !rest.is_empty() {
                children.insert(key.clone(), rest);
            }
        }
        FieldSet { members, children }
    }

    /// Every member path, root first
    pub fn paths(&self) -> Vec<Vec<String>> {
        let mut out = Vec::new();
        self.collect_paths(&mut Vec::new(), &mut out);
        out
    }

    fn collect_paths(&self, prefix: &mut Vec<String>, out: &mut Vec<Vec<String>>) {
        for member in &self.members {
            let mut path = prefix.clone();
            path.push(member.clone());
            out.push(path);
        }
        for (key, child) in &self.children {
            prefix.push(key.clone());
            child.collect_paths(prefix, out);
            prefix.pop();
        }
    }

    pub fn to_fields_v1(&self) -> Value {
        let mut map = Map::new();
        for member in &self.members {
            if !self.children.contains_key(member) {
                map.insert(member.clone(), Value::Object(Map::new()));
            }
        }
        for (key, child) in &self.children {
            let mut sub = child.to_fields_v1();
            if self.members.contains(key) {
                if let Some(sub) = sub.as_object_mut() {
                    sub.insert(".".to_string(), Value::Object(Map::new()));
                }
            }
            map.insert(key.clone(), sub);
        }
        Value::Object(map)
    }
}

fn has_name_key(item: &Value) -> bool {
    item.get("name").is_some_and(Value::is_string)
}

fn is_scalar(item: &Value) -> bool {
    matches!(item, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

/// Fieldset of a ledger entry; an entry without one owns nothing
pub fn entry_fieldset(entry: &ManagedFieldsEntry) -> Result<FieldSet> {
    match &entry.fields_v1 {
        Some(FieldsV1(value)) => FieldSet::from_fields_v1(value),
        None => Ok(FieldSet::default()),
    }
}

/// Parse `metadata.managedFields` of a live object
pub fn parse_entries(value: Option<&Value>) -> Result<Vec<ManagedFieldsEntry>> {
    match value {
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|e| KubeError::ManagedFields(format!("malformed managedFields: {}", e))),
        None => Ok(Vec::new()),
    }
}

/// Fieldset our manager claims through apply in the given ledger
pub fn applied_fieldset(entries: &[ManagedFieldsEntry]) -> Result<Option<FieldSet>> {
    let mut found: Option<FieldSet> = None;
    for entry in entries.iter().filter(|e| is_own_subresource(e) && is_own_apply(e)) {
        let set = entry_fieldset(entry)?;
        found = Some(match found {
            Some(acc) => acc.union(&set),
            None => set,
        });
    }
    Ok(found)
}

fn is_own_subresource(entry: &ManagedFieldsEntry) -> bool {
    entry.subresource.as_deref().unwrap_or("").is_empty()
}

fn is_own_apply(entry: &ManagedFieldsEntry) -> bool {
    entry.manager.as_deref() == Some(FIELD_MANAGER)
        && entry.operation.as_deref() == Some(APPLY_OPERATION)
}

/// Entries whose fields are folded into ours and then dropped
fn is_folded(entry: &ManagedFieldsEntry) -> bool {
    match entry.manager.as_deref() {
        Some(FIELD_MANAGER) => entry.operation.as_deref() != Some(APPLY_OPERATION),
        Some(LEGACY_EDIT_MANAGER) => true,
        Some(manager) => manager.starts_with(DEPRECATED_MANAGER_PREFIX),
        None => false,
    }
}

/// Outcome of [`reconcile_entries`]
#[derive(Debug, Clone)]
pub struct ManagedFieldsFix {
    pub entries: Vec<ManagedFieldsEntry>,
    pub changed: bool,
}

impl ManagedFieldsFix {
    /// Merge patch replacing only `metadata.managedFields`
    pub fn patch(&self) -> Result<Value> {
        Ok(json!({ "metadata": { "managedFields": serde_json::to_value(&self.entries)? } }))
    }
}

/// Rewrite a ledger so our `Apply` entry exclusively owns what it declares
pub fn reconcile_entries(entries: &[ManagedFieldsEntry]) -> Result<ManagedFieldsFix> {
    let mut own = FieldSet::default();
    let mut api_version = None;
    for entry in entries.iter().filter(|e| is_own_subresource(e)) {
        if is_own_apply(entry) || is_folded(entry) {
            own = own.union(&entry_fieldset(entry)?);
            if api_version.is_none() {
                api_version = entry.api_version.clone();
            }
        }
    }

    let mut out = Vec::with_capacity(entries.len() + 1);
    let mut placed = false;
    for entry in entries {
        if !is_own_subresource(entry) {
            out.push(entry.clone());
        } else if is_own_apply(entry) {
            if !placed && own.is_empty() {
                out.push(entry.clone());
            } else if !placed {
                out.push(ManagedFieldsEntry {
                    fields_type: Some(FIELDS_TYPE.to_string()),
                    fields_v1: Some(FieldsV1(own.to_fields_v1())),
                    ..entry.clone()
                });
            }
            placed = true;
        } else if is_folded(entry) {
            tracing::debug!(manager = ?entry.manager, "folding legacy field manager");
        } else {
            let rest = entry_fieldset(entry)?.difference(&own);
            if !rest.is_empty() {
                out.push(ManagedFieldsEntry {
                    fields_v1: Some(FieldsV1(rest.to_fields_v1())),
                    ..entry.clone()
                });
            }
        }
    }

    if !placed && !own.is_empty() {
        out.push(ManagedFieldsEntry {
            api_version,
            fields_type: Some(FIELDS_TYPE.to_string()),
            fields_v1: Some(FieldsV1(own.to_fields_v1())),
            manager: Some(FIELD_MANAGER.to_string()),
            operation: Some(APPLY_OPERATION.to_string()),
            subresource: None,
            time: None,
        });
    }

    let changed = !same_ledger(entries, &out)?;
    Ok(ManagedFieldsFix { entries: out, changed })
}

/// Reconcile the ledger of a live object
pub fn reconcile(live: &RemoteResource) -> Result<ManagedFieldsFix> {
    let entries = parse_entries(live.managed_fields())?;
    reconcile_entries(&entries)
}

/// Compare ledgers by meaning, ignoring key order and timestamps
fn same_ledger(a: &[ManagedFieldsEntry], b: &[ManagedFieldsEntry]) -> Result<bool> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(b) {
        if x.manager != y.manager
            || x.operation != y.operation
            || x.subresource.as_deref().unwrap_or("") != y.subresource.as_deref().unwrap_or("")
            || entry_fieldset(x)? != entry_fieldset(y)?
        {
            return Ok(false);
        }
    }
    Ok(true)
}
