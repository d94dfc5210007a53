//! Resource patchers
//!
//! Patchers run after validation, at two points: *releasable* patchers shape
//! what the release records as its own resources, *deployable* patchers
//! shape what is actually sent to the cluster.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde_json::{Map, Value};

use rudder_core::ResourceIdentity;
use rudder_core::annotations::helm;

use crate::error::Result;

/// Which list a resource belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceCategory {
    StandaloneCrd,
    Hook,
    General,
}

/// What a patcher gets to look at before deciding to patch
#[derive(Debug, Clone, Copy)]
pub struct PatchTarget<'a> {
    pub identity: &'a ResourceIdentity,
    pub object: &'a Value,
    pub category: ResourceCategory,
}

pub trait ResourcePatcher: Send + Sync {
    fn name(&self) -> &'static str;

    fn matches(&self, target: &PatchTarget<'_>) -> bool;

    fn patch(&self, object: &mut Value) -> Result<()>;
}

/// Run matching patchers in order; the object is copied on the first match only
pub fn run_patchers<'a>(
    identity: &ResourceIdentity,
    object: &'a Value,
    category: ResourceCategory,
    patchers: &[&dyn ResourcePatcher],
) -> Result<Cow<'a, Value>> {
    let mut current = Cow::Borrowed(object);
    for patcher in patchers {
        let target = PatchTarget {
            identity,
            object: current.as_ref(),
            category,
        };
        if patcher.matches(&target) {
            tracing::trace!(resource = %identity, patcher = patcher.name(), "patching resource");
            patcher.patch(current.to_mut())?;
        }
    }
    Ok(current)
}

fn metadata_map<'a>(object: &'a mut Value, field: &str) -> Option<&'a mut Map<String, Value>> {
    let metadata = object
        .as_object_mut()?
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()?;
    let entry = metadata
        .entry(field)
        .or_insert_with(|| Value::Object(Map::new()));
    if entry.is_null() {
        *entry = Value::Object(Map::new());
    }
    entry.as_object_mut()
}

/// Adds configured annotations and labels without overriding declared ones
#[derive(Debug, Clone, Default)]
pub struct ExtraMetadataPatcher {
    annotations: BTreeMap<String, String>,
    labels: BTreeMap<String, String>,
}

impl ExtraMetadataPatcher {
    pub fn new(annotations: BTreeMap<String, String>, labels: BTreeMap<String, String>) -> Self {
        Self { annotations, labels }
    }

    pub fn is_noop(&self) -> bool {
        self.annotations.is_empty() && self.labels.is_empty()
    }
}

impl ResourcePatcher for ExtraMetadataPatcher {
    fn name(&self) -> &'static str {
        "extra-metadata"
    }

    fn matches(&self, target: &PatchTarget<'_>) -> bool {
        !self.is_noop() && target.category != ResourceCategory::StandaloneCrd
    }

    fn patch(&self, object: &mut Value) -> Result<()> {
        for (field, extra) in [("annotations", &self.annotations), ("labels", &self.labels)] {
            if extra.is_empty() {
                continue;
            }
            if let Some(map) = metadata_map(object, field) {
                for (key, value) in extra {
                    map.entry(key.clone())
                        .or_insert_with(|| Value::String(value.clone()));
                }
            }
        }
        Ok(())
    }
}

/// Marks general resources as owned by the release
#[derive(Debug, Clone)]
pub struct ReleaseMetadataPatcher {
    release_name: String,
    release_namespace: String,
}

impl ReleaseMetadataPatcher {
    pub fn new(release_name: impl Into<String>, release_namespace: impl Into<String>) -> Self {
        Self {
            release_name: release_name.into(),
            release_namespace: release_namespace.into(),
        }
    }
}

impl ResourcePatcher for ReleaseMetadataPatcher {
    fn name(&self) -> &'static str {
        "release-metadata"
    }

    fn matches(&self, target: &PatchTarget<'_>) -> bool {
        target.category == ResourceCategory::General
    }

    fn patch(&self, object: &mut Value) -> Result<()> {
        if let Some(annotations) = metadata_map(object, "annotations") {
            annotations.insert(
                helm::RELEASE_NAME.to_string(),
                Value::String(self.release_name.clone()),
            );
            annotations.insert(
                helm::RELEASE_NAMESPACE.to_string(),
                Value::String(self.release_namespace.clone()),
            );
        }
        if let Some(labels) = metadata_map(object, "labels") {
            labels.insert(
                helm::MANAGED_BY_LABEL.to_string(),
                Value::String(helm::MANAGED_BY_VALUE.to_string()),
            );
        }
        Ok(())
    }
}
