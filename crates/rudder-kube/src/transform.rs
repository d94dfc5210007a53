//! Manifest transformers
//!
//! Transformers run before validation and may turn one manifest into many.
//! Two of them always run first: [`ResourceListsTransformer`] and
//! [`DropInvalidAnnotationsAndLabelsTransformer`].

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::Result;

/// Rewrites rendered manifests before they become resources
pub trait ResourceTransformer: Send + Sync {
    fn name(&self) -> &'static str;

    fn matches(&self, object: &Value) -> bool;

    fn transform(&self, object: Value) -> Result<Vec<Value>>;
}

/// Run `transformers` in order over every manifest
pub fn run_transformers(objects: Vec<Value>, transformers: &[&dyn ResourceTransformer]) -> Result<Vec<Value>> {
    let mut current = objects;
    for transformer in transformers {
        let mut next = Vec::with_capacity(current.len());
        for object in current {
            if transformer.matches(&object) {
                next.extend(transformer.transform(object)?);
            } else {
                next.push(object);
            }
        }
        current = next;
    }
    Ok(current)
}

/// Expands `*List` kinds (`ConfigMapList`, `List`, ...) into their items
#[derive(Debug, Default, Clone, Copy)]
pub struct ResourceListsTransformer;

impl ResourceTransformer for ResourceListsTransformer {
    fn name(&self) -> &'static str {
        "resource-lists"
    }

    fn matches(&self, object: &Value) -> bool {
        rudder_core::is_list_manifest(object)
    }

    fn transform(&self, object: Value) -> Result<Vec<Value>> {
        match object {
            Value::Object(mut map) => match map.remove("items") {
                Some(Value::Array(items)) => Ok(items.into_iter().filter(|i| !i.is_null()).collect()),
                _ => Ok(Vec::new()),
            },
            _ => Ok(Vec::new()),
        }
    }
}

static QUALIFIED_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9]$").expect("valid regex")
});

static DNS_SUBDOMAIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$").expect("valid regex")
});

static LABEL_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(([A-Za-z0-9][-A-Za-z0-9_.]*)?[A-Za-z0-9])?$").expect("valid regex")
});

/// Kubernetes qualified name: optional DNS-subdomain prefix, `/`, name
pub fn is_qualified_name(key: &str) -> bool {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };
    if let Some(prefix) = prefix {
        if prefix.is_empty() || prefix.len() > 253 || !DNS_SUBDOMAIN.is_match(prefix) {
            return false;
        }
    }
    !name.is_empty() && name.len() <= 63 && QUALIFIED_NAME.is_match(name)
}

pub fn is_valid_label_value(value: &str) -> bool {
    value.len() <= 63 && LABEL_VALUE.is_match(value)
}

/// Drops annotations and labels the API server would reject
#[derive(Debug, Default, Clone, Copy)]
pub struct DropInvalidAnnotationsAndLabelsTransformer;

impl ResourceTransformer for DropInvalidAnnotationsAndLabelsTransformer {
    fn name(&self) -> &'static str {
        "drop-invalid-annotations-and-labels"
    }

    fn matches(&self, object: &Value) -> bool {
        object.get("metadata").is_some_and(Value::is_object)
    }

    fn transform(&self, mut object: Value) -> Result<Vec<Value>> {
        let name = object
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if let Some(annotations) = object
            .pointer_mut("/metadata/annotations")
            .and_then(Value::as_object_mut)
        {
            annotations.retain(|key, value| {
                let keep = is_qualified_name(key) && value.is_string();
                if !keep {
                    tracing::warn!(resource = %name, key = %key, "dropping invalid annotation");
                }
                keep
            });
        }

        if let Some(labels) = object
            .pointer_mut("/metadata/labels")
            .and_then(Value::as_object_mut)
        {
            labels.retain(|key, value| {
                let keep = is_qualified_name(key) && value.as_str().is_some_and(is_valid_label_value);
                if !keep {
                    tracing::warn!(resource = %name, key = %key, "dropping invalid label");
                }
                keep
            });
        }

        Ok(vec![object])
    }
}
