//! Reconciliation settings

use std::collections::BTreeMap;
use std::path::Path;

use kube::api::PropagationPolicy;
use serde::{Deserialize, Serialize};

use crate::client::DeleteOptions;
use crate::error::{KubeError, Result};

/// Default ceiling on concurrent cluster requests per pass
pub const DEFAULT_NETWORK_PARALLELISM: usize = 30;

/// How dependents are removed when an object is deleted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DeletePropagation {
    #[default]
    Foreground,
    Background,
    Orphan,
}

impl From<DeletePropagation> for PropagationPolicy {
    fn from(p: DeletePropagation) -> Self {
        match p {
            DeletePropagation::Foreground => PropagationPolicy::Foreground,
            DeletePropagation::Background => PropagationPolicy::Background,
            DeletePropagation::Orphan => PropagationPolicy::Orphan,
        }
    }
}

/// Settings shared by every reconciliation pass of a process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconcileConfig {
    /// Upper bound of workers per resource category
    pub network_parallelism: usize,

    /// Take over existing resources owned by another release
    pub force_adoption: bool,

    pub delete_propagation: DeletePropagation,

    /// Annotations added to every resource of the release
    pub extra_annotations: BTreeMap<String, String>,

    /// Labels added to every resource of the release
    pub extra_labels: BTreeMap<String, String>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            network_parallelism: DEFAULT_NETWORK_PARALLELISM,
            force_adoption: false,
            delete_propagation: DeletePropagation::default(),
            extra_annotations: BTreeMap::new(),
            extra_labels: BTreeMap::new(),
        }
    }
}

impl ReconcileConfig {
    /// Load settings from a YAML file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Options for deletions issued on behalf of this release
    pub fn delete_options(&self) -> DeleteOptions {
        DeleteOptions {
            propagation_policy: self.delete_propagation.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.network_parallelism == 0 {
            return Err(KubeError::InvalidConfig(
                "networkParallelism must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
