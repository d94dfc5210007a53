//! Error types for rudder-kube

use thiserror::Error;

/// Result type for rudder-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Substrings the API server uses when rejecting a change to an immutable field
const IMMUTABLE_FIELD_MESSAGES: &[&str] = &[
    "field is immutable",
    "updates to statefulset spec for fields other than",
];

/// Errors that can occur during Kubernetes operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// The object does not exist
    #[error("{resource} not found")]
    NotFound { resource: String },

    /// The resource type is unknown to the cluster (yet)
    #[error("no resource type {kind} in {api_version} known to the cluster")]
    NoSuchKind { api_version: String, kind: String },

    /// The server refused to change an immutable field
    #[error("cannot modify immutable field in {resource}: {message}\nHint: mark the resource with rudder.io/delete-policy: before-creation to recreate it")]
    Immutable { resource: String, message: String },

    /// A resource declares invalid configuration
    #[error("validation failed: {0}")]
    Validation(#[from] rudder_core::CoreError),

    /// The same resource is declared twice in a release
    #[error("resource {resource} is declared more than once")]
    Duplicate { resource: String },

    /// The release namespace is among the release's own resources
    #[error("release namespace '{namespace}' cannot be deployed as a part of the release")]
    ReleaseNamespaceManaged { namespace: String },

    /// Existing resources are owned by someone else
    #[error("{count} resource(s) cannot be adopted by the release:\n{details}\nHint: set forceAdoption to take them over")]
    NotAdoptable { count: usize, details: String },

    /// Kubernetes API error, with the operation and resource it happened on
    #[error("{operation} {resource}: {source}")]
    Api {
        operation: &'static str,
        resource: String,
        #[source]
        source: kube::Error,
    },

    /// A failure replayed from the cluster cache
    #[error("{operation} {resource}: {message}")]
    Cached {
        operation: &'static str,
        resource: String,
        message: String,
    },

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Structural comparison failed
    #[error("diff error: {0}")]
    Diff(String),

    /// Malformed field ownership ledger
    #[error("managed fields error: {0}")]
    ManagedFields(String),

    /// A context-free failure, tagged with the resource it happened on
    #[error("{operation} {resource}: {source}")]
    Resource {
        operation: &'static str,
        resource: String,
        #[source]
        source: Box<KubeError>,
    },

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::NotFound { .. })
    }

    pub fn is_no_such_kind(&self) -> bool {
        matches!(self, KubeError::NoSuchKind { .. })
    }

    /// The object is not there, either because it does not exist or
    /// because its type is not known yet
    pub fn is_absent(&self) -> bool {
        self.is_not_found() || self.is_no_such_kind()
    }

    pub fn is_immutable(&self) -> bool {
        matches!(self, KubeError::Immutable { .. })
    }

    /// Wrap with the operation and resource, for errors raised without them
    pub fn for_resource(self, operation: &'static str, resource: &str) -> Self {
        KubeError::Resource {
            operation,
            resource: resource.to_string(),
            source: Box::new(self),
        }
    }
}

/// Sort a raw API failure into the error taxonomy
pub fn classify_api_error(error: kube::Error, operation: &'static str, resource: &str) -> KubeError {
    if let kube::Error::Api(resp) = &error {
        if resp.code == 404 {
            return KubeError::NotFound {
                resource: resource.to_string(),
            };
        }
        if IMMUTABLE_FIELD_MESSAGES
            .iter()
            .any(|m| resp.message.contains(m))
        {
            return KubeError::Immutable {
                resource: resource.to_string(),
                message: resp.message.clone(),
            };
        }
    }

    KubeError::Api {
        operation,
        resource: resource.to_string(),
        source: error,
    }
}

/// A cacheable snapshot of an error
///
/// `kube::Error` is not `Clone`, so the cache stores the class of the error
/// plus its rendered message and rebuilds a [`KubeError`] on every replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedError {
    NotFound { resource: String },
    NoSuchKind { api_version: String, kind: String },
    Immutable { resource: String, message: String },
    Other {
        operation: &'static str,
        resource: String,
        message: String,
    },
}

impl CachedError {
    pub fn from_error(error: &KubeError, operation: &'static str, resource: &str) -> Self {
        match error {
            KubeError::NotFound { resource } => CachedError::NotFound {
                resource: resource.clone(),
            },
            KubeError::NoSuchKind { api_version, kind } => CachedError::NoSuchKind {
                api_version: api_version.clone(),
                kind: kind.clone(),
            },
            KubeError::Immutable { resource, message } => CachedError::Immutable {
                resource: resource.clone(),
                message: message.clone(),
            },
            KubeError::Api {
                operation: failed_op,
                source,
                ..
            } => CachedError::Other {
                operation: *failed_op,
                resource: resource.to_string(),
                message: source.to_string(),
            },
            other => CachedError::Other {
                operation,
                resource: resource.to_string(),
                message: other.to_string(),
            },
        }
    }

    pub fn replay(&self) -> KubeError {
        match self.clone() {
            CachedError::NotFound { resource } => KubeError::NotFound { resource },
            CachedError::NoSuchKind { api_version, kind } => {
                KubeError::NoSuchKind { api_version, kind }
            }
            CachedError::Immutable { resource, message } => {
                KubeError::Immutable { resource, message }
            }
            CachedError::Other {
                operation,
                resource,
                message,
            } => KubeError::Cached {
                operation,
                resource,
                message,
            },
        }
    }
}
