//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid annotation {key}={value:?} on {resource}: {reason}")]
    InvalidAnnotation {
        resource: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("Invalid resource {resource}: {reason}")]
    InvalidResource { resource: String, reason: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl CoreError {
    pub(crate) fn annotation(
        resource: impl Into<String>,
        key: &str,
        value: &str,
        reason: impl Into<String>,
    ) -> Self {
        CoreError::InvalidAnnotation {
            resource: resource.into(),
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
