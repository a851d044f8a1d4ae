use std::time::Duration;
use thiserror::Error;

use crate::request::ErrorResponse;

/// Raised when an adapter is invoked without one or more mandatory configuration parameters. This is a programmer
/// error and is never swallowed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("adapter {adapter} configuration must specify {}", .fields.join(", "))]
pub struct MissingFieldsError {
    pub adapter: String,
    /// Always sorted.
    pub fields:  Vec<String>,
}

impl MissingFieldsError {
    pub fn new<S: ToString>(adapter: &str, fields: impl IntoIterator<Item = S>) -> Self {
        let mut fields = fields.into_iter().map(|f| f.to_string()).collect::<Vec<_>>();
        fields.sort();
        Self {
            adapter: adapter.to_string(),
            fields,
        }
    }
}

/// Malformed payload shape. Only produced by builds with debug assertions enabled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid payload at '{path}': {message}")]
pub struct ValidationError {
    pub path:    String,
    pub message: String,
}

impl ValidationError {
    pub fn new<P: ToString, M: ToString>(path: P, message: M) -> Self {
        Self {
            path:    path.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("throttle requires a positive invoke limit and time limit, got {invoke_limit} and {time_limit:?}")]
pub struct ThrottleError {
    pub invoke_limit: u32,
    pub time_limit:   Duration,
}

#[derive(Debug, Error)]
pub enum DurableStoreError {
    #[error("durable store backend failure: {0}")]
    Backend(String),
    #[error("durable store entry cannot be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("cannot derive a cache key for {type_name} at '{path}'")]
    NoKey { type_name: String, path: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Config(#[from] MissingFieldsError),
    #[error(transparent)]
    Network(#[from] ErrorResponse),
    #[error(transparent)]
    Store(#[from] StoreError),
}
