use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::time::Duration;

use crate::entry::DurableStoreEntry;
use crate::error::DurableStoreError;
use crate::error::ValidationError;
use crate::key::UI_API_NAMESPACE;
use crate::request::ErrorResponse;
use crate::request::ResourceRequest;
use crate::request::ResourceResponse;
use crate::types::IngestPath;
use crate::types::MergeStrategy;

/// Describes one entity type to the store: how it is keyed, which of its properties nest other entities, and how
/// fresh data is reconciled with stored data.
pub trait Representation: Debug + Send + Sync + 'static {
    fn namespace(&self) -> &'static str {
        UI_API_NAMESPACE
    }

    fn type_name(&self) -> &'static str;

    /// Cache key of a denormalized input. `None` if the input lacks its identifying attributes.
    fn key_of(&self, input: &Value) -> Option<String>;

    /// How long an ingested entry stays fresh.
    fn ttl(&self) -> Duration;

    fn merge_strategy(&self) -> MergeStrategy {
        MergeStrategy::VersionGated
    }

    /// Property carrying the weak etag.
    fn version_property(&self) -> Option<&'static str> {
        None
    }

    /// Property holding a map of `{ value, displayValue }` field wrappers.
    fn fields_property(&self) -> Option<&'static str> {
        None
    }

    /// Representation of entities found in field values (spanning relationships).
    fn spanning_representation(&self) -> Option<&dyn Representation> {
        None
    }

    /// Representation of entities nested directly under `property`, alone or as an array.
    fn child_representation(&self, _property: &str) -> Option<&dyn Representation> {
        None
    }

    /// Shape check of an incoming payload.
    fn validate(&self, _input: &Value, _path: &IngestPath) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Transport used to fulfil resource requests.
#[async_trait]
pub trait NetworkAdapter: Send + Sync + 'static {
    async fn dispatch(&self, request: ResourceRequest) -> Result<ResourceResponse, ErrorResponse>;
}

/// Persistent storage consulted when the in-memory store misses.
#[async_trait]
pub trait DurableStore: Send + Sync + 'static {
    /// Fetch entries for the given keys. Keys without a durable entry are simply absent from the map; `None` means
    /// nothing was found at all.
    async fn get_entries(&self, keys: &[String]) -> Result<Option<HashMap<String, DurableStoreEntry>>, DurableStoreError>;

    async fn set_entries(&self, entries: HashMap<String, DurableStoreEntry>) -> Result<(), DurableStoreError>;

    async fn evict_entries(&self, keys: &[String]) -> Result<(), DurableStoreError>;
}

/// Hooks into store activity. All methods default to no-ops.
pub trait StoreObserver: Send + Sync + 'static {
    fn on_broadcast(&self, _keys: &[String]) {}
    fn on_locked(&self, _key: &str) {}
    fn on_evict(&self, _key: &str) {}
    fn on_warning(&self, _message: &str) {}
}
