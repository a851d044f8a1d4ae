use crate::request::ErrorResponse;
use crate::value::NormalizedEntity;
use serde::Deserialize;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum EntryData {
    Entity(Arc<NormalizedEntity>),
    Error(Arc<ErrorResponse>),
}

impl EntryData {
    pub fn as_entity(&self) -> Option<&NormalizedEntity> {
        match self {
            Self::Entity(e) => Some(e),
            Self::Error(_) => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub ingestion_timestamp:  u64,
    pub expiration_timestamp: u64,
    /// Type name of the representation the entry was ingested with.
    pub representation:       String,
    /// Name of the property holding field-value wrappers, if the representation has one.
    pub fields_property:      Option<String>,
    #[serde(default)]
    pub locked:               bool,
}

impl StoreMetadata {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expiration_timestamp <= now
    }
}

/// A value of the store: normalized data plus its bookkeeping.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreEntry {
    pub data:     EntryData,
    pub metadata: StoreMetadata,
}

impl StoreEntry {
    pub fn entity(&self) -> Option<&NormalizedEntity> {
        self.data.as_entity()
    }

    pub fn error(&self) -> Option<&ErrorResponse> {
        match &self.data {
            EntryData::Error(e) => Some(e),
            EntryData::Entity(_) => None,
        }
    }

    pub fn is_locked(&self) -> bool {
        self.metadata.locked
    }
}

impl Debug for StoreEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreEntry")
            .field("data", &self.data)
            .field("expiration", &self.metadata.expiration_timestamp)
            .field("locked", &self.metadata.locked)
            .finish()
    }
}

/// Persisted form of a store entry. Keys are the in-memory keys.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DurableStoreEntry {
    pub data:     EntryData,
    pub metadata: Option<StoreMetadata>,
}

impl DurableStoreEntry {
    pub fn expiration(&self) -> Option<u64> {
        self.metadata.as_ref().map(|m| m.expiration_timestamp)
    }
}

impl From<StoreEntry> for DurableStoreEntry {
    fn from(entry: StoreEntry) -> Self {
        Self {
            data:     entry.data,
            metadata: Some(entry.metadata),
        }
    }
}
