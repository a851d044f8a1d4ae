use crate::value::StoreLink;
use serde::Deserialize;
use serde::Serialize;
use std::fmt::Debug;
use std::fmt::Display;

/// The result of ingesting an entity under its key.
#[derive(Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Inserted(StoreLink),
    ReplacedWith(StoreLink),
    /// Merged data equals what is stored. Nothing is published.
    Unchanged(StoreLink),
    /// The stored entry is locked and has been left untouched.
    Locked(StoreLink),
}

impl IngestOutcome {
    pub fn link(&self) -> &StoreLink {
        match self {
            Self::Inserted(l) | Self::ReplacedWith(l) | Self::Unchanged(l) | Self::Locked(l) => l,
        }
    }

    pub fn into_link(self) -> StoreLink {
        match self {
            Self::Inserted(l) | Self::ReplacedWith(l) | Self::Unchanged(l) | Self::Locked(l) => l,
        }
    }

    /// `true` if the store content has changed and dependent readers must be notified.
    pub fn is_published(&self) -> bool {
        matches!(self, Self::Inserted(_) | Self::ReplacedWith(_))
    }
}

impl Debug for IngestOutcome {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Inserted(l) => fmt.debug_tuple("IngestOutcome::Inserted").field(l).finish(),
            Self::ReplacedWith(l) => fmt.debug_tuple("IngestOutcome::ReplacedWith").field(l).finish(),
            Self::Unchanged(l) => fmt.debug_tuple("IngestOutcome::Unchanged").field(l).finish(),
            Self::Locked(l) => fmt.debug_tuple("IngestOutcome::Locked").field(l).finish(),
        }
    }
}

/// How incoming data is reconciled with a stored entity of the same key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeStrategy {
    /// Field-by-field merge gated by the container's weak etag.
    VersionGated,
    /// Union of fields keyed by name, incoming values override. Used by loosely structured templates.
    ShallowUnion,
}

/// Tunables of the merge resolver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePolicy {
    /// Keep a stored non-null `displayValue` when the incoming one is null. This works around responses which
    /// temporarily omit display values; it is not a general correctness rule.
    pub retain_display_value: bool,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            retain_display_value: true,
        }
    }
}

/// Location of a value in the payload being ingested, used in diagnostics.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestPath {
    full_path: String,
}

impl IngestPath {
    pub fn root<S: Into<String>>(key: S) -> Self {
        Self { full_path: key.into() }
    }

    pub fn child(&self, property: &str) -> Self {
        Self {
            full_path: format!("{}__{property}", self.full_path),
        }
    }

    pub fn full_path(&self) -> &str {
        &self.full_path
    }
}

impl Display for IngestPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full_path)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotState {
    Fulfilled,
    /// Some of the requested data is not in the store.
    Unfulfilled,
    /// All data is present but at least one entry has expired.
    Stale,
    Error,
}

/// Where an adapter call is allowed to get its data from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CachePolicy {
    #[default]
    CacheThenNetwork,
    OnlyIfCached,
    NoCache,
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}
