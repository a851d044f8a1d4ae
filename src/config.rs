use serde::Deserialize;
use serde::Serialize;
use std::time::Duration;

use crate::store::Store;
use crate::store::StoreBuilder;
use crate::types::MergePolicy;

/// Tunables in data form. Every field has a default, so a partial or even an empty JSON object is a valid
/// configuration.
///
/// ```ignore
/// let settings = Settings::from_json(r#"{"max_capacity": 50000, "error_ttl_ms": 60000}"#)?;
/// let store = settings.store_builder().name("records").build()?;
/// let env = Environment::builder().store(store).network(network).settings(settings).build()?;
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Resident entry limit of the store. `None` keeps every entry until it is explicitly evicted.
    pub max_capacity:         Option<u64>,
    pub record_ttl_ms:        u64,
    pub template_ttl_ms:      u64,
    /// How long cacheable error responses are remembered.
    pub error_ttl_ms:         u64,
    pub retain_display_value: bool,
    /// Warnings allowed per window before the rest are dropped.
    pub warning_invoke_limit: u32,
    pub warning_window_ms:    u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_capacity:         None,
            record_ttl_ms:        30_000,
            template_ttl_ms:      900_000,
            error_ttl_ms:         30_000,
            retain_display_value: true,
            warning_invoke_limit: 5,
            warning_window_ms:    10_000,
        }
    }
}

impl Settings {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// A store builder preconfigured with the capacity and merge policy of these settings.
    pub fn store_builder(&self) -> StoreBuilder {
        Store::builder()
            .max_capacity(self.max_capacity)
            .merge_policy(self.merge_policy())
    }

    pub fn merge_policy(&self) -> MergePolicy {
        MergePolicy {
            retain_display_value: self.retain_display_value,
        }
    }

    pub fn record_ttl(&self) -> Duration {
        Duration::from_millis(self.record_ttl_ms)
    }

    pub fn template_ttl(&self) -> Duration {
        Duration::from_millis(self.template_ttl_ms)
    }

    pub fn error_ttl(&self) -> Duration {
        Duration::from_millis(self.error_ttl_ms)
    }

    pub fn warning_window(&self) -> Duration {
        Duration::from_millis(self.warning_window_ms)
    }
}
