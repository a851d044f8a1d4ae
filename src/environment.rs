use fieldx_plus::fx_plus;
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use crate::config::Settings;
use crate::dedupe::RequestDeduper;
use crate::entry::DurableStoreEntry;
use crate::error::StoreError;
use crate::representation::RecordDefaultsRepresentation;
use crate::representation::RecordRepresentation;
use crate::request::ErrorResponse;
use crate::request::ResourceRequest;
use crate::request::ResourceResponse;
use crate::revive::revive_for_payload;
use crate::revive::revive_snapshot;
use crate::revive::ReviveReport;
use crate::selector::Selector;
use crate::selector::Snapshot;
use crate::store::Change;
use crate::store::Store;
use crate::throttle::throttle;
use crate::throttle::ThrottleOptions;
use crate::throttle::Throttled;
use crate::traits::DurableStore;
use crate::traits::NetworkAdapter;
use crate::traits::Representation;
use crate::types::now_millis;
use crate::types::IngestOutcome;

/// Everything adapters talk to: the store, the network and, optionally, a durable store.
///
/// The environment's [`Settings`] govern the merge policy of the store it is built with. The store's capacity is
/// fixed when the store is built; [`Settings::store_builder`] produces a store matching the settings.
///
/// ```ignore
/// let env = Environment::builder()
///     .store(Store::builder().build()?)
///     .network(Arc::new(MyTransport::new()))
///     .durable_store(Arc::new(MyDurable::open(path)?))
///     .build()?;
/// let snapshot = adapters::get_record(&env, &json!({"recordId": id, "fields": ["Account.Name"]}), CachePolicy::default()).await?;
/// ```
#[fx_plus(
    parent,
    no_new,
    default(off),
    sync,
    builder(
        doc("Builder object of [`Environment`].", "", "See [`Environment::builder()`] method."),
        method_doc("Implement builder pattern for [`Environment`]."),
        post_build,
    )
)]
pub struct Environment {
    #[fieldx(builder(vis(pub), required), get(clone))]
    store: Arc<Store>,

    #[fieldx(builder(vis(pub), required), get(clone))]
    network: Arc<dyn NetworkAdapter>,

    /// Persistence consulted on in-memory misses. Without it the environment is memory-only.
    #[fieldx(optional, get(clone))]
    durable_store: Arc<dyn DurableStore>,

    #[fieldx(get, default(Settings::default()))]
    settings: Settings,

    #[fieldx(vis(pub(crate)), lazy, get(clone), builder(off))]
    deduper: Arc<RequestDeduper>,

    #[fieldx(lazy, get(clone), builder(off))]
    record_representation: Arc<RecordRepresentation>,

    #[fieldx(lazy, get(clone), builder(off))]
    defaults_representation: Arc<RecordDefaultsRepresentation>,

    #[fieldx(private, lazy, get(clone), builder(off))]
    warnings: Option<Arc<Throttled<String, ()>>>,
}

impl Environment {
    fn post_build(self) -> Self {
        let policy = self.settings().merge_policy();
        if self.store().merge_policy() != policy {
            debug!("applying merge policy {policy:?} to store '{}'", self.store().name());
            self.store().set_merge_policy(policy);
        }
        self
    }

    fn build_deduper(&self) -> Arc<RequestDeduper> {
        Arc::new(RequestDeduper::new(self.network()))
    }

    fn build_record_representation(&self) -> Arc<RecordRepresentation> {
        Arc::new(RecordRepresentation::new(self.settings().record_ttl()))
    }

    fn build_defaults_representation(&self) -> Arc<RecordDefaultsRepresentation> {
        Arc::new(RecordDefaultsRepresentation::new(self.settings().template_ttl()))
    }

    fn build_warnings(&self) -> Option<Arc<Throttled<String, ()>>> {
        let settings = self.settings();
        let store = Arc::downgrade(&self.store());
        let suppressed = Arc::new(AtomicU64::new(0));
        let dropped = Arc::clone(&suppressed);

        throttle(
            settings.warning_invoke_limit,
            settings.warning_window(),
            move |message: String| {
                match suppressed.swap(0, Ordering::Relaxed) {
                    0 => warn!("{message}"),
                    n => warn!("{message} ({n} similar warning(s) suppressed)"),
                }
                if let Some(store) = store.upgrade() {
                    store.notify_warning(&message);
                }
            },
            ThrottleOptions::default().on_drop(move |_| {
                dropped.fetch_add(1, Ordering::Relaxed);
            }),
        )
        .ok()
        .map(Arc::new)
    }

    /// Rate-limited warning. Falls back to plain logging when the limiter is misconfigured.
    pub fn warn(&self, message: String) {
        match self.warnings() {
            Some(warnings) => {
                warnings.call(message);
            }
            None => warn!("{message}"),
        }
    }

    pub fn has_durable_store(&self) -> bool {
        self.durable_store().is_some()
    }

    pub fn error_ttl(&self) -> Duration {
        self.settings().error_ttl()
    }

    pub async fn dispatch_resource_request(&self, request: ResourceRequest) -> Result<ResourceResponse, ErrorResponse> {
        self.deduper().dispatch(request).await
    }

    pub fn store_ingest(&self, representation: &dyn Representation, body: &Value) -> Result<IngestOutcome, StoreError> {
        self.store().ingest(representation, body, now_millis())
    }

    pub fn store_ingest_error(&self, key: &str, error: ErrorResponse) -> IngestOutcome {
        self.store().ingest_error(key, error, self.error_ttl(), now_millis())
    }

    pub fn store_lookup(&self, selector: &Selector) -> Snapshot {
        self.store().lookup(selector, now_millis())
    }

    /// Notify subscribers about the accumulated changes and persist newly published entries.
    #[instrument(level = "trace", skip(self))]
    pub async fn store_broadcast(&self) -> BTreeMap<String, Change> {
        let store = self.store();
        let (changes, spilled) = store.broadcast_and_spill(now_millis());

        if let Some(durable) = self.durable_store() {
            // Entries squeezed out of memory by the capacity limit are persisted from what they were at eviction.
            let mut entries = spilled
                .into_iter()
                .map(|(key, entry)| (key, DurableStoreEntry::from(entry)))
                .collect::<HashMap<_, _>>();
            entries.extend(
                changes
                    .iter()
                    .filter(|(_, change)| **change == Change::Published)
                    .filter_map(|(key, _)| store.get(key).map(|e| (key.clone(), DurableStoreEntry::from(e)))),
            );

            if !entries.is_empty() {
                debug!("persisting {} entr(y/ies)", entries.len());
                if let Err(err) = durable.set_entries(entries).await {
                    self.warn(format!("failed to persist store entries: {err}"));
                }
            }
        }

        changes
    }

    /// Evict from memory and from the durable store.
    #[instrument(level = "trace", skip(self))]
    pub async fn store_evict(&self, key: &str) -> bool {
        let evicted = self.store().evict(key);
        if let Some(durable) = self.durable_store() {
            if let Err(err) = durable.evict_entries(&[key.to_string()]).await {
                self.warn(format!("failed to evict '{key}' from the durable store: {err}"));
            }
        }
        evicted
    }

    /// Look up `selector`, consulting the durable store for whatever is missing in memory. Durable failures degrade
    /// to a plain lookup.
    pub async fn revive(&self, selector: &Selector) -> Snapshot {
        let store = self.store();
        let Some(durable) = self.durable_store()
        else {
            return store.lookup(selector, now_millis());
        };

        let snapshot = store.lookup(selector, now_millis());
        if snapshot.is_usable() {
            return snapshot;
        }

        match revive_snapshot(selector, &store, durable.as_ref(), now_millis()).await {
            Ok((snapshot, report)) => {
                self.report_revival(&report);
                snapshot
            }
            Err(err) => {
                self.warn(format!("durable revival of '{}' failed: {err}", selector.key));
                snapshot
            }
        }
    }

    /// Revive the entries a freshly fetched payload is about to merge into.
    pub async fn revive_payload(&self, representation: &dyn Representation, payload: &Value) {
        let Some(durable) = self.durable_store()
        else {
            return;
        };
        match revive_for_payload(representation, payload, &self.store(), durable.as_ref()).await {
            Ok(report) => self.report_revival(&report),
            Err(err) => self.warn(format!("durable revival before ingestion failed: {err}")),
        }
    }

    fn report_revival(&self, report: &ReviveReport) {
        if !report.revived.is_empty() {
            debug!("revived {:?}", report.revived);
        }
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("store", &self.store())
            .field("durable", &self.has_durable_store())
            .field("settings", self.settings())
            .finish()
    }
}
