use crate::entry::EntryData;
use crate::entry::StoreEntry;
use crate::entry::StoreMetadata;
use crate::error::StoreError;
use crate::merge::merge;
use crate::merge::MergeContext;
use crate::merge::MergeOutcome;
use crate::normalize::normalize;
use crate::request::ErrorResponse;
use crate::selector::Reader;
use crate::selector::Selector;
use crate::selector::Snapshot;
use crate::selector::Subscription;
use crate::traits::Representation;
use crate::traits::StoreObserver;
use crate::types::IngestOutcome;
use crate::types::IngestPath;
use crate::types::MergePolicy;
use crate::value::FieldsTrie;
use crate::value::StoreLink;
use fieldx_plus::fx_plus;
use moka::ops::compute::CompResult;
use moka::notification::RemovalCause;
use moka::ops::compute::Op;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::instrument;
use tracing::trace;

/// What happened to a key since the last broadcast.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Change {
    /// Written by ingestion.
    Published,
    /// Written by durable revival. Such entries are already persisted.
    Revived,
    Evicted,
}

pub(crate) struct SubscriptionState {
    pub(crate) selector: Selector,
    pub(crate) last:     Snapshot,
    pub(crate) sender:   mpsc::UnboundedSender<Snapshot>,
}

/// The normalized in-memory store.
///
/// Every write goes through a per-key atomic compute on the underlying [moka](https://crates.io/crates/moka) cache,
/// hence merges of concurrent ingestions of the same key are strictly ordered and never lost.
///
/// ```ignore
/// let store = Store::builder().name("records").max_capacity(50_000).build()?;
/// let link = store.ingest(&RecordRepresentation::default(), &payload, now_millis())?;
/// let snapshot = store.lookup(&Selector::new(link.link().key().unwrap()), now_millis());
/// ```
#[fx_plus(
    parent,
    no_new,
    default(off),
    sync,
    builder(
        doc("Builder object of [`Store`].", "", "See [`Store::builder()`] method."),
        method_doc("Implement builder pattern for [`Store`]."),
    )
)]
pub struct Store {
    /// Store name. Most useful for debugging and logging.
    #[fieldx(lock, optional, clearer, get(off))]
    name: &'static str,

    /// Upper bound of resident entries. Unbounded by default; when set, least recently used entries are dropped
    /// first and reported as evicted.
    #[fieldx(get(copy), builder(into), default(None))]
    max_capacity: Option<u64>,

    #[fieldx(lock, get(copy), set, default(MergePolicy::default()))]
    merge_policy: MergePolicy,

    #[fieldx(vis(pub(crate)), lazy, lock, clearer(private), get(clone), builder(off))]
    cache: Arc<Cache<String, StoreEntry>>,

    // Keys changed since the last broadcast.
    #[fieldx(private, lock, get, get_mut, builder(off), default(HashMap::new()))]
    pending: HashMap<String, Change>,

    // Published entries pushed out by the capacity limit before a broadcast could persist them.
    #[fieldx(private, lock, get, get_mut, builder(off), default(HashMap::new()))]
    spilled: HashMap<String, StoreEntry>,

    #[fieldx(private, lock, get, get_mut, builder(off), default(HashMap::new()))]
    subscriptions: HashMap<u64, SubscriptionState>,

    #[fieldx(private, get, builder(off), default(AtomicU64::new(0)))]
    subscription_seq: AtomicU64,

    #[fieldx(private, lock, get, get_mut, builder(off), default(Vec::new()))]
    observers: Vec<Arc<dyn StoreObserver>>,
}

impl Store {
    fn build_cache(&self) -> Arc<Cache<String, StoreEntry>> {
        let store = self.myself().map(|s| Arc::downgrade(&s)).unwrap_or_default();
        let mut builder = Cache::builder()
            .name(self.clear_name().unwrap_or("lds-store"))
            // LRU always admits new entries, a write is never refused.
            .eviction_policy(EvictionPolicy::lru())
            .eviction_listener(move |key: Arc<String>, entry: StoreEntry, cause: RemovalCause| {
                if cause == RemovalCause::Size {
                    if let Some(store) = store.upgrade() {
                        store.on_capacity_eviction(&key, entry);
                    }
                }
            });
        if let Some(capacity) = self.max_capacity() {
            builder = builder.max_capacity(capacity);
        }
        Arc::new(builder.build())
    }

    fn on_capacity_eviction(&self, key: &str, entry: StoreEntry) {
        debug!("[{}] capacity limit evicted '{key}'", self.name());
        {
            let mut pending = self.pending_mut();
            if pending.get(key) == Some(&Change::Published) {
                self.spilled_mut().insert(key.to_string(), entry);
            }
            pending.insert(key.to_string(), Change::Evicted);
        }
        for observer in self.observer_list() {
            observer.on_evict(key);
        }
    }

    // Observer callbacks run without the list locked so that they may register more observers.
    fn observer_list(&self) -> Vec<Arc<dyn StoreObserver>> {
        self.observers().iter().cloned().collect()
    }

    #[inline]
    pub fn name(&self) -> String {
        self.cache().name().unwrap_or("<anon>").to_string()
    }

    pub fn add_observer(&self, observer: Arc<dyn StoreObserver>) {
        self.observers_mut().push(observer);
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<StoreEntry> {
        self.cache().get(key)
    }

    #[inline]
    pub fn contains_key(&self, key: &str) -> bool {
        self.cache().contains_key(key)
    }

    /// Number of resident entries.
    pub fn len(&self) -> u64 {
        let cache = self.cache();
        cache.run_pending_tasks();
        cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Normalize `input`, merge it with the entry under its key and publish the result if it differs from what is
    /// stored.
    #[instrument(level = "trace", skip(self, representation, input), fields(store = %self.name(), type_name = representation.type_name()))]
    pub fn ingest(
        &self,
        representation: &dyn Representation,
        input: &serde_json::Value,
        timestamp: u64,
    ) -> Result<IngestOutcome, StoreError> {
        let key = representation.key_of(input).ok_or_else(|| StoreError::NoKey {
            type_name: representation.type_name().to_string(),
            path:      String::new(),
        })?;
        let path = IngestPath::root(key.as_str());
        Ok(self.ingest_keyed(representation, input, key, &path, timestamp)?.0)
    }

    // Ingest of a nested entity. `key_hint` is used when the input doesn't carry its identity.
    pub(crate) fn ingest_at(
        &self,
        representation: &dyn Representation,
        input: &serde_json::Value,
        path: &IngestPath,
        key_hint: Option<&str>,
        timestamp: u64,
    ) -> Result<(IngestOutcome, FieldsTrie), StoreError> {
        let key = match representation.key_of(input) {
            Some(key) => key,
            None => key_hint.map(str::to_string).ok_or_else(|| StoreError::NoKey {
                type_name: representation.type_name().to_string(),
                path:      path.to_string(),
            })?,
        };
        self.ingest_keyed(representation, input, key, path, timestamp)
    }

    fn ingest_keyed(
        &self,
        representation: &dyn Representation,
        input: &serde_json::Value,
        key: String,
        path: &IngestPath,
        timestamp: u64,
    ) -> Result<(IngestOutcome, FieldsTrie), StoreError> {
        // Partial nested payloads identified by a hint are not expected to pass the full shape check.
        if cfg!(debug_assertions) && representation.key_of(input).is_some() {
            representation.validate(input, path)?;
        }

        let existing = self.get(&key);
        let normalized = normalize(
            representation,
            input,
            existing.as_ref().and_then(StoreEntry::entity),
            path,
            self,
            timestamp,
        )?;

        let ctx = MergeContext {
            representation,
            policy: self.merge_policy(),
            incoming_fields: &normalized.fields,
        };
        let metadata = StoreMetadata {
            ingestion_timestamp:  timestamp,
            expiration_timestamp: expires_at(timestamp, representation.ttl()),
            representation:       representation.type_name().to_string(),
            fields_property:      representation.fields_property().map(str::to_string),
            locked:               false,
        };

        let mut refreshed = false;
        let result = self.cache().entry(key.clone()).and_compute_with(|entry| {
            let existing = entry.map(|e| e.into_value());
            match merge(existing.as_ref(), normalized.entity, &ctx) {
                MergeOutcome::Locked => Op::Nop,
                MergeOutcome::Merged(merged) => match existing {
                    // Same data: keep it, only the bookkeeping moves forward.
                    Some(existing) if existing.entity() == Some(&merged) => {
                        refreshed = true;
                        Op::Put(StoreEntry {
                            data: existing.data,
                            metadata,
                        })
                    }
                    _ => Op::Put(StoreEntry {
                        data: EntryData::Entity(Arc::new(merged)),
                        metadata,
                    }),
                },
            }
        });

        let link = StoreLink::new(key.as_str());
        let outcome = match result {
            CompResult::Inserted(_) => IngestOutcome::Inserted(link),
            CompResult::ReplacedWith(_) if refreshed => IngestOutcome::Unchanged(link),
            CompResult::ReplacedWith(_) => IngestOutcome::ReplacedWith(link),
            CompResult::Unchanged(_) => IngestOutcome::Locked(link),
            // Not produced by the compute above.
            CompResult::StillNone(_) | CompResult::Removed(_) => IngestOutcome::Unchanged(link),
        };

        self.record_outcome(&key, &outcome);
        Ok((outcome, normalized.fields))
    }

    fn record_outcome(&self, key: &str, outcome: &IngestOutcome) {
        match outcome {
            IngestOutcome::Locked(_) => {
                debug!("[{}] refused to write locked '{key}'", self.name());
                for observer in self.observer_list() {
                    observer.on_locked(key);
                }
            }
            outcome if outcome.is_published() => {
                trace!("[{}] published '{key}'", self.name());
                self.pending_mut().insert(key.to_string(), Change::Published);
            }
            _ => (),
        }
    }

    /// Cache an error response under `key` until `ttl` elapses.
    #[instrument(level = "trace", skip(self, error), fields(store = %self.name(), status = error.status))]
    pub fn ingest_error(&self, key: &str, error: ErrorResponse, ttl: Duration, timestamp: u64) -> IngestOutcome {
        let metadata = StoreMetadata {
            ingestion_timestamp:  timestamp,
            expiration_timestamp: expires_at(timestamp, ttl),
            representation:       "ErrorResponse".to_string(),
            fields_property:      None,
            locked:               false,
        };

        let mut refreshed = false;
        let result = self.cache().entry(key.to_string()).and_compute_with(|entry| {
            let existing = entry.map(|e| e.into_value());
            match existing {
                Some(existing) if existing.is_locked() => Op::Nop,
                Some(existing) if existing.error() == Some(&error) => {
                    refreshed = true;
                    Op::Put(StoreEntry {
                        data: existing.data,
                        metadata,
                    })
                }
                _ => Op::Put(StoreEntry {
                    data: EntryData::Error(Arc::new(error)),
                    metadata,
                }),
            }
        });

        let link = StoreLink::new(key);
        let outcome = match result {
            CompResult::Inserted(_) => IngestOutcome::Inserted(link),
            CompResult::ReplacedWith(_) if refreshed => IngestOutcome::Unchanged(link),
            CompResult::ReplacedWith(_) => IngestOutcome::ReplacedWith(link),
            CompResult::Unchanged(_) => IngestOutcome::Locked(link),
            CompResult::StillNone(_) | CompResult::Removed(_) => IngestOutcome::Unchanged(link),
        };
        self.record_outcome(key, &outcome);
        outcome
    }

    /// Read the data under the selector's key, following links.
    pub fn lookup(&self, selector: &Selector, now: u64) -> Snapshot {
        Reader::new(self, now).read(selector)
    }

    /// Register interest in a selector. The subscription receives a fresh snapshot on every [`broadcast`](Self::broadcast)
    /// which changes the data it has seen.
    pub fn subscribe(&self, selector: Selector, now: u64) -> Subscription {
        let initial = self.lookup(&selector, now);
        let id = self.subscription_seq().fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscriptions_mut().insert(
            id,
            SubscriptionState {
                selector,
                last: initial.clone(),
                sender,
            },
        );
        let store = self.myself().map(|s| Arc::downgrade(&s)).unwrap_or_default();
        Subscription::new(id, initial, receiver, store)
    }

    pub(crate) fn unsubscribe(&self, id: u64) {
        self.subscriptions_mut().remove(&id);
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions().len()
    }

    /// Deliver the changes accumulated since the previous broadcast. Returns the drained change set.
    pub fn broadcast(&self, now: u64) -> BTreeMap<String, Change> {
        self.broadcast_and_spill(now).0
    }

    // Same as `broadcast`, also handing over published entries the capacity limit evicted in the meantime.
    #[instrument(level = "trace", skip(self), fields(store = %self.name()))]
    pub(crate) fn broadcast_and_spill(&self, now: u64) -> (BTreeMap<String, Change>, HashMap<String, StoreEntry>) {
        let (changes, spilled) = {
            let mut pending = self.pending_mut();
            let spilled = std::mem::take(&mut *self.spilled_mut());
            (std::mem::take(&mut *pending).into_iter().collect::<BTreeMap<_, _>>(), spilled)
        };
        if changes.is_empty() {
            return (changes, spilled);
        }

        debug!("[{}] broadcasting {} change(s)", self.name(), changes.len());

        let mut closed = vec![];
        {
            let mut subscriptions = self.subscriptions_mut();
            for (id, state) in subscriptions.iter_mut() {
                let affected = changes
                    .keys()
                    .any(|k| state.last.seen_keys.contains(k) || state.last.missing_keys.contains(k));
                if !affected {
                    continue;
                }
                let snapshot = self.lookup(&state.selector, now);
                if snapshot != state.last {
                    state.last = snapshot.clone();
                    if state.sender.send(snapshot).is_err() {
                        closed.push(*id);
                    }
                }
            }
            for id in closed {
                subscriptions.remove(&id);
            }
        }

        let keys = changes.keys().cloned().collect::<Vec<_>>();
        for observer in self.observer_list() {
            observer.on_broadcast(&keys);
        }

        (changes, spilled)
    }

    /// Remove an entry. Returns `true` if there was something to remove.
    #[instrument(level = "trace", skip(self), fields(store = %self.name()))]
    pub fn evict(&self, key: &str) -> bool {
        if self.cache().remove(key).is_none() {
            return false;
        }
        self.pending_mut().insert(key.to_string(), Change::Evicted);
        for observer in self.observer_list() {
            observer.on_evict(key);
        }
        true
    }

    /// Mark an entry as locked. Ingestion doesn't write locked entries until they're unlocked.
    pub fn lock(&self, key: &str) -> bool {
        self.set_locked(key, true)
    }

    pub fn unlock(&self, key: &str) -> bool {
        self.set_locked(key, false)
    }

    fn set_locked(&self, key: &str, locked: bool) -> bool {
        let result = self.cache().entry(key.to_string()).and_compute_with(|entry| match entry {
            Some(entry) if entry.value().metadata.locked != locked => {
                let mut entry = entry.into_value();
                entry.metadata.locked = locked;
                Op::Put(entry)
            }
            _ => Op::Nop,
        });
        trace!("[{}] set locked={locked} on '{key}': {result:?}", self.name());
        matches!(result, CompResult::ReplacedWith(_) | CompResult::Unchanged(_))
    }

    /// Insert `entry` only if nothing is stored under `key`. The check and the write are atomic.
    pub fn put_if_absent(&self, key: &str, entry: StoreEntry) -> bool {
        let result = self.cache().entry(key.to_string()).and_compute_with(|existing| match existing {
            Some(_) => Op::Nop,
            None => Op::Put(entry),
        });
        let inserted = matches!(result, CompResult::Inserted(_));
        if inserted {
            self.pending_mut().insert(key.to_string(), Change::Revived);
        }
        inserted
    }

    pub fn notify_warning(&self, message: &str) {
        for observer in self.observer_list() {
            observer.on_warning(message);
        }
    }

    /// Drop everything. Subscriptions stay registered.
    pub fn clear(&self) {
        self.clear_cache();
        self.pending_mut().clear();
        self.spilled_mut().clear();
    }
}

impl Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.name())
            .field("max_capacity", &self.max_capacity())
            .field("merge_policy", &self.merge_policy())
            .finish()
    }
}

fn expires_at(timestamp: u64, ttl: Duration) -> u64 {
    timestamp.saturating_add(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::representation::RecordRepresentation;
    use crate::test::record_payload;
    use crate::types::SnapshotState;
    use parking_lot::Mutex;
    use serde_json::json;

    fn account(etag: u64, name: &str) -> serde_json::Value {
        record_payload("001x", "Account", etag, json!({"Name": {"value": name, "displayValue": null}}))
    }

    #[test]
    fn first_ingest_inserts() {
        let store = Store::builder().build().unwrap();
        let rep = RecordRepresentation::default();
        let outcome = store.ingest(&rep, &account(1, "Acme"), 100).unwrap();
        assert_eq!(
            outcome,
            IngestOutcome::Inserted(StoreLink::new("UiApi::RecordRepresentation:001x"))
        );
        let entry = store.get("UiApi::RecordRepresentation:001x").unwrap();
        assert_eq!(entry.metadata.ingestion_timestamp, 100);
        assert_eq!(entry.metadata.expiration_timestamp, 30_100);
    }

    #[test]
    fn stored_entity_equals_normalized_input() {
        let store = Store::builder().build().unwrap();
        let rep = RecordRepresentation::default();
        store
            .ingest(
                &rep,
                &json!({"id": "001x", "fields": {"Name": {"value": "Acme", "displayValue": "Acme"}}}),
                100,
            )
            .unwrap();

        let mut expected = crate::value::NormalizedEntity::default();
        expected.insert("id", crate::value::StoreValue::String("001x".into()));
        expected.insert(
            "fields",
            crate::value::StoreValue::Object(
                [(
                    "Name".to_string(),
                    crate::value::StoreValue::Field(crate::value::FieldValue::new(
                        crate::value::StoreValue::String("Acme".into()),
                        Some("Acme".into()),
                    )),
                )]
                .into(),
            ),
        );
        let entry = store.get("UiApi::RecordRepresentation:001x").unwrap();
        assert_eq!(entry.entity(), Some(&expected));
    }

    #[test]
    fn repeated_ingest_is_idempotent() {
        let store = Store::builder().build().unwrap();
        let rep = RecordRepresentation::default();
        store.ingest(&rep, &account(1, "Acme"), 100).unwrap();
        let first = store.get("UiApi::RecordRepresentation:001x").unwrap();
        assert_eq!(store.broadcast(100).len(), 1);

        let outcome = store.ingest(&rep, &account(1, "Acme"), 200).unwrap();
        assert!(matches!(outcome, IngestOutcome::Unchanged(_)));
        let second = store.get("UiApi::RecordRepresentation:001x").unwrap();
        assert_eq!(first.data, second.data);
        assert_eq!(second.metadata.ingestion_timestamp, 200);
        assert!(store.broadcast(200).is_empty());
    }

    #[test]
    fn changed_data_is_replaced() {
        let store = Store::builder().build().unwrap();
        let rep = RecordRepresentation::default();
        store.ingest(&rep, &account(1, "Acme"), 100).unwrap();
        let outcome = store.ingest(&rep, &account(2, "Acme Corp"), 200).unwrap();
        assert!(matches!(outcome, IngestOutcome::ReplacedWith(_)));
        let entry = store.get("UiApi::RecordRepresentation:001x").unwrap();
        assert_eq!(entry.entity().unwrap().version("weakEtag"), Some(2));
    }

    #[test]
    fn locked_entry_is_untouched() {
        let store = Store::builder().build().unwrap();
        let rep = RecordRepresentation::default();
        store.ingest(&rep, &account(1, "Acme"), 100).unwrap();
        assert!(store.lock("UiApi::RecordRepresentation:001x"));
        let before = store.get("UiApi::RecordRepresentation:001x").unwrap();
        store.broadcast(100);

        let outcome = store.ingest(&rep, &account(2, "Other"), 200).unwrap();
        assert!(matches!(outcome, IngestOutcome::Locked(_)));
        assert_eq!(store.get("UiApi::RecordRepresentation:001x").unwrap(), before);
        assert!(store.broadcast(200).is_empty());

        assert!(store.unlock("UiApi::RecordRepresentation:001x"));
        let outcome = store.ingest(&rep, &account(2, "Other"), 300).unwrap();
        assert!(matches!(outcome, IngestOutcome::ReplacedWith(_)));
    }

    #[test]
    fn lock_of_missing_key() {
        let store = Store::builder().build().unwrap();
        assert!(!store.lock("UiApi::RecordRepresentation:nope"));
    }

    #[test]
    fn missing_key_is_an_error() {
        let store = Store::builder().build().unwrap();
        let rep = RecordRepresentation::default();
        let err = store.ingest(&rep, &json!({"fields": {}}), 1).unwrap_err();
        assert!(matches!(err, StoreError::NoKey { .. }));
    }

    #[test]
    fn errors_are_cached() {
        let store = Store::builder().build().unwrap();
        let key = "UiApi::RecordRepresentation:001x";
        let outcome = store.ingest_error(key, ErrorResponse::not_found(), Duration::from_secs(30), 100);
        assert!(matches!(outcome, IngestOutcome::Inserted(_)));
        let snapshot = store.lookup(&Selector::new(key), 200);
        assert_eq!(snapshot.state, SnapshotState::Error);
        assert_eq!(snapshot.error.map(|e| e.status), Some(404));

        let outcome = store.ingest_error(key, ErrorResponse::not_found(), Duration::from_secs(30), 300);
        assert!(matches!(outcome, IngestOutcome::Unchanged(_)));
    }

    #[test]
    fn evict_and_put_if_absent() {
        let store = Store::builder().build().unwrap();
        let rep = RecordRepresentation::default();
        store.ingest(&rep, &account(1, "Acme"), 100).unwrap();
        let key = "UiApi::RecordRepresentation:001x";
        let entry = store.get(key).unwrap();

        assert!(!store.put_if_absent(key, entry.clone()));
        assert!(store.evict(key));
        assert!(!store.evict(key));
        assert!(store.put_if_absent(key, entry));

        let changes = store.broadcast(100);
        assert_eq!(changes.get(key), Some(&Change::Revived));
    }

    #[tokio::test]
    async fn subscription_gets_changes() {
        let store = Store::builder().build().unwrap();
        let rep = RecordRepresentation::default();
        let key = "UiApi::RecordRepresentation:001x";
        let mut subscription = store.subscribe(Selector::new(key), 0);
        assert_eq!(subscription.initial().state, SnapshotState::Unfulfilled);

        store.ingest(&rep, &account(1, "Acme"), 100).unwrap();
        store.broadcast(100);
        let snapshot = subscription.next().await.unwrap();
        assert_eq!(snapshot.state, SnapshotState::Fulfilled);
        assert_eq!(snapshot.data.unwrap()["fields"]["Name"]["value"], json!("Acme"));

        // Nothing changed, nothing delivered.
        store.ingest(&rep, &account(1, "Acme"), 150).unwrap();
        store.broadcast(150);
        assert!(subscription.try_next().is_none());

        drop(subscription);
        assert_eq!(store.subscription_count(), 0);
    }

    #[derive(Default)]
    struct Evictions {
        keys: Mutex<Vec<String>>,
    }

    impl StoreObserver for Evictions {
        fn on_evict(&self, key: &str) {
            self.keys.lock().push(key.to_string());
        }
    }

    #[test]
    fn capacity_limit_admits_and_reports() {
        let store = Store::builder().max_capacity(1).build().unwrap();
        let evictions = Arc::new(Evictions::default());
        store.add_observer(evictions.clone());
        let rep = RecordRepresentation::default();

        for id in ["001x", "002x"] {
            let outcome = store
                .ingest(&rep, &record_payload(id, "Account", 1, json!({})), 100)
                .unwrap();
            assert!(matches!(outcome, IngestOutcome::Inserted(_)));
        }
        assert_eq!(store.len(), 1);
        assert!(store.contains_key("UiApi::RecordRepresentation:002x"));
        assert!(!store.contains_key("UiApi::RecordRepresentation:001x"));
        assert_eq!(*evictions.keys.lock(), vec!["UiApi::RecordRepresentation:001x".to_string()]);

        let changes = store.broadcast(100);
        assert_eq!(changes.get("UiApi::RecordRepresentation:001x"), Some(&Change::Evicted));
        assert_eq!(changes.get("UiApi::RecordRepresentation:002x"), Some(&Change::Published));
    }

    #[test]
    fn unbounded_by_default() {
        let store = Store::builder().build().unwrap();
        assert_eq!(store.max_capacity(), None);
        let rep = RecordRepresentation::default();
        for i in 0..200 {
            store
                .ingest(&rep, &record_payload(&format!("{i:03}x"), "Account", 1, json!({})), 100)
                .unwrap();
        }
        assert_eq!(store.len(), 200);
    }

    struct Registering {
        store: std::sync::Weak<Store>,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl StoreObserver for Registering {
        fn on_broadcast(&self, _keys: &[String]) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(store) = self.store.upgrade() {
                store.add_observer(Arc::new(Evictions::default()));
            }
        }
    }

    #[test]
    fn observers_may_register_observers() {
        let store = Store::builder().build().unwrap();
        let observer = Arc::new(Registering {
            store: Arc::downgrade(&store),
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        store.add_observer(observer.clone());
        let rep = RecordRepresentation::default();

        store.ingest(&rep, &account(1, "Acme"), 100).unwrap();
        store.broadcast(100);
        store.ingest(&rep, &account(2, "Acme Corp"), 200).unwrap();
        store.broadcast(200);
        assert_eq!(observer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.observers().len(), 3);
    }

    #[test]
    fn len_counts_entries() {
        let store = Store::builder().name("counted").build().unwrap();
        assert!(store.is_empty());
        let rep = RecordRepresentation::default();
        store.ingest(&rep, &account(1, "Acme"), 100).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.name(), "counted");
    }
}
