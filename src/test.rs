#![cfg(any(test, feature = "test"))]
//! Fixtures shared by unit and integration tests: a scripted network, an in-memory durable store and payload
//! builders.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::entry::DurableStoreEntry;
use crate::error::DurableStoreError;
use crate::request::ErrorResponse;
use crate::request::Method;
use crate::request::ResourceRequest;
use crate::request::ResourceResponse;
use crate::traits::DurableStore;
use crate::traits::NetworkAdapter;

/// Install a `RUST_LOG` driven subscriber. Safe to call from every test.
pub fn init_tracing() {
    #[cfg(feature = "tracing")]
    {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        let _ = tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::from_default_env())
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    }
}

/// A record as the records resource returns it.
pub fn record_payload(id: &str, api_name: &str, weak_etag: u64, fields: Value) -> Value {
    json!({
        "apiName": api_name,
        "childRelationships": {},
        "fields": fields,
        "id": id,
        "recordTypeId": null,
        "weakEtag": weak_etag,
    })
}

/// A create-defaults response wrapping a record template.
pub fn defaults_payload(api_name: &str, record_type_id: Option<&str>, fields: Value) -> Value {
    json!({
        "layout": null,
        "objectInfos": { api_name: { "apiName": api_name } },
        "record": {
            "apiName": api_name,
            "fields": fields,
            "recordTypeId": record_type_id,
        },
    })
}

type Scripted = Result<ResourceResponse, ErrorResponse>;

/// Network adapter answering from a script keyed by method and path. Unscripted requests get a 404.
#[derive(Default)]
pub struct MockNetwork {
    script:   Mutex<HashMap<(Method, String), Scripted>>,
    requests: Mutex<Vec<ResourceRequest>>,
    latency:  Duration,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn respond(&self, method: Method, path: &str, response: Scripted) {
        self.script.lock().insert((method, path.to_string()), response);
    }

    pub fn respond_ok(&self, path: &str, body: Value) {
        self.respond(Method::Get, path, Ok(ResourceResponse::ok(body)));
    }

    pub fn respond_err(&self, path: &str, error: ErrorResponse) {
        self.respond(Method::Get, path, Err(error));
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<ResourceRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl NetworkAdapter for MockNetwork {
    async fn dispatch(&self, request: ResourceRequest) -> Result<ResourceResponse, ErrorResponse> {
        let scripted = self.script.lock().get(&(request.method, request.path.clone())).cloned();
        self.requests.lock().push(request);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        scripted.unwrap_or_else(|| Err(ErrorResponse::not_found()))
    }
}

type GetHook = Box<dyn Fn() + Send + Sync>;

/// Durable store keeping entries serialized as JSON, the way a real persistence layer would.
#[derive(Default)]
pub struct MemoryDurableStore {
    entries:   Mutex<HashMap<String, String>>,
    failing:   AtomicBool,
    get_calls: AtomicUsize,
    on_get:    Mutex<Option<GetHook>>,
}

impl MemoryDurableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, entries: HashMap<String, DurableStoreEntry>) {
        let mut stored = self.entries.lock();
        for (key, entry) in entries {
            if let Ok(json) = serde_json::to_string(&entry) {
                stored.insert(key, json);
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every following operation fail with a backend error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Run `hook` inside every `get_entries` call, after the read has started and before it resolves.
    pub fn on_get<F: Fn() + Send + Sync + 'static>(&self, hook: F) {
        *self.on_get.lock() = Some(Box::new(hook));
    }

    fn check(&self) -> Result<(), DurableStoreError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(DurableStoreError::Backend("scripted failure".to_string()))
        }
        else {
            Ok(())
        }
    }
}

#[async_trait]
impl DurableStore for MemoryDurableStore {
    async fn get_entries(&self, keys: &[String]) -> Result<Option<HashMap<String, DurableStoreEntry>>, DurableStoreError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        if let Some(hook) = self.on_get.lock().as_ref() {
            hook();
        }
        self.check()?;

        let stored = self.entries.lock();
        let mut found = HashMap::new();
        for key in keys {
            if let Some(json) = stored.get(key) {
                found.insert(key.clone(), serde_json::from_str(json)?);
            }
        }
        Ok((!found.is_empty()).then_some(found))
    }

    async fn set_entries(&self, entries: HashMap<String, DurableStoreEntry>) -> Result<(), DurableStoreError> {
        self.check()?;
        let mut serialized = Vec::with_capacity(entries.len());
        for (key, entry) in entries {
            serialized.push((key, serde_json::to_string(&entry)?));
        }
        self.entries.lock().extend(serialized);
        Ok(())
    }

    async fn evict_entries(&self, keys: &[String]) -> Result<(), DurableStoreError> {
        self.check()?;
        let mut stored = self.entries.lock();
        for key in keys {
            stored.remove(key);
        }
        Ok(())
    }
}
