//! Reading denormalized data back out of the store.

use serde_json::Map;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Weak;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::instrument;

use crate::entry::StoreEntry;
use crate::request::ErrorResponse;
use crate::store::Store;
use crate::types::SnapshotState;
use crate::value::field_to_json;
use crate::value::FieldsTrie;
use crate::value::NormalizedEntity;
use crate::value::StoreLink;
use crate::value::StoreValue;

/// What to read: a root key and, optionally, the fields the caller needs. Without fields any stored data satisfies
/// the read.
#[derive(Clone, Debug, PartialEq)]
pub struct Selector {
    pub key:    String,
    pub fields: Option<FieldsTrie>,
}

impl Selector {
    pub fn new<S: Into<String>>(key: S) -> Self {
        Self {
            key:    key.into(),
            fields: None,
        }
    }

    pub fn with_fields(mut self, fields: FieldsTrie) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Shortcut for dotted field paths like `Owner.Name`.
    pub fn with_field_paths<I, S>(self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.with_fields(FieldsTrie::from_paths(paths))
    }
}

/// The result of a lookup. Snapshots are owned values and never change after they were produced.
#[derive(Clone, Debug, PartialEq)]
pub struct Snapshot {
    pub key:            String,
    pub state:          SnapshotState,
    pub data:           Option<Value>,
    /// Every entry visited while reading.
    pub seen_keys:      BTreeSet<String>,
    /// Linked entries which were not in the store.
    pub missing_keys:   BTreeSet<String>,
    /// Requested fields absent from their entities, as dotted paths.
    pub missing_fields: BTreeSet<String>,
    pub error:          Option<ErrorResponse>,
}

impl Snapshot {
    pub fn is_fulfilled(&self) -> bool {
        self.state == SnapshotState::Fulfilled
    }

    pub fn is_error(&self) -> bool {
        self.state == SnapshotState::Error
    }

    /// `true` if the snapshot can be returned without consulting the network.
    pub fn is_usable(&self) -> bool {
        matches!(self.state, SnapshotState::Fulfilled | SnapshotState::Error)
    }
}

pub(crate) struct Reader<'a> {
    store:          &'a Store,
    now:            u64,
    seen_keys:      BTreeSet<String>,
    missing_keys:   BTreeSet<String>,
    missing_fields: BTreeSet<String>,
    stale:          bool,
    // Keys on the current descent path; a repeated key is a link cycle.
    visiting:       Vec<String>,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(store: &'a Store, now: u64) -> Self {
        Self {
            store,
            now,
            seen_keys: BTreeSet::new(),
            missing_keys: BTreeSet::new(),
            missing_fields: BTreeSet::new(),
            stale: false,
            visiting: Vec::new(),
        }
    }

    #[instrument(level = "trace", skip(self), fields(key = %selector.key))]
    pub(crate) fn read(mut self, selector: &Selector) -> Snapshot {
        let mut error = None;
        let data = match self.store.get(&selector.key) {
            None => {
                self.missing_keys.insert(selector.key.clone());
                None
            }
            Some(entry) => {
                self.seen_keys.insert(selector.key.clone());
                if entry.metadata.is_expired(self.now) {
                    self.stale = true;
                }
                match entry.error() {
                    Some(e) => {
                        error = Some(e.clone());
                        None
                    }
                    None => Some(self.read_entry(&selector.key, &entry, selector.fields.as_ref(), "")),
                }
            }
        };

        let state = if self.stale {
            SnapshotState::Stale
        }
        else if error.is_some() {
            SnapshotState::Error
        }
        else if !self.missing_keys.is_empty() || !self.missing_fields.is_empty() {
            SnapshotState::Unfulfilled
        }
        else {
            SnapshotState::Fulfilled
        };

        Snapshot {
            key: selector.key.clone(),
            state,
            data,
            seen_keys: self.seen_keys,
            missing_keys: self.missing_keys,
            missing_fields: self.missing_fields,
            error,
        }
    }

    fn read_entry(&mut self, key: &str, entry: &StoreEntry, fields: Option<&FieldsTrie>, prefix: &str) -> Value {
        let Some(entity) = entry.entity()
        else {
            // An error entry reached through a link reads as null.
            return Value::Null;
        };
        self.visiting.push(key.to_string());
        let value = self.read_entity(entity, entry.metadata.fields_property.as_deref(), fields, prefix);
        self.visiting.pop();
        value
    }

    fn read_entity(
        &mut self,
        entity: &NormalizedEntity,
        fields_property: Option<&str>,
        fields: Option<&FieldsTrie>,
        prefix: &str,
    ) -> Value {
        let mut out = Map::new();
        for (name, value) in entity.properties() {
            let json = match (Some(name.as_str()) == fields_property, value) {
                (true, StoreValue::Object(field_map)) => {
                    if let Some(fields) = fields {
                        for requested in fields.names() {
                            if !field_map.contains_key(requested) {
                                self.missing_fields.insert(format!("{prefix}{requested}"));
                            }
                        }
                    }
                    let mut fields_out = Map::new();
                    for (field_name, field) in field_map {
                        let sub = fields.and_then(|f| f.child(field_name));
                        let sub_prefix = format!("{prefix}{field_name}.");
                        fields_out.insert(field_name.clone(), self.read_field(field, sub, &sub_prefix));
                    }
                    Value::Object(fields_out)
                }
                _ => self.read_value(value),
            };
            out.insert(name.clone(), json);
        }
        Value::Object(out)
    }

    fn read_field(&mut self, field: &StoreValue, sub: Option<&FieldsTrie>, prefix: &str) -> Value {
        match field {
            StoreValue::Field(field) => {
                let inner = match field.value.as_ref() {
                    StoreValue::Link(link) => self.follow(link, sub.filter(|s| !s.is_empty()), prefix),
                    other => self.read_value(other),
                };
                field_to_json(field, inner)
            }
            other => self.read_value(other),
        }
    }

    fn follow(&mut self, link: &StoreLink, fields: Option<&FieldsTrie>, prefix: &str) -> Value {
        let Some(key) = link.key()
        else {
            return Value::Null;
        };

        if self.visiting.iter().any(|k| k == key) {
            return serde_json::json!({ "__ref": key });
        }

        match self.store.get(key) {
            None => {
                self.missing_keys.insert(key.to_string());
                Value::Null
            }
            Some(entry) => {
                self.seen_keys.insert(key.to_string());
                if entry.metadata.is_expired(self.now) {
                    self.stale = true;
                }
                self.read_entry(key, &entry, fields, prefix)
            }
        }
    }

    fn read_value(&mut self, value: &StoreValue) -> Value {
        match value {
            StoreValue::Null => Value::Null,
            StoreValue::Bool(b) => Value::Bool(*b),
            StoreValue::Number(n) => Value::Number(n.clone()),
            StoreValue::String(s) => Value::String(s.clone()),
            StoreValue::Link(link) => self.follow(link, None, ""),
            StoreValue::Field(_) => self.read_field(value, None, ""),
            StoreValue::Array(items) => Value::Array(items.iter().map(|v| self.read_value(v)).collect()),
            StoreValue::Object(props) => Value::Object(
                props
                    .iter()
                    .map(|(k, v)| (k.clone(), self.read_value(v)))
                    .collect(),
            ),
        }
    }
}

/// Live view of a selector. Yields a new snapshot whenever a broadcast changes the data it depends on. Dropping the
/// subscription unregisters it.
pub struct Subscription {
    id:       u64,
    initial:  Snapshot,
    receiver: Option<mpsc::UnboundedReceiver<Snapshot>>,
    store:    Weak<Store>,
}

impl Subscription {
    pub(crate) fn new(id: u64, initial: Snapshot, receiver: mpsc::UnboundedReceiver<Snapshot>, store: Weak<Store>) -> Self {
        Self {
            id,
            initial,
            receiver: Some(receiver),
            store,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Snapshot taken at subscription time.
    pub fn initial(&self) -> &Snapshot {
        &self.initial
    }

    pub async fn next(&mut self) -> Option<Snapshot> {
        self.receiver.as_mut()?.recv().await
    }

    pub fn try_next(&mut self) -> Option<Snapshot> {
        self.receiver.as_mut()?.try_recv().ok()
    }

    /// Turn the subscription into a stream of snapshots. The subscription stays registered as long as the store
    /// holds its sender.
    pub fn into_stream(mut self) -> UnboundedReceiverStream<Snapshot> {
        let receiver = self.receiver.take().unwrap_or_else(|| mpsc::unbounded_channel().1);
        UnboundedReceiverStream::new(receiver)
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("key", &self.initial.key)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // A stream made out of the subscription keeps the registration; the store drops it once the stream is gone
        // and a send fails.
        if self.receiver.is_none() {
            return;
        }
        if let Some(store) = self.store.upgrade() {
            store.unsubscribe(self.id);
        }
    }
}
