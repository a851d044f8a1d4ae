//! Revival of entries from the durable store.
//!
//! The in-memory store is authoritative: revival only fills keys that are absent, and it re-checks absence at write
//! time because an ingestion may have filled the key while the durable read was in flight.

use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;
use tracing::instrument;

use crate::entry::DurableStoreEntry;
use crate::entry::StoreEntry;
use crate::entry::StoreMetadata;
use crate::error::DurableStoreError;
use crate::key::key_type;
use crate::selector::Selector;
use crate::selector::Snapshot;
use crate::store::Store;
use crate::traits::DurableStore;
use crate::traits::Representation;
use crate::value::StoreValue;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReviveReport {
    /// Keys asked from the durable store.
    pub requested: Vec<String>,
    /// Keys written into the in-memory store.
    pub revived:   Vec<String>,
    /// Keys found durably but filled in memory meanwhile.
    pub skipped:   Vec<String>,
}

impl ReviveReport {
    fn absorb(&mut self, other: ReviveReport) {
        self.requested.extend(other.requested);
        self.revived.extend(other.revived);
        self.skipped.extend(other.skipped);
    }
}

/// Bring the given keys into the store from `durable`, skipping those already resident.
#[instrument(level = "trace", skip_all)]
pub async fn revive_keys<I, S>(keys: I, store: &Store, durable: &dyn DurableStore) -> Result<ReviveReport, DurableStoreError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let absent = keys
        .into_iter()
        .map(Into::into)
        .filter(|k: &String| !store.contains_key(k))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>();

    let mut report = ReviveReport::default();
    if absent.is_empty() {
        return Ok(report);
    }

    let found = durable.get_entries(&absent).await?;
    report.requested = absent;

    let Some(mut found) = found
    else {
        return Ok(report);
    };

    for key in &report.requested {
        let Some(durable_entry) = found.remove(key)
        else {
            continue;
        };
        if store.put_if_absent(key, into_store_entry(key, durable_entry)) {
            report.revived.push(key.clone());
        }
        else {
            report.skipped.push(key.clone());
        }
    }

    debug!(
        "[{}] revived {} of {} requested key(s), {} skipped",
        store.name(),
        report.revived.len(),
        report.requested.len(),
        report.skipped.len()
    );

    Ok(report)
}

/// Revive whatever a payload of `representation` is going to touch, so that ingestion merges against durable data
/// instead of overwriting it.
pub async fn revive_for_payload(
    representation: &dyn Representation,
    input: &Value,
    store: &Store,
    durable: &dyn DurableStore,
) -> Result<ReviveReport, DurableStoreError> {
    let mut keys = BTreeSet::new();
    collect_keys(representation, input, &mut keys);
    revive_keys(keys, store, durable).await
}

/// Look a selector up, reviving missing entries until the snapshot stops improving.
#[instrument(level = "trace", skip(store, durable), fields(key = %selector.key))]
pub async fn revive_snapshot(
    selector: &Selector,
    store: &Store,
    durable: &dyn DurableStore,
    now: u64,
) -> Result<(Snapshot, ReviveReport), DurableStoreError> {
    let mut report = ReviveReport::default();
    let mut attempted = BTreeSet::new();
    let mut snapshot = store.lookup(selector, now);

    loop {
        let wanted = snapshot
            .missing_keys
            .iter()
            .filter(|k| !attempted.contains(*k))
            .cloned()
            .collect::<Vec<_>>();
        if wanted.is_empty() {
            break;
        }
        attempted.extend(wanted.iter().cloned());

        let round = revive_keys(wanted, store, durable).await?;
        let progressed = !round.revived.is_empty() || !round.skipped.is_empty();
        report.absorb(round);
        if !progressed {
            break;
        }
        snapshot = store.lookup(selector, now);
    }

    Ok((snapshot, report))
}

/// Keys of every identifiable entity within `input`, the root included.
pub fn collect_keys(representation: &dyn Representation, input: &Value, keys: &mut BTreeSet<String>) {
    let Value::Object(obj) = input
    else {
        return;
    };

    if let Some(key) = representation.key_of(input) {
        keys.insert(key);
    }

    for (name, value) in obj {
        if Some(name.as_str()) == representation.fields_property() {
            let (Some(spanning), Value::Object(fields)) = (representation.spanning_representation(), value)
            else {
                continue;
            };
            for field in fields.values() {
                if let Some(inner @ Value::Object(_)) = field.get("value") {
                    collect_keys(spanning, inner, keys);
                }
            }
        }
        else if let Some(child) = representation.child_representation(name) {
            match value {
                Value::Array(items) => items.iter().for_each(|item| collect_keys(child, item, keys)),
                item => collect_keys(child, item, keys),
            }
        }
    }
}

// Durable entries without metadata are revived as already expired.
fn into_store_entry(key: &str, entry: DurableStoreEntry) -> StoreEntry {
    let metadata = entry.metadata.unwrap_or_else(|| StoreMetadata {
        ingestion_timestamp:  0,
        expiration_timestamp: 0,
        representation:       key_type(key).map(|(_, t)| t).unwrap_or_default().to_string(),
        fields_property:      guess_fields_property(&entry.data),
        locked:               false,
    });
    StoreEntry {
        data: entry.data,
        metadata,
    }
}

fn guess_fields_property(data: &crate::entry::EntryData) -> Option<String> {
    let entity = data.as_entity()?;
    match entity.get("fields")? {
        StoreValue::Object(fields) if fields.values().all(|f| matches!(f, StoreValue::Field(_))) => {
            Some("fields".to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::representation::RecordRepresentation;
    use crate::test::record_payload;
    use crate::test::MemoryDurableStore;
    use crate::types::SnapshotState;
    use serde_json::json;
    use std::collections::HashMap;

    fn seeded() -> (std::sync::Arc<Store>, MemoryDurableStore) {
        let source = Store::builder().build().unwrap();
        let rep = RecordRepresentation::default();
        let owner = record_payload("005x", "User", 1, json!({"Name": {"value": "Joe", "displayValue": null}}));
        let account = record_payload("001x", "Account", 1, json!({"Owner": {"value": owner, "displayValue": "Joe"}}));
        source.ingest(&rep, &account, 1_000).unwrap();

        let durable = MemoryDurableStore::new();
        durable.seed(
            ["UiApi::RecordRepresentation:001x", "UiApi::RecordRepresentation:005x"]
                .into_iter()
                .map(|k| (k.to_string(), DurableStoreEntry::from(source.get(k).unwrap())))
                .collect::<HashMap<_, _>>(),
        );
        (Store::builder().build().unwrap(), durable)
    }

    #[tokio::test]
    async fn revives_only_absent_keys() {
        let (store, durable) = seeded();
        let rep = RecordRepresentation::default();
        let resident = record_payload("005x", "User", 7, json!({"Name": {"value": "Joseph", "displayValue": null}}));
        store.ingest(&rep, &resident, 2_000).unwrap();

        let report = revive_keys(
            ["UiApi::RecordRepresentation:001x", "UiApi::RecordRepresentation:005x"],
            &store,
            &durable,
        )
        .await
        .unwrap();
        assert_eq!(report.requested, vec!["UiApi::RecordRepresentation:001x".to_string()]);
        assert_eq!(report.revived, vec!["UiApi::RecordRepresentation:001x".to_string()]);

        // In-memory data wins over the durable copy.
        let owner = store.get("UiApi::RecordRepresentation:005x").unwrap();
        assert_eq!(owner.entity().unwrap().version("weakEtag"), Some(7));
    }

    #[tokio::test]
    async fn snapshot_revival_follows_links() {
        let (store, durable) = seeded();
        let selector = Selector::new("UiApi::RecordRepresentation:001x").with_field_paths(["Owner.Name"]);
        let (snapshot, report) = revive_snapshot(&selector, &store, &durable, 1_500).await.unwrap();
        assert_eq!(snapshot.state, SnapshotState::Fulfilled);
        assert_eq!(report.revived.len(), 2);
        assert_eq!(durable.get_calls(), 2);
    }

    #[tokio::test]
    async fn entry_filled_during_fetch_is_skipped() {
        let (store, durable) = seeded();
        let rep = RecordRepresentation::default();
        let racing = record_payload("001x", "Account", 9, json!({}));
        let store_for_hook = store.clone();
        durable.on_get(move || {
            store_for_hook.ingest(&rep, &racing, 2_000).unwrap();
        });

        let report = revive_keys(["UiApi::RecordRepresentation:001x"], &store, &durable)
            .await
            .unwrap();
        assert_eq!(report.skipped, vec!["UiApi::RecordRepresentation:001x".to_string()]);
        let entry = store.get("UiApi::RecordRepresentation:001x").unwrap();
        assert_eq!(entry.entity().unwrap().version("weakEtag"), Some(9));
    }

    #[tokio::test]
    async fn missing_metadata_revives_expired() {
        let store = Store::builder().build().unwrap();
        let durable = MemoryDurableStore::new();
        let source = Store::builder().build().unwrap();
        source
            .ingest(&RecordRepresentation::default(), &record_payload("001x", "Account", 1, json!({})), 1)
            .unwrap();
        let entry = source.get("UiApi::RecordRepresentation:001x").unwrap();
        durable.seed(HashMap::from([(
            "UiApi::RecordRepresentation:001x".to_string(),
            DurableStoreEntry {
                data:     entry.data,
                metadata: None,
            },
        )]));

        revive_keys(["UiApi::RecordRepresentation:001x"], &store, &durable)
            .await
            .unwrap();
        let snapshot = store.lookup(&Selector::new("UiApi::RecordRepresentation:001x"), 10);
        assert_eq!(snapshot.state, SnapshotState::Stale);
    }

    #[test]
    fn keys_of_nested_payload() {
        let owner = record_payload("005x", "User", 1, json!({}));
        let account = record_payload("001x", "Account", 1, json!({"Owner": {"value": owner, "displayValue": null}}));
        let mut keys = BTreeSet::new();
        collect_keys(&RecordRepresentation::default(), &account, &mut keys);
        assert_eq!(
            keys.into_iter().collect::<Vec<_>>(),
            vec![
                "UiApi::RecordRepresentation:001x".to_string(),
                "UiApi::RecordRepresentation:005x".to_string()
            ]
        );
    }
}
