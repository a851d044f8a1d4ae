//! Conversion of denormalized payloads into store form.
//!
//! Nested entities are ingested into entries of their own first and replaced with links in their container.

use serde_json::Value;
use tracing::instrument;

use crate::error::StoreError;
use crate::error::ValidationError;
use crate::store::Store;
use crate::traits::Representation;
use crate::types::IngestPath;
use crate::value::FieldValue;
use crate::value::FieldsTrie;
use crate::value::NormalizedEntity;
use crate::value::Properties;
use crate::value::StoreLink;
use crate::value::StoreValue;

#[derive(Clone, Debug, PartialEq)]
pub struct Normalized {
    pub entity: NormalizedEntity,
    /// Fields present in the payload, including those of spanned entities.
    pub fields: FieldsTrie,
}

#[instrument(level = "trace", skip(representation, input, existing, store), fields(path = %path))]
pub fn normalize(
    representation: &dyn Representation,
    input: &Value,
    existing: Option<&NormalizedEntity>,
    path: &IngestPath,
    store: &Store,
    timestamp: u64,
) -> Result<Normalized, StoreError> {
    let Value::Object(obj) = input
    else {
        return Err(ValidationError::new(path, "an entity must be an object").into());
    };

    let fields_property = representation.fields_property();
    let mut properties = Properties::new();
    let mut fields = FieldsTrie::new();

    for (name, value) in obj {
        let child_path = path.child(name);
        let existing_value = existing.and_then(|e| e.get(name));
        let normalized = if Some(name.as_str()) == fields_property {
            normalize_field_map(
                representation,
                value,
                existing_value,
                &child_path,
                store,
                timestamp,
                &mut fields,
            )?
        }
        else if let Some(child) = representation.child_representation(name) {
            normalize_nested(child, value, existing_value, &child_path, store, timestamp)?
        }
        else {
            StoreValue::from_json(value)
        };
        properties.insert(name.clone(), normalized);
    }

    Ok(Normalized {
        entity: NormalizedEntity::new(properties),
        fields,
    })
}

fn normalize_field_map(
    representation: &dyn Representation,
    value: &Value,
    existing: Option<&StoreValue>,
    path: &IngestPath,
    store: &Store,
    timestamp: u64,
    trie: &mut FieldsTrie,
) -> Result<StoreValue, StoreError> {
    let Value::Object(field_map) = value
    else {
        return Ok(StoreValue::from_json(value));
    };

    let existing_map = existing.and_then(StoreValue::as_object);
    let mut out = Properties::new();
    for (name, raw) in field_map {
        let node = trie.child_mut(name);
        let existing_field = existing_map.and_then(|m| m.get(name));
        let field = normalize_field(
            representation,
            raw,
            existing_field,
            &path.child(name),
            store,
            timestamp,
            node,
        )?;
        out.insert(name.clone(), field);
    }
    Ok(StoreValue::Object(out))
}

fn display_value_of(raw: Option<&Value>) -> Option<String> {
    match raw {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

fn normalize_field(
    representation: &dyn Representation,
    raw: &Value,
    existing: Option<&StoreValue>,
    path: &IngestPath,
    store: &Store,
    timestamp: u64,
    node: &mut FieldsTrie,
) -> Result<StoreValue, StoreError> {
    let Value::Object(wrapper) = raw
    else {
        return Ok(StoreValue::from_json(raw));
    };

    let display_value = display_value_of(wrapper.get("displayValue"));
    let raw_value = wrapper.get("value").unwrap_or(&Value::Null);

    let value = match (raw_value, representation.spanning_representation()) {
        (Value::Object(_), Some(spanning)) => {
            // A spanned record may come without its ID; it then belongs to whatever the field linked to before.
            let existing_key = existing
                .and_then(StoreValue::as_field)
                .and_then(|f| f.value.as_link())
                .and_then(StoreLink::key);
            if spanning.key_of(raw_value).is_some() || existing_key.is_some() {
                let (outcome, child_fields) = store.ingest_at(spanning, raw_value, path, existing_key, timestamp)?;
                node.union(&child_fields);
                StoreValue::Link(outcome.into_link())
            }
            else {
                StoreValue::from_json(raw_value)
            }
        }
        _ => StoreValue::from_json(raw_value),
    };

    Ok(StoreValue::Field(FieldValue::new(value, display_value)))
}

fn normalize_nested(
    representation: &dyn Representation,
    value: &Value,
    existing: Option<&StoreValue>,
    path: &IngestPath,
    store: &Store,
    timestamp: u64,
) -> Result<StoreValue, StoreError> {
    match value {
        Value::Object(_) => {
            let existing_key = existing.and_then(StoreValue::as_link).and_then(StoreLink::key);
            let (outcome, _) = store.ingest_at(representation, value, path, existing_key, timestamp)?;
            Ok(StoreValue::Link(outcome.into_link()))
        }
        Value::Array(items) => {
            let existing_items = match existing {
                Some(StoreValue::Array(items)) => items.as_slice(),
                _ => &[],
            };
            let mut links = Vec::with_capacity(items.len());
            for (idx, item) in items.iter().enumerate() {
                links.push(normalize_nested(
                    representation,
                    item,
                    existing_items.get(idx),
                    &path.child(&idx.to_string()),
                    store,
                    timestamp,
                )?);
            }
            Ok(StoreValue::Array(links))
        }
        Value::Null => Ok(StoreValue::Link(StoreLink::null())),
        other => Ok(StoreValue::from_json(other)),
    }
}
