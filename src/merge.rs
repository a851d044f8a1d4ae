//! Reconciliation of freshly normalized data with what the store already holds.
//!
//! Merging is pure: it produces the value to publish and never touches the store.

use tracing::instrument;

use crate::entry::StoreEntry;
use crate::traits::Representation;
use crate::types::MergePolicy;
use crate::types::MergeStrategy;
use crate::value::FieldValue;
use crate::value::FieldsTrie;
use crate::value::NormalizedEntity;
use crate::value::Properties;
use crate::value::StoreValue;

#[derive(Clone, Debug, PartialEq)]
pub enum MergeOutcome {
    Merged(NormalizedEntity),
    /// The existing entry is locked; nothing may be written.
    Locked,
}

pub struct MergeContext<'a> {
    pub representation:  &'a dyn Representation,
    pub policy:          MergePolicy,
    /// Fields carried by the incoming entity. Fields outside of it were not requested and keep their stored values.
    pub incoming_fields: &'a FieldsTrie,
}

#[instrument(level = "trace", skip_all, fields(type_name = ctx.representation.type_name()))]
pub fn merge(existing: Option<&StoreEntry>, incoming: NormalizedEntity, ctx: &MergeContext<'_>) -> MergeOutcome {
    let Some(existing) = existing
    else {
        return MergeOutcome::Merged(incoming);
    };

    if existing.is_locked() {
        return MergeOutcome::Locked;
    }

    // A cached error response is superseded by any data.
    let Some(existing) = existing.entity()
    else {
        return MergeOutcome::Merged(incoming);
    };

    MergeOutcome::Merged(merge_entities(existing, incoming, ctx))
}

/// Merge two entities using the strategy of the context's representation.
pub fn merge_entities(existing: &NormalizedEntity, incoming: NormalizedEntity, ctx: &MergeContext<'_>) -> NormalizedEntity {
    match ctx.representation.merge_strategy() {
        MergeStrategy::VersionGated => merge_version_gated(existing, incoming, ctx),
        MergeStrategy::ShallowUnion => merge_shallow_union(existing, incoming, ctx),
    }
}

fn merge_version_gated(existing: &NormalizedEntity, incoming: NormalizedEntity, ctx: &MergeContext<'_>) -> NormalizedEntity {
    let representation = ctx.representation;
    let version_property = representation.version_property();
    let fields_property = representation.fields_property();

    let existing_version = version_property.and_then(|p| existing.version(p));
    let incoming_version = version_property.and_then(|p| incoming.version(p));
    // Ties resolve to incoming.
    let existing_wins = matches!((existing_version, incoming_version), (Some(e), Some(i)) if e > i);

    let mut merged = existing.properties().clone();
    for (name, incoming_value) in incoming.into_properties() {
        if Some(name.as_str()) == fields_property {
            let value = match (merged.remove(&name), incoming_value) {
                (Some(StoreValue::Object(existing_fields)), StoreValue::Object(incoming_fields)) => StoreValue::Object(
                    merge_field_maps(existing_fields, incoming_fields, existing_wins, ctx),
                ),
                (_, incoming_value) => incoming_value,
            };
            merged.insert(name, value);
        }
        else if existing_wins {
            merged.entry(name).or_insert(incoming_value);
        }
        else {
            merged.insert(name, incoming_value);
        }
    }

    NormalizedEntity::new(merged)
}

fn merge_field_maps(
    mut merged: Properties,
    mut incoming: Properties,
    existing_wins: bool,
    ctx: &MergeContext<'_>,
) -> Properties {
    for name in ctx.incoming_fields.names() {
        let Some(incoming_field) = incoming.remove(name)
        else {
            continue;
        };
        let field = match merged.remove(name) {
            Some(existing_field) => merge_field(existing_field, incoming_field, existing_wins, &ctx.policy),
            None => incoming_field,
        };
        merged.insert(name.to_string(), field);
    }
    // Anything not described by the trie is taken as is, unless it comes from an older version.
    for (name, field) in incoming {
        if existing_wins {
            merged.entry(name).or_insert(field);
        }
        else {
            merged.insert(name, field);
        }
    }
    merged
}

fn merge_field(existing: StoreValue, incoming: StoreValue, existing_wins: bool, policy: &MergePolicy) -> StoreValue {
    // A newer container is authoritative for every field it already holds, null relationships included.
    if existing_wins {
        return existing;
    }

    match (existing, incoming) {
        (StoreValue::Field(existing), StoreValue::Field(incoming)) => {
            let display_value = match (incoming.display_value, existing.display_value) {
                (None, Some(kept)) if policy.retain_display_value => Some(kept),
                (incoming_display, _) => incoming_display,
            };

            StoreValue::Field(FieldValue {
                value: incoming.value,
                display_value,
            })
        }
        (_, incoming) => incoming,
    }
}

fn merge_shallow_union(existing: &NormalizedEntity, incoming: NormalizedEntity, ctx: &MergeContext<'_>) -> NormalizedEntity {
    let fields_property = ctx.representation.fields_property();
    let mut merged = existing.properties().clone();

    for (name, incoming_value) in incoming.into_properties() {
        let value = match (merged.remove(&name), incoming_value) {
            (Some(StoreValue::Object(mut existing_fields)), StoreValue::Object(incoming_fields))
                if Some(name.as_str()) == fields_property =>
            {
                existing_fields.extend(incoming_fields);
                StoreValue::Object(existing_fields)
            }
            (_, incoming_value) => incoming_value,
        };
        merged.insert(name, value);
    }

    NormalizedEntity::new(merged)
}
