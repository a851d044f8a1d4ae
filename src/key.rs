//! Cache key derivation.
//!
//! Keys have the form `<Namespace>::<TypeName>:<identifier>[:<identifier>...]`. The format is persisted by durable
//! stores and therefore must never change.

pub const UI_API_NAMESPACE: &str = "UiApi";
pub const RECORD_TYPE_NAME: &str = "RecordRepresentation";
pub const RECORD_VIEW_ENTITY_TYPE_NAME: &str = "RecordViewEntityRepresentation";
pub const RECORD_TEMPLATE_CREATE_TYPE_NAME: &str = "RecordTemplateCreateRepresentation";

/// Records whose `apiName` equals this value are view entities and live in their own key space.
pub const VIEW_ENTITY_API_NAME: &str = "Name";

/// Build a key out of a namespace, a type name and one or more identifying values.
pub fn build_key<S: AsRef<str>>(namespace: &str, type_name: &str, identifiers: &[S]) -> String {
    let mut key = format!("{namespace}::{type_name}");
    for id in identifiers {
        key.push(':');
        key.push_str(id.as_ref());
    }
    key
}

/// Key of a record. The record ID is used as given; callers coerce it beforehand when needed.
pub fn record_key(api_name: Option<&str>, record_id: &str) -> String {
    match api_name {
        Some(VIEW_ENTITY_API_NAME) => build_key(
            UI_API_NAMESPACE,
            RECORD_VIEW_ENTITY_TYPE_NAME,
            &[VIEW_ENTITY_API_NAME, record_id],
        ),
        _ => build_key(UI_API_NAMESPACE, RECORD_TYPE_NAME, &[record_id]),
    }
}

/// Key of a create-defaults record template. A missing record type ID keys as an empty segment.
pub fn record_template_key(api_name: &str, record_type_id: Option<&str>) -> String {
    build_key(
        UI_API_NAMESPACE,
        RECORD_TEMPLATE_CREATE_TYPE_NAME,
        &[api_name, record_type_id.unwrap_or_default()],
    )
}

/// Split a key back into its namespace and type name. Returns `None` for strings not produced by [`build_key`].
pub fn key_type(key: &str) -> Option<(&str, &str)> {
    let (namespace, rest) = key.split_once("::")?;
    let type_name = rest.split(':').next()?;
    Some((namespace, type_name))
}
