//! Normalized value model.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Map;
use serde_json::Number;
use serde_json::Value;
use std::collections::BTreeMap;

pub type Properties = BTreeMap<String, StoreValue>;

/// Reference to another store entry. A link without a key stands for a relationship which is present but empty.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreLink {
    #[serde(rename = "__ref")]
    key: Option<String>,
}

impl StoreLink {
    pub fn new<S: Into<String>>(key: S) -> Self {
        Self { key: Some(key.into()) }
    }

    pub fn null() -> Self {
        Self { key: None }
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn is_null(&self) -> bool {
        self.key.is_none()
    }
}

/// Leaf field wrapper, `{ value, displayValue }`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub value:         Box<StoreValue>,
    #[serde(rename = "displayValue")]
    pub display_value: Option<String>,
}

impl FieldValue {
    pub fn new(value: StoreValue, display_value: Option<String>) -> Self {
        Self {
            value: Box::new(value),
            display_value,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum StoreValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Link(StoreLink),
    Field(FieldValue),
    Array(Vec<StoreValue>),
    Object(Properties),
}

impl StoreValue {
    /// Plain conversion, no entity is recognized and no link is produced.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::Number(n.clone()),
            Value::String(s) => Self::String(s.clone()),
            Value::Array(items) => Self::Array(items.iter().map(Self::from_json).collect()),
            Value::Object(obj) => Self::Object(
                obj.iter()
                    .map(|(k, v)| (k.clone(), Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// `null` or a null link.
    pub fn is_null_like(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Link(link) => link.is_null(),
            _ => false,
        }
    }

    pub fn as_link(&self) -> Option<&StoreLink> {
        match self {
            Self::Link(link) => Some(link),
            _ => None,
        }
    }

    pub fn as_field(&self) -> Option<&FieldValue> {
        match self {
            Self::Field(field) => Some(field),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Properties> {
        match self {
            Self::Object(props) => Some(props),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Number(n) => n.as_u64(),
            _ => None,
        }
    }
}

/// An entity with nested entities replaced by links.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NormalizedEntity {
    properties: Properties,
}

impl NormalizedEntity {
    pub fn new(properties: Properties) -> Self {
        Self { properties }
    }

    pub fn get(&self, name: &str) -> Option<&StoreValue> {
        self.properties.get(name)
    }

    pub fn insert<S: Into<String>>(&mut self, name: S, value: StoreValue) -> Option<StoreValue> {
        self.properties.insert(name.into(), value)
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    pub fn into_properties(self) -> Properties {
        self.properties
    }

    /// Numeric version token stored under `property`, if any.
    pub fn version(&self, property: &str) -> Option<u64> {
        self.get(property).and_then(StoreValue::as_u64)
    }

    /// A field-value wrapper found in the field map stored under `fields_property`.
    pub fn field(&self, fields_property: &str, name: &str) -> Option<&FieldValue> {
        self.get(fields_property)?.as_object()?.get(name)?.as_field()
    }
}

/// Records which fields of an entity were requested or received. Children of a node are the sub-fields reachable
/// through a spanning relationship.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldsTrie {
    children: BTreeMap<String, FieldsTrie>,
}

impl FieldsTrie {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from dotted paths relative to the entity, i.e. `Owner.Name` rather than `Account.Owner.Name`.
    pub fn from_paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut trie = Self::new();
        for path in paths {
            trie.insert_path(path.as_ref());
        }
        trie
    }

    /// Build from object-qualified field names (`Account.Owner.Name`), dropping the leading object name.
    pub fn from_qualified<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::from_paths(
            fields
                .into_iter()
                .filter_map(|f| f.as_ref().split_once('.').map(|(_, rest)| rest.to_string())),
        )
    }

    pub fn insert_path(&mut self, path: &str) {
        let mut node = self;
        for segment in path.split('.').filter(|s| !s.is_empty()) {
            node = node.children.entry(segment.to_string()).or_default();
        }
    }

    /// Child node for `name`, created when absent.
    pub fn child_mut(&mut self, name: &str) -> &mut FieldsTrie {
        self.children.entry(name.to_string()).or_default()
    }

    pub fn child(&self, name: &str) -> Option<&FieldsTrie> {
        self.children.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.children.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn union(&mut self, other: &FieldsTrie) {
        for (name, sub) in &other.children {
            self.child_mut(name).union(sub);
        }
    }

    /// All leaf paths in dotted form.
    pub fn paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (name, sub) in &self.children {
            if sub.is_empty() {
                out.push(name.clone());
            }
            else {
                out.extend(sub.paths().into_iter().map(|p| format!("{name}.{p}")));
            }
        }
        out
    }
}

pub(crate) fn field_to_json(field: &FieldValue, value: Value) -> Value {
    let mut obj = Map::new();
    obj.insert("displayValue".to_string(), field.display_value.clone().map_or(Value::Null, Value::String));
    obj.insert("value".to_string(), value);
    Value::Object(obj)
}
