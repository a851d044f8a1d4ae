//! Built-in entity types.

use serde_json::Value;
use std::time::Duration;

use crate::coerce::coerce_record_id_18;
use crate::error::ValidationError;
use crate::key::record_key;
use crate::key::record_template_key;
use crate::key::RECORD_TEMPLATE_CREATE_TYPE_NAME;
use crate::key::RECORD_TYPE_NAME;
use crate::traits::Representation;
use crate::types::IngestPath;
use crate::types::MergeStrategy;

pub const RECORD_DEFAULTS_TYPE_NAME: &str = "RecordDefaultsTemplateCreateRepresentation";

const RECORD_TTL: Duration = Duration::from_secs(30);
const TEMPLATE_TTL: Duration = Duration::from_secs(900);

fn non_empty_str<'a>(input: &'a Value, name: &str) -> Option<&'a str> {
    input.get(name).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn validate_field_map(input: &Value, path: &IngestPath) -> Result<(), ValidationError> {
    match input.get("fields") {
        None => Ok(()),
        Some(Value::Object(fields)) => {
            for (name, field) in fields {
                if !field.as_object().is_some_and(|f| f.contains_key("value")) {
                    return Err(ValidationError::new(
                        path.child("fields").child(name),
                        "a field must be an object with a 'value' property",
                    ));
                }
            }
            Ok(())
        }
        Some(_) => Err(ValidationError::new(path.child("fields"), "'fields' must be an object")),
    }
}

/// A record with its field values. Spanning fields hold nested records which are normalized into entries of their
/// own.
#[derive(Clone, Debug)]
pub struct RecordRepresentation {
    ttl: Duration,
}

impl RecordRepresentation {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }
}

impl Default for RecordRepresentation {
    fn default() -> Self {
        Self::new(RECORD_TTL)
    }
}

impl Representation for RecordRepresentation {
    fn type_name(&self) -> &'static str {
        RECORD_TYPE_NAME
    }

    fn key_of(&self, input: &Value) -> Option<String> {
        let id = non_empty_str(input, "id")?;
        // 15 and 18 character references to the same record must share a key.
        let id = coerce_record_id_18(id).unwrap_or_else(|| id.to_string());
        Some(record_key(non_empty_str(input, "apiName"), &id))
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    fn version_property(&self) -> Option<&'static str> {
        Some("weakEtag")
    }

    fn fields_property(&self) -> Option<&'static str> {
        Some("fields")
    }

    fn spanning_representation(&self) -> Option<&dyn Representation> {
        Some(self)
    }

    fn validate(&self, input: &Value, path: &IngestPath) -> Result<(), ValidationError> {
        if !input.is_object() {
            return Err(ValidationError::new(path, "a record must be an object"));
        }
        if non_empty_str(input, "id").is_none() {
            return Err(ValidationError::new(path, "a record must have a non-empty 'id'"));
        }
        if let Some(etag) = input.get("weakEtag") {
            if !etag.is_u64() {
                return Err(ValidationError::new(
                    path.child("weakEtag"),
                    "'weakEtag' must be a non-negative integer",
                ));
            }
        }
        validate_field_map(input, path)
    }
}

/// Record template returned by the create-defaults resource. Fields arrive as a loose map and are merged as a union.
#[derive(Clone, Debug)]
pub struct RecordTemplateRepresentation {
    ttl: Duration,
}

impl RecordTemplateRepresentation {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }
}

impl Default for RecordTemplateRepresentation {
    fn default() -> Self {
        Self::new(TEMPLATE_TTL)
    }
}

impl Representation for RecordTemplateRepresentation {
    fn type_name(&self) -> &'static str {
        RECORD_TEMPLATE_CREATE_TYPE_NAME
    }

    fn key_of(&self, input: &Value) -> Option<String> {
        let api_name = non_empty_str(input, "apiName")?;
        Some(record_template_key(api_name, non_empty_str(input, "recordTypeId")))
    }

    fn ttl(&self) -> Duration {
        self.ttl
    }

    fn merge_strategy(&self) -> MergeStrategy {
        MergeStrategy::ShallowUnion
    }

    fn fields_property(&self) -> Option<&'static str> {
        Some("fields")
    }

    fn validate(&self, input: &Value, path: &IngestPath) -> Result<(), ValidationError> {
        if non_empty_str(input, "apiName").is_none() {
            return Err(ValidationError::new(path, "a record template must have a non-empty 'apiName'"));
        }
        validate_field_map(input, path)
    }
}

/// Envelope of the create-defaults resource: the template under `record` plus plain metadata.
#[derive(Clone, Debug, Default)]
pub struct RecordDefaultsRepresentation {
    template: RecordTemplateRepresentation,
}

impl RecordDefaultsRepresentation {
    pub fn new(ttl: Duration) -> Self {
        Self {
            template: RecordTemplateRepresentation::new(ttl),
        }
    }

    /// Key for the given object and record type, usable before anything has been fetched.
    pub fn key_for(api_name: &str, record_type_id: Option<&str>) -> String {
        crate::key::build_key(
            crate::key::UI_API_NAMESPACE,
            RECORD_DEFAULTS_TYPE_NAME,
            &[api_name, record_type_id.unwrap_or_default()],
        )
    }
}

impl Representation for RecordDefaultsRepresentation {
    fn type_name(&self) -> &'static str {
        RECORD_DEFAULTS_TYPE_NAME
    }

    fn key_of(&self, input: &Value) -> Option<String> {
        let record = input.get("record")?;
        let api_name = non_empty_str(record, "apiName")?;
        Some(Self::key_for(api_name, non_empty_str(record, "recordTypeId")))
    }

    fn ttl(&self) -> Duration {
        self.template.ttl()
    }

    fn child_representation(&self, property: &str) -> Option<&dyn Representation> {
        (property == "record").then_some(&self.template as &dyn Representation)
    }

    fn validate(&self, input: &Value, path: &IngestPath) -> Result<(), ValidationError> {
        let Some(record) = input.get("record")
        else {
            return Err(ValidationError::new(path, "record defaults must contain a 'record'"));
        };
        self.template.validate(record, &path.child("record"))
    }
}
