//! Adapters: validated entry points which map an untrusted configuration object to a cache read, a network request
//! and an ingestion.
//!
//! Configuration problems come in two flavors. A missing mandatory parameter is a [`MissingFieldsError`]. A parameter
//! which is present but can't be coerced (an invalid record ID, an empty field list) makes the adapter answer with
//! `Ok(None)`: the caller's inputs are probably still loading.

use serde_json::Map;
use serde_json::Value;
use tracing::debug;
use tracing::instrument;

use crate::coerce::coerce_field_api_name_array;
use crate::coerce::coerce_object_api_name;
use crate::coerce::coerce_record_id_value;
use crate::coerce::validate_required;
use crate::environment::Environment;
use crate::error::AdapterError;
use crate::error::MissingFieldsError;
use crate::key::record_key;
use crate::representation::RecordDefaultsRepresentation;
use crate::request::ErrorResponse;
use crate::request::Method;
use crate::request::ResourceRequest;
use crate::selector::Selector;
use crate::selector::Snapshot;
use crate::traits::Representation;
use crate::types::CachePolicy;
use crate::types::SnapshotState;
use crate::value::FieldsTrie;

const GET_RECORD: &str = "getRecord";
const GET_RECORD_CREATE_DEFAULTS: &str = "getRecordCreateDefaults";
const UPDATE_RECORD: &str = "updateRecord";
const DELETE_RECORD: &str = "deleteRecord";

fn optional_field_list(config: &Value, name: &str) -> Option<Vec<String>> {
    config.get(name).and_then(coerce_field_api_name_array)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetRecordConfig {
    pub record_id:       String,
    pub fields:          Vec<String>,
    pub optional_fields: Vec<String>,
}

impl GetRecordConfig {
    pub fn from_untrusted(config: &Value) -> Result<Option<Self>, MissingFieldsError> {
        validate_required(GET_RECORD, config, &["recordId"])?;
        if config.get("fields").is_none() && config.get("optionalFields").is_none() {
            return Err(MissingFieldsError::new(GET_RECORD, ["fields"]));
        }

        let Some(record_id) = coerce_record_id_value(&config["recordId"])
        else {
            return Ok(None);
        };
        let fields = optional_field_list(config, "fields");
        let optional_fields = optional_field_list(config, "optionalFields");
        if fields.is_none() && optional_fields.is_none() {
            return Ok(None);
        }

        Ok(Some(Self {
            record_id,
            fields: fields.unwrap_or_default(),
            optional_fields: optional_fields.unwrap_or_default(),
        }))
    }

    pub fn key(&self) -> String {
        record_key(None, &self.record_id)
    }

    /// Only `fields` are required to be present in the cache; optional fields are fetched when the network is hit
    /// anyway.
    pub fn selector(&self) -> Selector {
        Selector::new(self.key()).with_fields(FieldsTrie::from_qualified(&self.fields))
    }

    pub fn request(&self) -> ResourceRequest {
        ResourceRequest::get(format!("/ui-api/records/{}", self.record_id))
            .query_opt("fields", non_empty(&self.fields))
            .query_opt("optionalFields", non_empty(&self.optional_fields))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GetRecordCreateDefaultsConfig {
    pub object_api_name: String,
    pub record_type_id:  Option<String>,
    pub optional_fields: Vec<String>,
}

impl GetRecordCreateDefaultsConfig {
    pub fn from_untrusted(config: &Value) -> Result<Option<Self>, MissingFieldsError> {
        validate_required(GET_RECORD_CREATE_DEFAULTS, config, &["objectApiName"])?;

        let Some(object_api_name) = coerce_object_api_name(&config["objectApiName"])
        else {
            return Ok(None);
        };
        let record_type_id = match config.get("recordTypeId") {
            None | Some(Value::Null) => None,
            Some(raw) => match coerce_record_id_value(raw) {
                Some(id) => Some(id),
                None => return Ok(None),
            },
        };

        Ok(Some(Self {
            object_api_name,
            record_type_id,
            optional_fields: optional_field_list(config, "optionalFields").unwrap_or_default(),
        }))
    }

    pub fn key(&self) -> String {
        RecordDefaultsRepresentation::key_for(&self.object_api_name, self.record_type_id.as_deref())
    }

    pub fn request(&self) -> ResourceRequest {
        ResourceRequest::get(format!("/ui-api/record-defaults/create/{}", self.object_api_name))
            .query_opt("recordTypeId", self.record_type_id.clone())
            .query_opt("optionalFields", non_empty(&self.optional_fields))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct UpdateRecordConfig {
    pub record_id: String,
    /// Field name to new value.
    pub fields:    Map<String, Value>,
}

impl UpdateRecordConfig {
    pub fn from_untrusted(config: &Value) -> Result<Option<Self>, MissingFieldsError> {
        validate_required(UPDATE_RECORD, config, &["recordId", "fields"])?;

        let Some(record_id) = coerce_record_id_value(&config["recordId"])
        else {
            return Ok(None);
        };
        let Some(fields) = config["fields"].as_object().filter(|f| !f.is_empty()).cloned()
        else {
            return Ok(None);
        };

        Ok(Some(Self { record_id, fields }))
    }

    pub fn request(&self) -> ResourceRequest {
        ResourceRequest::new(Method::Patch, format!("/ui-api/records/{}", self.record_id))
            .body(serde_json::json!({ "fields": self.fields }))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteRecordConfig {
    pub record_id: String,
}

impl DeleteRecordConfig {
    pub fn from_untrusted(config: &Value) -> Result<Option<Self>, MissingFieldsError> {
        validate_required(DELETE_RECORD, config, &["recordId"])?;
        Ok(coerce_record_id_value(&config["recordId"]).map(|record_id| Self { record_id }))
    }

    pub fn request(&self) -> ResourceRequest {
        ResourceRequest::new(Method::Delete, format!("/ui-api/records/{}", self.record_id))
    }
}

fn non_empty(list: &[String]) -> Option<Vec<String>> {
    (!list.is_empty()).then(|| list.to_vec())
}

// Turn a cached snapshot into the adapter answer. Cached errors are reported the same way network errors are.
fn answer(snapshot: Snapshot) -> Result<Option<Snapshot>, AdapterError> {
    match snapshot.error {
        Some(ref error) if snapshot.state == SnapshotState::Error => Err(AdapterError::Network(error.clone())),
        _ => Ok(Some(snapshot)),
    }
}

// Shared cache-then-network flow of read adapters.
async fn read_through(
    env: &Environment,
    representation: &dyn Representation,
    selector: Selector,
    request: ResourceRequest,
    policy: CachePolicy,
) -> Result<Option<Snapshot>, AdapterError> {
    if policy != CachePolicy::NoCache {
        let snapshot = env.revive(&selector).await;
        if snapshot.is_usable() || policy == CachePolicy::OnlyIfCached {
            debug!("answering '{}' from cache: {:?}", selector.key, snapshot.state);
            return answer(snapshot);
        }
    }

    match env.dispatch_resource_request(request).await {
        Ok(response) => {
            env.revive_payload(representation, &response.body).await;
            let outcome = env.store_ingest(representation, &response.body)?;
            env.store_broadcast().await;
            // The response may key differently from the request (a record type resolved by the server, a view
            // entity); its own key wins.
            let key = outcome.link().key().map(str::to_string).unwrap_or(selector.key);
            answer(env.store_lookup(&Selector {
                key,
                fields: selector.fields,
            }))
        }
        Err(error) => Err(on_network_error(env, &selector.key, error).await),
    }
}

async fn on_network_error(env: &Environment, key: &str, error: ErrorResponse) -> AdapterError {
    if error.is_cacheable() {
        env.store_ingest_error(key, error.clone());
        env.store_broadcast().await;
    }
    AdapterError::Network(error)
}

#[instrument(level = "debug", skip(env, config))]
pub async fn get_record(env: &Environment, config: &Value, policy: CachePolicy) -> Result<Option<Snapshot>, AdapterError> {
    let Some(config) = GetRecordConfig::from_untrusted(config)?
    else {
        return Ok(None);
    };
    let representation = env.record_representation();
    read_through(env, representation.as_ref(), config.selector(), config.request(), policy).await
}

#[instrument(level = "debug", skip(env, config))]
pub async fn get_record_create_defaults(
    env: &Environment,
    config: &Value,
    policy: CachePolicy,
) -> Result<Option<Snapshot>, AdapterError> {
    let Some(config) = GetRecordCreateDefaultsConfig::from_untrusted(config)?
    else {
        return Ok(None);
    };
    let representation = env.defaults_representation();
    read_through(
        env,
        representation.as_ref(),
        Selector::new(config.key()),
        config.request(),
        policy,
    )
    .await
}

/// Mutations always go to the network and are never deduplicated. The returned record is merged into the store.
#[instrument(level = "debug", skip(env, config))]
pub async fn update_record(env: &Environment, config: &Value) -> Result<Option<Snapshot>, AdapterError> {
    let Some(config) = UpdateRecordConfig::from_untrusted(config)?
    else {
        return Ok(None);
    };

    let response = env
        .dispatch_resource_request(config.request())
        .await
        .map_err(AdapterError::Network)?;
    let representation = env.record_representation();
    let outcome = env.store_ingest(representation.as_ref(), &response.body)?;
    env.store_broadcast().await;

    let key = outcome
        .link()
        .key()
        .map(str::to_string)
        .unwrap_or_else(|| record_key(None, &config.record_id));
    answer(env.store_lookup(&Selector::new(key)))
}

/// Delete a record remotely and evict it locally. Returns `false` if the configuration couldn't be coerced.
#[instrument(level = "debug", skip(env, config))]
pub async fn delete_record(env: &Environment, config: &Value) -> Result<bool, AdapterError> {
    let Some(config) = DeleteRecordConfig::from_untrusted(config)?
    else {
        return Ok(false);
    };

    env.dispatch_resource_request(config.request())
        .await
        .map_err(AdapterError::Network)?;
    env.store_evict(&record_key(None, &config.record_id)).await;
    env.store_broadcast().await;
    Ok(true)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn get_record_config_validation() {
        let err = GetRecordConfig::from_untrusted(&json!({})).unwrap_err();
        assert_eq!(err.to_string(), "adapter getRecord configuration must specify recordId");

        let err = GetRecordConfig::from_untrusted(&json!({"recordId": "001D000000IqhSL"})).unwrap_err();
        assert_eq!(err.fields, vec!["fields".to_string()]);

        // Still loading: not an error, just nothing to do.
        assert_eq!(
            GetRecordConfig::from_untrusted(&json!({"recordId": "bad", "fields": ["Account.Name"]})).unwrap(),
            None
        );
        assert_eq!(
            GetRecordConfig::from_untrusted(&json!({"recordId": "001D000000IqhSL", "fields": []})).unwrap(),
            None
        );

        let config = GetRecordConfig::from_untrusted(&json!({
            "recordId": "001D000000IqhSL",
            "fields": ["Account.Name", {"objectApiName": "Account", "fieldApiName": "Id"}, "Account.Name"],
        }))
        .unwrap()
        .unwrap();
        assert_eq!(config.record_id, "001D000000IqhSLIAZ");
        assert_eq!(config.fields, vec!["Account.Id".to_string(), "Account.Name".to_string()]);
        assert_eq!(config.key(), "UiApi::RecordRepresentation:001D000000IqhSLIAZ");
        assert_eq!(
            config.request().dedupe_key(),
            "GET:/services/data/v58.0/ui-api/records/001D000000IqhSLIAZ?fields=Account.Id,Account.Name"
        );
    }

    #[test]
    fn create_defaults_config() {
        let err = GetRecordCreateDefaultsConfig::from_untrusted(&json!({"recordTypeId": null})).unwrap_err();
        assert_eq!(err.fields, vec!["objectApiName".to_string()]);

        let config = GetRecordCreateDefaultsConfig::from_untrusted(&json!({"objectApiName": {"objectApiName": "Account"}}))
            .unwrap()
            .unwrap();
        assert_eq!(config.key(), "UiApi::RecordDefaultsTemplateCreateRepresentation:Account:");
        assert_eq!(config.record_type_id, None);
    }

    #[test]
    fn update_config_requires_fields() {
        let err = UpdateRecordConfig::from_untrusted(&json!({})).unwrap_err();
        assert_eq!(err.fields, vec!["fields".to_string(), "recordId".to_string()]);
        assert_eq!(
            UpdateRecordConfig::from_untrusted(&json!({"recordId": "001D000000IqhSL", "fields": {}})).unwrap(),
            None
        );
        let config = DeleteRecordConfig::from_untrusted(&json!({"recordId": "001D000000IqhSLIAZ"}))
            .unwrap()
            .unwrap();
        assert_eq!(config.request().method, Method::Delete);
    }
}
