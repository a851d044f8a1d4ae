//! Coercion of untrusted adapter input into canonical forms.
//!
//! Coercers never fail loudly: anything that cannot be turned into the expected shape yields `None`. Only
//! [`validate_required`] reports an error, since a missing mandatory parameter is a programming mistake.

use serde_json::Value;

use crate::error::MissingFieldsError;

const RECORD_ID_SUFFIX_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456";

/// `true` if the string has the length and the alphabet of a 15- or 18-character record ID.
pub fn is_record_id(id: &str) -> bool {
    matches!(id.len(), 15 | 18) && id.bytes().all(|b| b.is_ascii_alphanumeric())
}

fn record_id_suffix(id15: &str) -> String {
    id15.as_bytes()
        .chunks(5)
        .map(|chunk| {
            let flags = chunk
                .iter()
                .enumerate()
                .filter(|(_, b)| b.is_ascii_uppercase())
                .fold(0usize, |acc, (i, _)| acc | (1 << i));
            RECORD_ID_SUFFIX_ALPHABET[flags] as char
        })
        .collect()
}

/// Convert a 15-character record ID into its case-insensitive 18-character form. 18-character IDs pass through.
pub fn coerce_record_id_18(id: &str) -> Option<String> {
    if !is_record_id(id) {
        return None;
    }
    if id.len() == 18 {
        return Some(id.to_string());
    }
    Some(format!("{id}{}", record_id_suffix(id)))
}

/// Same as [`coerce_record_id_18`] for a JSON value. Non-string values are rejected.
pub fn coerce_record_id_value(raw: &Value) -> Option<String> {
    raw.as_str().and_then(coerce_record_id_18)
}

/// The 15-character form of a record ID.
pub fn record_id_15(id: &str) -> Option<String> {
    is_record_id(id).then(|| id[..15].to_string())
}

/// `true` for an 18-character ID whose suffix matches its first 15 characters.
pub fn is_valid_record_id_18(id: &str) -> bool {
    id.len() == 18 && is_record_id(id) && record_id_suffix(&id[..15]) == id[15..]
}

fn non_empty_str(raw: &Value) -> Option<&str> {
    raw.as_str().filter(|s| !s.is_empty())
}

/// Object API name: either a non-empty string or an `{"objectApiName": ...}` object.
pub fn coerce_object_api_name(raw: &Value) -> Option<String> {
    match raw {
        Value::String(_) => non_empty_str(raw).map(str::to_string),
        Value::Object(obj) => obj.get("objectApiName").and_then(non_empty_str).map(str::to_string),
        _ => None,
    }
}

/// Qualified field API name (`Account.Name`). Accepts the string form or an
/// `{"objectApiName": ..., "fieldApiName": ...}` object.
pub fn coerce_field_api_name(raw: &Value) -> Option<String> {
    match raw {
        Value::String(_) => non_empty_str(raw).map(str::to_string),
        Value::Object(obj) => {
            let object = obj.get("objectApiName").and_then(non_empty_str)?;
            let field = obj.get("fieldApiName").and_then(non_empty_str)?;
            Some(format!("{object}.{field}"))
        }
        _ => None,
    }
}

/// Generic array coercion. A scalar becomes a single element list; any invalid element invalidates the whole list;
/// the result is sorted and deduplicated.
pub fn coerce_string_array<F>(raw: &Value, element: F) -> Option<Vec<String>>
where
    F: Fn(&Value) -> Option<String>,
{
    let mut out = match raw {
        Value::Null => return None,
        Value::Array(items) => {
            if items.is_empty() {
                return None;
            }
            items.iter().map(&element).collect::<Option<Vec<_>>>()?
        }
        scalar => vec![element(scalar)?],
    };
    out.sort();
    out.dedup();
    Some(out)
}

pub fn coerce_field_api_name_array(raw: &Value) -> Option<Vec<String>> {
    coerce_string_array(raw, coerce_field_api_name)
}

pub fn coerce_record_id_array(raw: &Value) -> Option<Vec<String>> {
    coerce_string_array(raw, coerce_record_id_value)
}

/// Check an untrusted configuration object for mandatory parameters. `null` counts as missing.
pub fn validate_required(adapter: &str, config: &Value, required: &[&str]) -> Result<(), MissingFieldsError> {
    let missing = required
        .iter()
        .filter(|name| config.get(**name).is_none_or(Value::is_null))
        .collect::<Vec<_>>();
    if missing.is_empty() {
        Ok(())
    }
    else {
        Err(MissingFieldsError::new(adapter, missing))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    #[test]
    fn digits_only_id_gets_aaa_suffix() {
        assert_eq!(
            coerce_record_id_18("123456789012345").as_deref(),
            Some("123456789012345AAA")
        );
    }

    #[test]
    fn mixed_case_id() {
        assert_eq!(
            coerce_record_id_18("001D000000IqhSL").as_deref(),
            Some("001D000000IqhSLIAZ")
        );
        assert!(is_valid_record_id_18("001D000000IqhSLIAZ"));
        assert!(!is_valid_record_id_18("001D000000IqhSLAAA"));
    }

    #[test]
    fn eighteen_passes_through_and_inverse_roundtrips() {
        let id = "001D000000IqhSLIAZ";
        assert_eq!(coerce_record_id_18(id).as_deref(), Some(id));
        let short = record_id_15(id).unwrap();
        assert_eq!(short, "001D000000IqhSL");
        assert_eq!(coerce_record_id_18(&short).as_deref(), Some(id));
    }

    #[test]
    fn bad_ids() {
        assert_eq!(coerce_record_id_18(""), None);
        assert_eq!(coerce_record_id_18("001x"), None);
        assert_eq!(coerce_record_id_18("00100000000000!"), None);
        assert_eq!(coerce_record_id_value(&json!(42)), None);
    }

    #[test]
    fn field_names() {
        assert_eq!(coerce_field_api_name(&json!("Account.Name")).as_deref(), Some("Account.Name"));
        assert_eq!(
            coerce_field_api_name(&json!({"objectApiName": "Account", "fieldApiName": "Name"})).as_deref(),
            Some("Account.Name")
        );
        assert_eq!(coerce_field_api_name(&json!({"objectApiName": "Account"})), None);
        assert_eq!(coerce_field_api_name(&json!("")), None);
        assert_eq!(coerce_object_api_name(&json!({"objectApiName": "Account"})).as_deref(), Some("Account"));
    }

    #[test]
    fn arrays() {
        assert_eq!(coerce_field_api_name_array(&Value::Null), None);
        assert_eq!(coerce_field_api_name_array(&json!([])), None);
        assert_eq!(coerce_field_api_name_array(&json!("")), None);
        assert_eq!(coerce_field_api_name_array(&json!(["Account.Name", ""])), None);
        assert_eq!(
            coerce_field_api_name_array(&json!("Account.Name")),
            Some(vec!["Account.Name".to_string()])
        );
        assert_eq!(
            coerce_field_api_name_array(&json!([
                "Account.Phone",
                {"objectApiName": "Account", "fieldApiName": "Name"},
                "Account.Phone"
            ])),
            Some(vec!["Account.Name".to_string(), "Account.Phone".to_string()])
        );
        assert_eq!(
            coerce_record_id_array(&json!(["123456789012345", "123456789012345AAA"])),
            Some(vec!["123456789012345AAA".to_string()])
        );
    }

    #[test]
    fn required() {
        let config = json!({"recordId": "001", "fields": null});
        assert!(validate_required("getRecord", &config, &["recordId"]).is_ok());
        let err = validate_required("getRecord", &config, &["recordId", "layoutTypes", "fields"]).unwrap_err();
        assert_eq!(err.fields, vec!["fields".to_string(), "layoutTypes".to_string()]);
    }
}
