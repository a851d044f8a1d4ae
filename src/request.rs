use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Display;
use thiserror::Error;

pub const UI_API_BASE_URI: &str = "/services/data/v58.0";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Get,
    Post,
    Patch,
    Put,
    Delete,
}

impl Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    Single(String),
    List(Vec<String>),
}

impl QueryParam {
    fn render(&self) -> String {
        match self {
            Self::Single(v) => v.clone(),
            Self::List(values) => values.join(","),
        }
    }
}

impl From<&str> for QueryParam {
    fn from(value: &str) -> Self {
        Self::Single(value.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(value: String) -> Self {
        Self::Single(value)
    }
}

impl From<Vec<String>> for QueryParam {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ResourceRequest {
    pub method:       Method,
    pub base_uri:     String,
    pub path:         String,
    pub query_params: BTreeMap<String, QueryParam>,
    pub headers:      BTreeMap<String, String>,
    pub body:         Option<Value>,
}

impl ResourceRequest {
    pub fn new<P: Into<String>>(method: Method, path: P) -> Self {
        Self {
            method,
            base_uri: UI_API_BASE_URI.to_string(),
            path: path.into(),
            query_params: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn get<P: Into<String>>(path: P) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn query<K: Into<String>, V: Into<QueryParam>>(mut self, name: K, value: V) -> Self {
        self.query_params.insert(name.into(), value.into());
        self
    }

    /// Add a query parameter only when there is a value for it.
    pub fn query_opt<K: Into<String>, V: Into<QueryParam>>(self, name: K, value: Option<V>) -> Self {
        match value {
            Some(value) => self.query(name, value),
            None => self,
        }
    }

    pub fn header<K: Into<String>, V: Into<String>>(mut self, name: K, value: V) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Identity of the request for in-flight deduplication. Query parameters are emitted in name order and list
    /// values are sorted, so logically identical requests produce identical keys.
    pub fn dedupe_key(&self) -> String {
        let query = self
            .query_params
            .iter()
            .map(|(name, value)| {
                let value = match value {
                    QueryParam::List(values) => {
                        let mut values = values.clone();
                        values.sort();
                        QueryParam::List(values).render()
                    }
                    single => single.render(),
                };
                format!("{name}={value}")
            })
            .collect::<Vec<_>>()
            .join("&");
        format!("{}:{}{}?{query}", self.method, self.base_uri, self.path)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceResponse {
    pub status:  u16,
    pub ok:      bool,
    pub headers: BTreeMap<String, String>,
    pub body:    Value,
}

impl ResourceResponse {
    pub fn ok(body: Value) -> Self {
        Self {
            status: 200,
            ok: true,
            headers: BTreeMap::new(),
            body,
        }
    }
}

/// Transport error shape. Propagated unchanged to adapter callers and, for cacheable statuses, stored as an error
/// entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Error)]
#[error("request failed with {status} {status_text}")]
pub struct ErrorResponse {
    pub status:      u16,
    #[serde(rename = "statusText")]
    pub status_text: String,
    pub ok:          bool,
    pub headers:     BTreeMap<String, String>,
    pub body:        Value,
}

impl ErrorResponse {
    pub fn new<S: Into<String>>(status: u16, status_text: S, body: Value) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            ok: false,
            headers: BTreeMap::new(),
            body,
        }
    }

    pub fn not_found() -> Self {
        Self::new(
            404,
            "Not Found",
            serde_json::json!([{"errorCode": "NOT_FOUND", "message": "The requested resource does not exist"}]),
        )
    }

    /// Errors worth remembering for a while instead of hitting the network again.
    pub fn is_cacheable(&self) -> bool {
        self.status == 404
    }
}
