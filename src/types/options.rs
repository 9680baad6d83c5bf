//! Request options and body/header sources

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use serde_json::{Map, Value, json};

use crate::fetch::RetryConfig;

/// A source of request headers.
///
/// Sources are merged in order, later ones overriding earlier ones.
#[derive(Clone)]
pub enum Headers {
    Map(BTreeMap<String, String>),
    Pairs(Vec<(String, String)>),
    Native(HeaderMap),
    /// Evaluated when the request is built (e.g. to read a fresh token).
    Dynamic(Arc<dyn Fn() -> Vec<(String, String)> + Send + Sync>),
}

impl std::fmt::Debug for Headers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Headers::Map(m) => f.debug_tuple("Map").field(m).finish(),
            Headers::Pairs(p) => f.debug_tuple("Pairs").field(p).finish(),
            Headers::Native(h) => f.debug_tuple("Native").field(h).finish(),
            Headers::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// One part of a multipart body.
#[derive(Debug, Clone, PartialEq)]
pub enum MultipartValue {
    Text(String),
    Bytes {
        bytes: Vec<u8>,
        file_name: Option<String>,
        mime: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultipartField {
    pub name: String,
    pub value: MultipartValue,
}

impl MultipartField {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: MultipartValue::Text(value.into()),
        }
    }

    pub fn file(name: impl Into<String>, file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            value: MultipartValue::Bytes {
                bytes,
                file_name: Some(file_name.into()),
                mime: None,
            },
        }
    }
}

/// Request body encodings.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    /// `application/x-www-form-urlencoded`
    Form(Vec<(String, String)>),
    Multipart(Vec<MultipartField>),
    /// Sent as-is.
    Raw {
        bytes: Vec<u8>,
        content_type: Option<String>,
    },
}

impl RequestBody {
    /// Representation used in request fingerprints. Binary payloads
    /// contribute a content hash instead of their bytes.
    pub(crate) fn key_value(&self) -> Value {
        match self {
            RequestBody::Json(v) => json!({ "json": v }),
            RequestBody::Form(pairs) => json!({ "form": pairs }),
            RequestBody::Multipart(fields) => {
                let parts: Vec<Value> = fields
                    .iter()
                    .map(|field| match &field.value {
                        MultipartValue::Text(t) => json!([field.name, t]),
                        MultipartValue::Bytes {
                            bytes, file_name, ..
                        } => json!([field.name, file_name, content_hash(bytes)]),
                    })
                    .collect();
                json!({ "multipart": parts })
            }
            RequestBody::Raw {
                bytes,
                content_type,
            } => json!({ "raw": content_hash(bytes), "contentType": content_type }),
        }
    }
}

fn content_hash(bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

/// Options for a single request (provider-agnostic)
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Query string values. `null` and empty strings are skipped.
    pub query: Map<String, Value>,
    /// Values for `:name` path segments.
    pub params: Map<String, Value>,
    pub headers: Vec<Headers>,
    pub body: Option<RequestBody>,
    /// Explicit tags replacing the path-derived ones.
    pub tags: Option<Vec<String>>,
    pub timeout: Option<Duration>,
    pub retry: Option<RetryConfig>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .push(Headers::Pairs(vec![(name.into(), value.into())]));
        self
    }

    pub fn headers(mut self, source: Headers) -> Self {
        self.headers.push(source);
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = Some(body);
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Layer `overrides` on top of `self`.
    ///
    /// Query and params merge key-wise, header sources are appended, and
    /// every other field is replaced when set in `overrides`.
    pub fn merge(&self, overrides: &RequestOptions) -> RequestOptions {
        let mut merged = self.clone();
        for (k, v) in &overrides.query {
            merged.query.insert(k.clone(), v.clone());
        }
        for (k, v) in &overrides.params {
            merged.params.insert(k.clone(), v.clone());
        }
        merged.headers.extend(overrides.headers.iter().cloned());
        if overrides.body.is_some() {
            merged.body = overrides.body.clone();
        }
        if overrides.tags.is_some() {
            merged.tags = overrides.tags.clone();
        }
        if overrides.timeout.is_some() {
            merged.timeout = overrides.timeout;
        }
        if overrides.retry.is_some() {
            merged.retry = overrides.retry.clone();
        }
        merged
    }

    /// The part of the options that identifies a request: query, params
    /// and body. Headers, timeouts and retry policy do not change the
    /// fingerprint.
    pub fn key_value(&self) -> Value {
        let mut key = Map::new();
        if !self.query.is_empty() {
            key.insert("query".into(), Value::Object(self.query.clone()));
        }
        if !self.params.is_empty() {
            key.insert("params".into(), Value::Object(self.params.clone()));
        }
        if let Some(body) = &self.body {
            key.insert("body".into(), body.key_value());
        }
        Value::Object(key)
    }
}
