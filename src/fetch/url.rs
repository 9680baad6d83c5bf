//! URL construction.

use reqwest::Url;
use serde_json::{Map, Value};

use crate::{HuginnError, Result};

/// Join `base` and the resolved `path`, then append `query`.
///
/// Path segments are percent-encoded individually. Query pairs follow
/// [`query_pairs`].
pub(crate) fn build_url(base: &str, path: &[String], query: &Map<String, Value>) -> Result<Url> {
    let mut url = Url::parse(base)
        .map_err(|e| HuginnError::Configuration(format!("invalid base URL '{base}': {e}")))?;

    {
        let mut segments = url.path_segments_mut().map_err(|()| {
            HuginnError::Configuration(format!("base URL '{base}' cannot have a path"))
        })?;
        segments.pop_if_empty();
        segments.extend(path);
    }

    let pairs = query_pairs(query);
    if !pairs.is_empty() {
        url.query_pairs_mut().extend_pairs(pairs);
    }
    Ok(url)
}

/// Flatten a query map into `(key, value)` pairs in key order.
///
/// `null` and empty strings are skipped, arrays repeat their key once per
/// element, and objects are sent as JSON text.
pub(crate) fn query_pairs(query: &Map<String, Value>) -> Vec<(String, String)> {
    let mut keys: Vec<&String> = query.keys().collect();
    keys.sort();

    let mut pairs = Vec::new();
    for key in keys {
        match &query[key] {
            Value::Array(items) => {
                for item in items {
                    if let Some(v) = scalar(item) {
                        pairs.push((key.clone(), v));
                    }
                }
            }
            value => {
                if let Some(v) = scalar(value) {
                    pairs.push((key.clone(), v));
                }
            }
        }
    }
    pairs
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn joins_base_and_segments() {
        let url = build_url(
            "https://api.example.com/v1/",
            &["users".into(), "a b".into()],
            &Map::new(),
        )
        .unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/users/a%20b");
    }

    #[test]
    fn query_is_sorted_and_skips_empty() {
        let pairs = query_pairs(&map(json!({
            "z": 1,
            "a": "x",
            "empty": "",
            "none": null,
            "ids": [1, null, 2],
            "filter": {"k": "v"},
        })));
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), "x".to_string()),
                ("filter".to_string(), r#"{"k":"v"}"#.to_string()),
                ("ids".to_string(), "1".to_string()),
                ("ids".to_string(), "2".to_string()),
                ("z".to_string(), "1".to_string()),
            ]
        );
    }

    #[test]
    fn invalid_base_is_configuration_error() {
        let err = build_url("not a url", &[], &Map::new()).unwrap_err();
        assert!(err.is_configuration());
    }
}
