//! Request body encoding and response body decoding.

use reqwest::RequestBuilder;
use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::warn;

use crate::types::{MultipartValue, RequestBody};
use crate::{HuginnError, Result};

/// Attach `body` to `builder` with the matching content type.
pub(crate) fn apply_body(builder: RequestBuilder, body: &RequestBody) -> Result<RequestBuilder> {
    Ok(match body {
        RequestBody::Json(value) => {
            if cfg!(debug_assertions) && contains_byte_array(value, 0) {
                warn!(
                    "JSON request body contains a byte-array-like value; \
                     send binary data as RequestBody::Raw or Multipart instead"
                );
            }
            builder.json(value)
        }
        RequestBody::Form(pairs) => builder.form(pairs),
        RequestBody::Multipart(fields) => {
            let mut form = Form::new();
            for field in fields {
                form = match &field.value {
                    MultipartValue::Text(text) => form.text(field.name.clone(), text.clone()),
                    MultipartValue::Bytes {
                        bytes,
                        file_name,
                        mime,
                    } => {
                        let mut part = Part::bytes(bytes.clone());
                        if let Some(name) = file_name {
                            part = part.file_name(name.clone());
                        }
                        if let Some(mime) = mime {
                            part = part.mime_str(mime).map_err(|e| {
                                HuginnError::InvalidInput(format!(
                                    "invalid MIME type '{mime}' for field '{}': {e}",
                                    field.name
                                ))
                            })?;
                        }
                        form.part(field.name.clone(), part)
                    }
                };
            }
            builder.multipart(form)
        }
        RequestBody::Raw {
            bytes,
            content_type,
        } => {
            let builder = match content_type {
                Some(ct) => builder.header(reqwest::header::CONTENT_TYPE, ct.as_str()),
                None => builder,
            };
            builder.body(bytes.clone())
        }
    })
}

/// Arrays of at least this many integers in `0..=255` look like serialized
/// binary data.
const BYTE_ARRAY_MIN_LEN: usize = 16;

fn contains_byte_array(value: &Value, depth: usize) -> bool {
    if depth > crate::key::MAX_KEY_DEPTH {
        return false;
    }
    match value {
        Value::Array(items) => {
            let bytes_like = items.len() >= BYTE_ARRAY_MIN_LEN
                && items
                    .iter()
                    .all(|v| v.as_u64().is_some_and(|n| n <= u8::MAX as u64));
            bytes_like || items.iter().any(|v| contains_byte_array(v, depth + 1))
        }
        Value::Object(map) => map.values().any(|v| contains_byte_array(v, depth + 1)),
        _ => false,
    }
}

/// Decode a response body: empty ⇒ `null`, JSON when it parses, text
/// otherwise.
pub(crate) fn decode_body(bytes: &[u8]) -> Value {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decode_handles_empty_json_and_text() {
        assert_eq!(decode_body(b""), Value::Null);
        assert_eq!(decode_body(b"  \n"), Value::Null);
        assert_eq!(decode_body(br#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(decode_body(b"plain"), json!("plain"));
    }

    #[test]
    fn detects_byte_arrays() {
        let bytes: Vec<u8> = (0..32).collect();
        assert!(contains_byte_array(&json!({"file": bytes}), 0));
        assert!(!contains_byte_array(&json!({"ids": [1, 2, 3]}), 0));
        assert!(!contains_byte_array(&json!(vec![1000; 20]), 0));
    }
}
