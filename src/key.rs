//! Request fingerprints.
//!
//! [`create_query_key`] serializes `{method, options, path}` as canonical
//! JSON: object keys are emitted in sorted order at every level, arrays keep
//! their order. Two logically equal requests therefore always produce the
//! same key, regardless of how their option maps were built.

use serde_json::Value;

use crate::route::Method;

/// Placeholder emitted in place of structures nested beyond [`MAX_KEY_DEPTH`].
pub const CIRCULAR_MARKER: &str = "[Circular]";

/// Nesting depth after which option values are replaced by [`CIRCULAR_MARKER`].
///
/// `serde_json::Value` trees cannot reference themselves, so runaway
/// nesting is the only way a recursive structure can reach the key builder.
pub const MAX_KEY_DEPTH: usize = 64;

/// Build the canonical cache key for a request.
///
/// Never fails and always returns a finite string.
pub fn create_query_key(path: &[String], method: Method, options: &Value) -> String {
    let mut out = String::with_capacity(64);
    out.push_str("{\"method\":");
    push_json_str(&mut out, method.as_str());
    out.push_str(",\"options\":");
    write_canonical(&mut out, options, 1);
    out.push_str(",\"path\":[");
    for (i, segment) in path.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        push_json_str(&mut out, segment);
    }
    out.push_str("]}");
    out
}

fn write_canonical(out: &mut String, value: &Value, depth: usize) {
    if depth > MAX_KEY_DEPTH {
        push_json_str(out, CIRCULAR_MARKER);
        return;
    }
    match value {
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item, depth + 1);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                push_json_str(out, key);
                out.push(':');
                write_canonical(out, &map[key.as_str()], depth + 1);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn push_json_str(out: &mut String, s: &str) {
    // Display for Value::String performs JSON escaping and cannot fail.
    out.push_str(&Value::String(s.to_owned()).to_string());
}
