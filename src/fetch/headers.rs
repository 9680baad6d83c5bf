//! Header merging.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::types::Headers;
use crate::{HuginnError, Result};

/// Merge header sources in order; a later source overrides earlier values
/// for the same name. `Dynamic` sources are evaluated here.
pub(crate) fn merge_headers<'a, I>(sources: I) -> Result<HeaderMap>
where
    I: IntoIterator<Item = &'a Headers>,
{
    let mut merged = HeaderMap::new();
    for source in sources {
        match source {
            Headers::Map(map) => {
                for (name, value) in map {
                    insert(&mut merged, name, value)?;
                }
            }
            Headers::Pairs(pairs) => {
                for (name, value) in pairs {
                    insert(&mut merged, name, value)?;
                }
            }
            Headers::Native(native) => {
                for name in native.keys() {
                    merged.remove(name);
                    for value in native.get_all(name) {
                        merged.append(name.clone(), value.clone());
                    }
                }
            }
            Headers::Dynamic(produce) => {
                for (name, value) in produce() {
                    insert(&mut merged, &name, &value)?;
                }
            }
        }
    }
    Ok(merged)
}

fn insert(map: &mut HeaderMap, name: &str, value: &str) -> Result<()> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| HuginnError::Configuration(format!("invalid header name '{name}': {e}")))?;
    let value = HeaderValue::from_str(value).map_err(|e| {
        HuginnError::Configuration(format!("invalid value for header '{name}': {e}"))
    })?;
    map.insert(name, value);
    Ok(())
}
