//! Route records and path-derived tags.
//!
//! A [`Route`] is the explicit `{path, method}` value describing a logical
//! API call. Path segments starting with `:` are parameters resolved from
//! the request's `params` map before the request is sent.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{HuginnError, Result};

/// HTTP method of a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        }
    }

    /// Operation kind a method maps to by default.
    pub fn operation(&self) -> OperationType {
        match self {
            Method::Get => OperationType::Read,
            _ => OperationType::Write,
        }
    }

    pub(crate) fn to_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of operation a plugin participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// Queries: cached, deduplicated, refetchable.
    Read,
    /// Mutations: optimistic updates and invalidation.
    Write,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Read => "read",
            OperationType::Write => "write",
        }
    }
}

/// A logical API call shape: path segments plus method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Route {
    pub path: Vec<String>,
    pub method: Method,
}

impl Route {
    /// Build a route from a slash-separated path such as `"users/:id"`.
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            path: path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
            method,
        }
    }

    pub fn get(path: &str) -> Self {
        Self::new(Method::Get, path)
    }

    pub fn post(path: &str) -> Self {
        Self::new(Method::Post, path)
    }

    pub fn put(path: &str) -> Self {
        Self::new(Method::Put, path)
    }

    pub fn patch(path: &str) -> Self {
        Self::new(Method::Patch, path)
    }

    pub fn delete(path: &str) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Endpoint identity shared by every call to this route, independent of
    /// options: `"GET users/:id"`.
    pub fn endpoint(&self) -> String {
        format!("{} {}", self.method, self.path.join("/"))
    }

    /// Substitute `:name` segments with values from `params`.
    ///
    /// Strings are used verbatim, numbers and booleans are rendered. A
    /// missing or non-scalar parameter is a caller error.
    pub fn resolve(&self, params: &Map<String, Value>) -> Result<Vec<String>> {
        self.path
            .iter()
            .map(|segment| match segment.strip_prefix(':') {
                None => Ok(segment.clone()),
                Some(name) => match params.get(name) {
                    Some(Value::String(s)) => Ok(s.clone()),
                    Some(Value::Number(n)) => Ok(n.to_string()),
                    Some(Value::Bool(b)) => Ok(b.to_string()),
                    Some(other) => Err(HuginnError::InvalidInput(format!(
                        "path parameter '{name}' must be a scalar, got {other}"
                    ))),
                    None => Err(HuginnError::InvalidInput(format!(
                        "missing path parameter '{name}' for {}",
                        self.endpoint()
                    ))),
                },
            })
            .collect()
    }
}

/// Hierarchical tags for a resolved path: `["users", "users/123"]`.
pub fn generate_tags(resolved: &[String]) -> Vec<String> {
    let mut tags = Vec::with_capacity(resolved.len());
    let mut current = String::new();
    for segment in resolved {
        if !current.is_empty() {
            current.push('/');
        }
        current.push_str(segment);
        tags.push(current.clone());
    }
    tags
}

/// The most specific tag of a resolved path (`"users/123"`).
pub fn self_tag(resolved: &[String]) -> Option<String> {
    if resolved.is_empty() {
        None
    } else {
        Some(resolved.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn route_splits_and_skips_empty_segments() {
        let route = Route::get("/users//123/");
        assert_eq!(route.path, vec!["users", "123"]);
        assert_eq!(route.endpoint(), "GET users/123");
    }

    #[test]
    fn resolve_substitutes_params() {
        let route = Route::get("users/:id/posts");
        let params = json!({"id": 42}).as_object().cloned().unwrap();
        assert_eq!(route.resolve(&params).unwrap(), vec!["users", "42", "posts"]);
    }

    #[test]
    fn resolve_missing_param_is_invalid_input() {
        let route = Route::delete("users/:id");
        let err = route.resolve(&Map::new()).unwrap_err();
        assert!(matches!(err, HuginnError::InvalidInput(_)));
        assert!(err.to_string().contains("id"));
    }

    #[test]
    fn tags_are_hierarchical() {
        let resolved = vec!["users".to_string(), "123".to_string()];
        assert_eq!(generate_tags(&resolved), vec!["users", "users/123"]);
        assert_eq!(self_tag(&resolved).as_deref(), Some("users/123"));
        assert!(generate_tags(&[]).is_empty());
    }

    #[test]
    fn method_maps_to_operation() {
        assert_eq!(Method::Get.operation(), OperationType::Read);
        assert_eq!(Method::Patch.operation(), OperationType::Write);
    }
}
