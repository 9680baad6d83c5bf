//! Response types

use reqwest::header::HeaderMap;
use serde_json::Value;

/// Why a request produced no data.
///
/// These are outcomes, not crate errors: they are carried inside a
/// [`Response`] and stored on cache entries.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    /// The server answered with a non-2xx status. Never retried.
    #[error("HTTP error ({status})")]
    Http { status: u16, body: Value },

    /// Transport failure (connect, timeout, reset). Retried with backoff.
    #[error("network error: {0}")]
    Network(String),

    /// The request was cancelled through its abort signal.
    #[error("request aborted")]
    Aborted,
}

impl RequestError {
    /// Whether a retry could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, RequestError::Network(_))
    }

    /// HTTP status for `Http` errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Result of a request: data on success, a [`RequestError`] otherwise.
///
/// `status` is `0` when no HTTP response exists (network failure, abort,
/// or a synthetic response produced by a plugin).
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub result: Result<Value, RequestError>,
    pub headers: HeaderMap,
}

impl Response {
    pub fn success(status: u16, data: Value) -> Self {
        Self {
            status,
            result: Ok(data),
            headers: HeaderMap::new(),
        }
    }

    pub fn failure(error: RequestError) -> Self {
        let status = error.status().unwrap_or(0);
        Self {
            status,
            result: Err(error),
            headers: HeaderMap::new(),
        }
    }

    /// The `{aborted: true}` outcome.
    pub fn cancelled() -> Self {
        Self::failure(RequestError::Aborted)
    }

    /// Synthetic empty success used when a plugin suppresses a fetch and no
    /// cached data exists.
    pub fn empty() -> Self {
        Self::success(0, Value::Null)
    }

    /// Serve cached data if present, otherwise [`Response::empty`].
    pub fn from_cached(data: Option<Value>) -> Self {
        match data {
            Some(data) => Self::success(200, data),
            None => Self::empty(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn data(&self) -> Option<&Value> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&RequestError> {
        self.result.as_ref().err()
    }

    pub fn aborted(&self) -> bool {
        matches!(self.result, Err(RequestError::Aborted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn success_has_data_and_no_error() {
        let r = Response::success(200, json!([1]));
        assert!(r.is_success());
        assert_eq!(r.data(), Some(&json!([1])));
        assert!(r.error().is_none());
        assert!(!r.aborted());
    }

    #[test]
    fn http_failure_carries_status() {
        let r = Response::failure(RequestError::Http {
            status: 404,
            body: json!({"message": "nope"}),
        });
        assert_eq!(r.status, 404);
        assert!(r.data().is_none());
        assert!(!r.error().unwrap().is_transient());
    }

    #[test]
    fn cancelled_is_aborted() {
        let r = Response::cancelled();
        assert!(r.aborted());
        assert_eq!(r.status, 0);
    }
}
