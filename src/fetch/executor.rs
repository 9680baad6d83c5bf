//! reqwest-backed [`Fetcher`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, Url};
use tracing::{debug, instrument};

use super::body::{apply_body, decode_body};
use super::headers::merge_headers;
use super::retry::{RetryConfig, with_retry};
use super::url::build_url;
use super::{FetchRequest, Fetcher};
use crate::route::Method;
use crate::telemetry;
use crate::types::{MultipartValue, RequestBody, RequestError, Response};
use crate::{HuginnError, Result};

/// HTTP fetcher with retry on network failures.
///
/// A request's own [`RetryConfig`] (from its options) takes precedence over
/// the fetcher default.
#[derive(Clone)]
pub struct HttpFetcher {
    http: Client,
    retry: RetryConfig,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .build()
            .map_err(|e| HuginnError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(http))
    }

    /// Use a preconfigured client (proxies, TLS roots, pooled connections).
    pub fn with_client(http: Client) -> Self {
        Self {
            http,
            retry: RetryConfig::default(),
        }
    }

    /// Default retry policy for requests that do not set their own.
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn send_once(
        &self,
        method: Method,
        url: &Url,
        headers: &HeaderMap,
        body: Option<&RequestBody>,
        timeout: Option<Duration>,
    ) -> Response {
        let mut builder = self
            .http
            .request(method.to_reqwest(), url.clone())
            .headers(headers.clone());
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = body {
            builder = match apply_body(builder, body) {
                Ok(builder) => builder,
                Err(e) => return Response::failure(RequestError::Network(e.to_string())),
            };
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return Response::failure(RequestError::Network(e.to_string())),
        };
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => return Response::failure(RequestError::Network(e.to_string())),
        };
        let data = decode_body(&bytes);

        if status.is_success() {
            Response::success(status.as_u16(), data).with_headers(headers)
        } else {
            Response::failure(RequestError::Http {
                status: status.as_u16(),
                body: data,
            })
            .with_headers(headers)
        }
    }

    fn record_request(method: Method, start: Instant, response: &Response) {
        let status = if response.aborted() {
            "aborted"
        } else if response.is_success() {
            "ok"
        } else {
            "error"
        };
        metrics::counter!(telemetry::REQUESTS_TOTAL,
            "method" => method.as_str(),
            "status" => status,
        )
        .increment(1);
        metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS,
            "method" => method.as_str(),
        )
        .record(start.elapsed().as_secs_f64());
    }
}

/// Reject bodies that could never be encoded, before any attempt is made.
fn validate_body(body: &RequestBody) -> Result<()> {
    if let RequestBody::Multipart(fields) = body {
        for field in fields {
            if let MultipartValue::Bytes {
                mime: Some(mime), ..
            } = &field.value
            {
                reqwest::multipart::Part::bytes(Vec::new())
                    .mime_str(mime)
                    .map_err(|e| {
                        HuginnError::InvalidInput(format!(
                            "invalid MIME type '{mime}' for field '{}': {e}",
                            field.name
                        ))
                    })?;
            }
        }
    }
    Ok(())
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip_all, fields(method = %request.route.method, path = %request.path.join("/")))]
    async fn fetch(&self, request: FetchRequest) -> Result<Response> {
        let options = request.defaults.merge(&request.request);
        let url = build_url(&request.base_url, &request.path, &options.query)?;
        let headers = merge_headers(&options.headers)?;
        if let Some(body) = &options.body {
            validate_body(body)?;
        }
        let retry = options.retry.clone().unwrap_or_else(|| self.retry.clone());
        let method = request.route.method;

        debug!(url = %url, "sending request");
        let start = Instant::now();
        let response = with_retry(&retry, method, &request.signal, || {
            self.send_once(method, &url, &headers, options.body.as_ref(), options.timeout)
        })
        .await;
        Self::record_request(method, start, &response);
        Ok(response)
    }
}
