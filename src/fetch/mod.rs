//! Fetch executor: the network call beneath the plugin chain.
//!
//! [`Fetcher`] is the seam the rest of the crate talks to. [`HttpFetcher`]
//! is the reqwest implementation; tests substitute their own.
//!
//! A fetcher resolves every transport outcome into a [`Response`]:
//! HTTP error statuses, network failures and aborts are values, not
//! errors. Only configuration problems (bad base URL, invalid header)
//! return `Err`.

mod body;
pub mod executor;
mod headers;
pub mod retry;
mod url;

pub use executor::HttpFetcher;
pub use retry::{RetryConfig, RetrySettings};

use async_trait::async_trait;

use crate::Result;
use crate::route::Route;
use crate::sync::AbortSignal;
use crate::types::{RequestOptions, Response};

/// Everything a fetcher needs for one logical request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub base_url: String,
    pub route: Route,
    /// Route path with `:params` substituted.
    pub path: Vec<String>,
    /// Client-wide defaults, layered beneath `request`.
    pub defaults: RequestOptions,
    pub request: RequestOptions,
    pub signal: AbortSignal,
}

/// Performs network calls.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<Response>;
}
