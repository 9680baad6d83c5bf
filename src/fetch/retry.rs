//! Retry configuration, delay calculation, and the shared retry loop.
//!
//! Only transient failures ([`RequestError::is_transient`]) are retried.
//! HTTP error statuses resolve immediately into the error branch, and an
//! abort short-circuits both attempts and backoff sleeps.

use std::future::Future;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::route::Method;
use crate::sync::AbortSignal;
use crate::telemetry;
use crate::types::Response;

/// Configuration for retry behaviour on network failures.
///
/// ```rust
/// # use huginn::RetryConfig;
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .retries(5)
///     .base_delay(Duration::from_millis(200));
/// assert_eq!(config.delay_for_attempt(2), Duration::from_millis(800));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the initial attempt. 0 = no retry. Default: 3.
    pub retries: u32,
    /// Delay before the first retry. Default: 1000ms.
    pub base_delay: Duration,
    /// Cap on exponential growth. Default: 30s.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single attempt, no retry.
    pub fn disabled() -> Self {
        Self {
            retries: 0,
            ..Self::default()
        }
    }

    pub fn retries(mut self, n: u32) -> Self {
        self.retries = n;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay before retry number `attempt` (0-indexed):
    /// `base_delay * 2^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt));
        delay.min(self.max_delay)
    }
}

/// File representation of [`RetryConfig`] (millisecond integers, or
/// `false` to disable).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RetrySettings {
    Enabled(bool),
    Policy {
        #[serde(default = "default_retries")]
        retries: u32,
        #[serde(default = "default_base_delay_ms")]
        base_delay_ms: u64,
        #[serde(default = "default_max_delay_ms")]
        max_delay_ms: u64,
    },
}

fn default_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl From<RetrySettings> for RetryConfig {
    fn from(settings: RetrySettings) -> Self {
        match settings {
            RetrySettings::Enabled(true) => RetryConfig::default(),
            RetrySettings::Enabled(false) => RetryConfig::disabled(),
            RetrySettings::Policy {
                retries,
                base_delay_ms,
                max_delay_ms,
            } => RetryConfig {
                retries,
                base_delay: Duration::from_millis(base_delay_ms),
                max_delay: Duration::from_millis(max_delay_ms),
            },
        }
    }
}

/// Run `attempt` until it yields a non-transient outcome or retries are
/// exhausted.
///
/// Returns the last response seen. When `signal` fires, returns
/// [`Response::cancelled`] without waiting for the in-flight attempt or the
/// remaining backoff.
pub(crate) async fn with_retry<F, Fut>(
    config: &RetryConfig,
    method: Method,
    signal: &AbortSignal,
    attempt: F,
) -> Response
where
    F: Fn() -> Fut,
    Fut: Future<Output = Response>,
{
    let mut retry = 0;
    loop {
        if signal.is_aborted() {
            return Response::cancelled();
        }
        let response = tokio::select! {
            biased;
            _ = signal.aborted() => return Response::cancelled(),
            response = attempt() => response,
        };

        let transient = response.error().is_some_and(|e| e.is_transient());
        if !transient || retry >= config.retries {
            return response;
        }

        let delay = config.delay_for_attempt(retry);
        metrics::counter!(telemetry::RETRIES_TOTAL, "method" => method.as_str()).increment(1);
        warn!(
            method = method.as_str(),
            attempt = retry + 1,
            retries = config.retries,
            delay_ms = delay.as_millis() as u64,
            error = ?response.error(),
            "retrying after network error"
        );
        tokio::select! {
            biased;
            _ = signal.aborted() => return Response::cancelled(),
            _ = tokio::time::sleep(delay) => {}
        }
        retry += 1;
    }
}
