//! Telemetry metric name constants.
//!
//! Centralised metric names for huginn operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `huginn_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `method`: HTTP method of the request (e.g. "GET", "POST")
//! - `operation`: operation kind: "read" or "write"
//! - `status`: outcome: "ok", "error" or "aborted"
//! - `plugin`: name of the plugin that short-circuited a request

/// Total network requests performed by the fetch executor.
///
/// Labels: `method`, `status` ("ok" | "error" | "aborted").
pub const REQUESTS_TOTAL: &str = "huginn_requests_total";

/// Network request duration in seconds, retries included.
///
/// Labels: `method`.
pub const REQUEST_DURATION_SECONDS: &str = "huginn_request_duration_seconds";

/// Total retry attempts (not counting the initial request).
///
/// Labels: `method`.
pub const RETRIES_TOTAL: &str = "huginn_retries_total";

/// Total `execute()` calls served by an already in-flight request.
///
/// Labels: `operation`.
pub const DEDUP_HITS_TOTAL: &str = "huginn_dedup_hits_total";

/// Total invalidation events emitted.
pub const INVALIDATIONS_TOTAL: &str = "huginn_invalidations_total";

/// Total requests answered by a plugin without reaching the network.
///
/// Labels: `plugin`.
pub const SHORT_CIRCUITS_TOTAL: &str = "huginn_short_circuits_total";
