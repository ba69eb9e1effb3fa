//! Telemetry metric name constants.
//!
//! Centralised metric names for portcullis operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `portcullis_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `operation` — cache operation (e.g. "get", "increment", "admit_window")
//! - `status` — outcome: "ok" or "error"
//! - `algorithm` — rate limit algorithm: "sliding_window" or "token_bucket"
//! - `outcome` — decision outcome: "allowed", "rejected", "degraded"

/// Total cache operations issued through [`CacheStore`](crate::CacheStore).
///
/// Labels: `operation`, `status` ("ok" | "error").
pub const CACHE_OPERATIONS_TOTAL: &str = "portcullis_cache_operations_total";

/// Cache operations that failed and returned a fallback value.
///
/// Labels: `operation`.
pub const CACHE_SOFT_FAILURES_TOTAL: &str = "portcullis_cache_soft_failures_total";

/// Rate limit decisions.
///
/// Labels: `algorithm`, `resource`, `outcome` ("allowed" | "rejected" | "degraded").
pub const RATE_LIMIT_DECISIONS_TOTAL: &str = "portcullis_rate_limit_decisions_total";

/// Rate limit checks decided by the failure policy because the cache failed.
///
/// Labels: `policy` ("open" | "closed").
pub const RATE_LIMIT_FALLBACKS_TOTAL: &str = "portcullis_rate_limit_fallbacks_total";

/// Inputs rejected by a field sanitizer.
///
/// Labels: `field`, `reason` ("empty" | "length" | "injection" | "format").
pub const SANITIZER_REJECTIONS_TOTAL: &str = "portcullis_sanitizer_rejections_total";

/// Moderation results by risk level.
///
/// Labels: `risk_level`.
pub const MODERATION_RESULTS_TOTAL: &str = "portcullis_moderation_results_total";

/// Moderation results served from the memo cache.
pub const MODERATION_MEMO_HITS_TOTAL: &str = "portcullis_moderation_memo_hits_total";

/// Moderation results computed because the memo cache had no entry.
pub const MODERATION_MEMO_MISSES_TOTAL: &str = "portcullis_moderation_memo_misses_total";

/// Admission pipeline outcomes.
///
/// Labels: `outcome` ("admitted" | "invalid" | "unsafe" | "rate_limited" |
/// "shut_down").
pub const ADMISSIONS_TOTAL: &str = "portcullis_admissions_total";

/// Admission pipeline duration in seconds.
pub const ADMISSION_DURATION_SECONDS: &str = "portcullis_admission_duration_seconds";
