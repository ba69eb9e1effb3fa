//! Rate limiter types.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::PortcullisError;

/// Outcome of a rate limit check. The only rate limit object callers see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    /// Whether the request may proceed.
    pub allowed: bool,
    /// Requests (or whole tokens) left after this one.
    pub remaining: u32,
    /// Configured maximum for the window (or bucket capacity).
    pub limit: u32,
    /// When the quota is fully available again.
    pub reset_at: SystemTime,
    /// How long to wait before retrying. Zero when allowed.
    pub retry_after: Duration,
    /// Decided by the failure policy because the cache failed.
    pub degraded: bool,
}

impl RateDecision {
    pub(crate) fn allowed(limit: u32, remaining: u32, reset_at: SystemTime) -> Self {
        Self {
            allowed: true,
            remaining,
            limit,
            reset_at,
            retry_after: Duration::ZERO,
            degraded: false,
        }
    }

    pub(crate) fn rejected(limit: u32, reset_at: SystemTime, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            remaining: 0,
            limit,
            reset_at,
            retry_after,
            degraded: false,
        }
    }

    pub(crate) fn degraded(mut self) -> Self {
        self.degraded = true;
        self
    }

    /// `retry_after` in whole seconds, rounded up.
    pub fn retry_after_secs(&self) -> u64 {
        let secs = self.retry_after.as_secs();
        if self.retry_after.subsec_nanos() > 0 {
            secs + 1
        } else {
            secs
        }
    }

    /// `reset_at` as seconds since the Unix epoch, rounded up.
    pub fn reset_at_unix_secs(&self) -> u64 {
        let since = self.reset_at.duration_since(UNIX_EPOCH).unwrap_or_default();
        since.as_secs() + u64::from(since.subsec_nanos() > 0)
    }

    /// Conventional rate limit response headers for this decision.
    ///
    /// `Retry-After` is only present on rejections.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("X-RateLimit-Limit", self.limit.to_string()),
            ("X-RateLimit-Remaining", self.remaining.to_string()),
            ("X-RateLimit-Reset", self.reset_at_unix_secs().to_string()),
        ];
        if !self.allowed {
            headers.push(("Retry-After", self.retry_after_secs().max(1).to_string()));
        }
        headers
    }
}

/// A per-resource quota: `max_requests` per rolling `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    pub max_requests: u32,
    pub window_secs: u64,
}

impl Quota {
    pub const fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Reject windows of zero or longer than [`MAX_WINDOW_SECS`].
    pub fn validate(&self, name: &str) -> Result<(), PortcullisError> {
        if self.window_secs == 0 || self.window_secs > MAX_WINDOW_SECS {
            return Err(PortcullisError::Configuration(format!(
                "quota '{name}': window_secs must be between 1 and {MAX_WINDOW_SECS}, got {}",
                self.window_secs
            )));
        }
        Ok(())
    }
}

/// Longest accepted quota window (and window grace): one year.
pub const MAX_WINDOW_SECS: u64 = 366 * 24 * 60 * 60;

/// What a check decides when the cache cannot answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Admit the request; availability over strict enforcement.
    #[default]
    Open,
    /// Reject the request; enforcement over availability.
    Closed,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailurePolicy::Open => "open",
            FailurePolicy::Closed => "closed",
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailurePolicy {
    type Err = PortcullisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(FailurePolicy::Open),
            "closed" => Ok(FailurePolicy::Closed),
            other => Err(PortcullisError::Configuration(format!(
                "unknown failure policy '{other}' (expected 'open' or 'closed')"
            ))),
        }
    }
}

/// Persisted token bucket state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenBucketState {
    /// Tokens currently in the bucket, `0..=capacity`.
    pub tokens: f64,
    /// Last refill instant, milliseconds since the Unix epoch.
    pub last_refill_ms: u64,
}

/// Current time in milliseconds since the Unix epoch.
pub fn current_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

pub(crate) fn system_time_from_millis(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}
