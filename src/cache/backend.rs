//! Storage backend seam for [`CacheStore`](super::CacheStore).
//!
//! Backends speak raw JSON text and return [`Result`]; the store on top
//! serializes values and turns failures into
//! [`CacheOutcome::Degraded`](super::CacheOutcome::Degraded).

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::Result;

/// Which kind of storage sits behind a [`CacheStore`](super::CacheStore).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Networked Redis-compatible cache, shared across instances.
    Redis,
    /// In-process map, local to this instance and lost on restart.
    Memory,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Redis => "redis",
            BackendKind::Memory => "memory",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One sliding-window admission attempt, in milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRequest {
    /// Instant of the check.
    pub now_ms: u64,
    /// Window length.
    pub window_ms: u64,
    /// Maximum timestamps allowed inside the window.
    pub max_requests: u32,
    /// Expiry for the stored sequence (window plus grace).
    pub ttl: Duration,
}

/// What a backend observed while applying a [`WindowRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOutcome {
    /// Whether `now_ms` was appended.
    pub admitted: bool,
    /// Timestamps inside the window after the attempt.
    pub count: u32,
    /// Oldest timestamp still inside the window, if any.
    pub oldest_ms: Option<u64>,
}

impl WindowRequest {
    /// Lower bound of the window; timestamps at or below it are stale.
    pub fn window_start(&self) -> u64 {
        self.now_ms.saturating_sub(self.window_ms)
    }

    /// Keep only timestamps `t` with `window_start < t <= now`, oldest first.
    pub fn prune(&self, mut timestamps: Vec<u64>) -> Vec<u64> {
        let start = self.window_start();
        timestamps.retain(|&t| t > start && t <= self.now_ms);
        timestamps.sort_unstable();
        timestamps
    }

    /// Apply the window algorithm to a stored sequence.
    ///
    /// Returns the sequence to persist (`None` when the attempt is rejected
    /// and nothing should be written) together with the outcome.
    pub fn apply(&self, stored: Vec<u64>) -> (Option<Vec<u64>>, WindowOutcome) {
        let mut kept = self.prune(stored);
        if kept.len() >= self.max_requests as usize {
            let outcome = WindowOutcome {
                admitted: false,
                count: kept.len() as u32,
                oldest_ms: kept.first().copied(),
            };
            return (None, outcome);
        }

        kept.push(self.now_ms);
        let outcome = WindowOutcome {
            admitted: true,
            count: kept.len() as u32,
            oldest_ms: kept.first().copied(),
        };
        (Some(kept), outcome)
    }
}

/// Storage primitives the gateway needs from a cache.
///
/// Implementations must be safe to share across tasks. `increment` and
/// `admit_window` must be atomic per key; everything else may be a plain
/// single command.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Backend kind, for health reporting and logs.
    fn kind(&self) -> BackendKind;

    /// Fetch the raw JSON text stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store raw JSON text, replacing any previous value and its TTL.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;

    /// Remove `key`. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Atomically add `amount` to the integer under `key` (missing keys
    /// start at zero) and return the new value. An existing TTL is kept.
    async fn increment(&self, key: &str, amount: i64) -> Result<i64>;

    /// Delete every key matching a Redis-style glob. Returns the count removed.
    async fn clear_pattern(&self, pattern: &str) -> Result<u64>;

    /// Atomically prune, count and (if under the limit) append to the
    /// timestamp sequence stored under `key`.
    async fn admit_window(&self, key: &str, request: &WindowRequest) -> Result<WindowOutcome>;

    /// Round-trip check used by health reporting.
    async fn ping(&self) -> Result<()>;
}
