//! Caching subsystem.
//!
//! [`CacheStore`] is the only holder of cross-request state in the gateway
//! (rate limit windows, token buckets, memoized moderation results). It sits
//! on a [`CacheBackend`]:
//!
//! - [`RedisBackend`] — networked cache shared by every gateway instance.
//! - [`MemoryBackend`] — in-process fallback used when the networked cache
//!   is not configured or unreachable at startup. The store then reports
//!   itself as degraded instead of failing the process.
//!
//! # Soft failures
//!
//! No store operation returns an error or panics on infrastructure trouble.
//! Each returns a [`CacheOutcome`]: either [`CacheOutcome::Done`] with the
//! real value, or [`CacheOutcome::Degraded`] carrying a fallback value
//! (`None`/`false`/`0`) and the reason. Every degraded outcome is logged and
//! counted, so outages are diagnosable without surfacing to end users.

pub mod backend;
pub mod keys;
pub mod memory;
pub mod remote;

pub use backend::{BackendKind, CacheBackend, WindowOutcome, WindowRequest};
pub use memory::MemoryBackend;
pub use remote::RedisBackend;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::telemetry;
use crate::{PortcullisError, Result};

/// Configuration for the cache store.
///
/// ```rust
/// # use portcullis::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .url("redis://127.0.0.1:6379")
///     .connect_timeout(Duration::from_millis(300));
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Networked cache URL. `None` runs the store in fallback mode.
    #[serde(default)]
    pub url: Option<String>,
    /// Fall back to an in-process cache when the URL is missing or
    /// unreachable. Default: true.
    #[serde(default = "default_fallback")]
    pub fallback_to_memory: bool,
    /// Connect (and initial PING) timeout in milliseconds. Default: 500.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Per-command timeout in milliseconds. Default: 250.
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// Capacity of the in-process cache. Default: 100,000.
    #[serde(default = "default_max_memory_entries")]
    pub max_memory_entries: u64,
}

fn default_fallback() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    500
}

fn default_operation_timeout_ms() -> u64 {
    250
}

fn default_max_memory_entries() -> u64 {
    memory::DEFAULT_MAX_ENTRIES
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: None,
            fallback_to_memory: default_fallback(),
            connect_timeout_ms: default_connect_timeout_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
            max_memory_entries: default_max_memory_entries(),
        }
    }
}

impl CacheConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the networked cache URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Enable or disable the in-process fallback.
    pub fn fallback_to_memory(mut self, enabled: bool) -> Self {
        self.fallback_to_memory = enabled;
        self
    }

    /// Set the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the per-command timeout.
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the in-process cache capacity.
    pub fn max_memory_entries(mut self, n: u64) -> Self {
        self.max_memory_entries = n;
        self
    }
}

/// Result of a [`CacheStore`] operation.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheOutcome<T> {
    /// The backend answered.
    Done(T),
    /// The backend failed; `fallback` stands in for the answer.
    Degraded { fallback: T, reason: String },
}

impl<T> CacheOutcome<T> {
    /// The answer, or the fallback when degraded.
    pub fn value(&self) -> &T {
        match self {
            CacheOutcome::Done(value) => value,
            CacheOutcome::Degraded { fallback, .. } => fallback,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            CacheOutcome::Done(value) => value,
            CacheOutcome::Degraded { fallback, .. } => fallback,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, CacheOutcome::Degraded { .. })
    }

    /// Why the operation degraded, if it did.
    pub fn reason(&self) -> Option<&str> {
        match self {
            CacheOutcome::Done(_) => None,
            CacheOutcome::Degraded { reason, .. } => Some(reason),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheOutcome<U> {
        match self {
            CacheOutcome::Done(value) => CacheOutcome::Done(f(value)),
            CacheOutcome::Degraded { fallback, reason } => CacheOutcome::Degraded {
                fallback: f(fallback),
                reason,
            },
        }
    }
}

/// Coarse health of the cache store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Backend reachable and shared as configured.
    Healthy,
    /// Running on the in-process fallback.
    Degraded,
    /// Backend configured but not answering.
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health report returned by [`CacheStore::health()`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheHealth {
    pub status: HealthStatus,
    pub backend: BackendKind,
    pub detail: String,
}

/// Key/value store with TTL, atomic increment and pattern deletion.
///
/// Construct once at startup and share by `Arc`. Structured values are
/// stored as JSON, so anything `Serialize` reads back as an equivalent value.
pub struct CacheStore {
    backend: Arc<dyn CacheBackend>,
    /// Set when running on the in-process fallback instead of the
    /// configured networked cache.
    fallback_reason: Option<String>,
}

impl CacheStore {
    /// Connect to the configured networked cache.
    ///
    /// When the URL is missing or unreachable and
    /// [`fallback_to_memory`](CacheConfig::fallback_to_memory) is set, the
    /// store comes up on an in-process cache and reports itself degraded.
    ///
    /// # Errors
    /// Returns [`PortcullisError::CacheUnavailable`] only when the networked
    /// cache cannot be used and the fallback is disabled.
    pub async fn connect(config: &CacheConfig) -> Result<Self> {
        let Some(url) = config.url.as_deref() else {
            return Self::fallback(config, "no cache URL configured".to_string());
        };

        match RedisBackend::connect(
            url,
            Duration::from_millis(config.connect_timeout_ms),
            Duration::from_millis(config.operation_timeout_ms),
        )
        .await
        {
            Ok(backend) => {
                info!(backend = "redis", "cache store connected");
                Ok(Self::with_backend(Arc::new(backend)))
            }
            Err(e) => Self::fallback(config, e.to_string()),
        }
    }

    fn fallback(config: &CacheConfig, reason: String) -> Result<Self> {
        if !config.fallback_to_memory {
            return Err(PortcullisError::CacheUnavailable(reason));
        }
        warn!(
            reason = %reason,
            "networked cache unavailable; running on in-process fallback"
        );
        Ok(Self {
            backend: Arc::new(MemoryBackend::new(config.max_memory_entries)),
            fallback_reason: Some(reason),
        })
    }

    /// Create a store on an in-process cache by choice (single-instance
    /// deployments and tests). Not reported as degraded.
    pub fn in_memory() -> Self {
        Self::with_backend(Arc::new(MemoryBackend::default()))
    }

    /// Create a store over any backend implementation.
    pub fn with_backend(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            fallback_reason: None,
        }
    }

    /// Whether the store fell back to the in-process cache at startup.
    pub fn is_degraded(&self) -> bool {
        self.fallback_reason.is_some()
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Read and deserialize the value under `key`.
    ///
    /// A value that does not deserialize as `T` counts as a soft failure.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> CacheOutcome<Option<T>> {
        let result = match self.backend.get(key).await {
            Ok(Some(raw)) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(PortcullisError::from),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        self.settle("get", key, result, None)
    }

    /// Like [`get`](Self::get), but a value that does not deserialize as
    /// `T` reads as absent. For state the caller rebuilds from scratch.
    pub async fn get_or_discard<T: DeserializeOwned>(
        &self,
        key: &str,
    ) -> CacheOutcome<Option<T>> {
        let result = self.backend.get(key).await.map(|raw| {
            raw.and_then(|raw| match serde_json::from_str(&raw) {
                Ok(value) => Some(value),
                Err(e) => {
                    debug!(key, error = %e, "discarding undecodable cache value");
                    None
                }
            })
        });
        self.settle("get", key, result, None)
    }

    /// Serialize and store `value`, replacing any previous value and TTL.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> CacheOutcome<bool> {
        let result = match serde_json::to_string(value) {
            Ok(raw) => self.backend.set(key, raw, ttl).await,
            Err(e) => Err(e.into()),
        };
        self.settle("set", key, result.map(|()| true), false)
    }

    /// Remove `key`. `Done(true)` if it existed.
    pub async fn delete(&self, key: &str) -> CacheOutcome<bool> {
        let result = self.backend.delete(key).await;
        self.settle("delete", key, result, false)
    }

    pub async fn exists(&self, key: &str) -> CacheOutcome<bool> {
        let result = self.backend.exists(key).await;
        self.settle("exists", key, result, false)
    }

    /// Atomically add `amount` to the integer under `key`.
    pub async fn increment(&self, key: &str, amount: i64) -> CacheOutcome<i64> {
        let result = self.backend.increment(key, amount).await;
        self.settle("increment", key, result, 0)
    }

    /// Delete every key matching a Redis-style glob (`*`, `?`, `[...]`).
    pub async fn clear_pattern(&self, pattern: &str) -> CacheOutcome<u64> {
        let result = self.backend.clear_pattern(pattern).await;
        self.settle("clear_pattern", pattern, result, 0)
    }

    /// Run one atomic sliding-window admission against `key`.
    ///
    /// `Done` always carries `Some`; the fallback is `None`.
    pub async fn admit_window(
        &self,
        key: &str,
        request: &WindowRequest,
    ) -> CacheOutcome<Option<WindowOutcome>> {
        let result = self.backend.admit_window(key, request).await.map(Some);
        self.settle("admit_window", key, result, None)
    }

    /// Report backend health.
    pub async fn health(&self) -> CacheHealth {
        let backend = self.backend.kind();
        if let Some(reason) = &self.fallback_reason {
            return CacheHealth {
                status: HealthStatus::Degraded,
                backend,
                detail: format!("in-process fallback: {reason}"),
            };
        }

        match self.backend.ping().await {
            Ok(()) => CacheHealth {
                status: HealthStatus::Healthy,
                backend,
                detail: "ok".to_string(),
            },
            Err(e) => CacheHealth {
                status: HealthStatus::Unhealthy,
                backend,
                detail: e.to_string(),
            },
        }
    }

    fn settle<T>(
        &self,
        operation: &'static str,
        key: &str,
        result: Result<T>,
        fallback: T,
    ) -> CacheOutcome<T> {
        match result {
            Ok(value) => {
                metrics::counter!(
                    telemetry::CACHE_OPERATIONS_TOTAL,
                    "operation" => operation,
                    "status" => "ok"
                )
                .increment(1);
                CacheOutcome::Done(value)
            }
            Err(e) => {
                metrics::counter!(
                    telemetry::CACHE_OPERATIONS_TOTAL,
                    "operation" => operation,
                    "status" => "error"
                )
                .increment(1);
                metrics::counter!(telemetry::CACHE_SOFT_FAILURES_TOTAL, "operation" => operation)
                    .increment(1);
                warn!(
                    operation,
                    key,
                    backend = %self.backend.kind(),
                    error = %e,
                    "cache operation failed; returning fallback"
                );
                CacheOutcome::Degraded {
                    fallback,
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_config_defaults() {
        let config = CacheConfig::default();
        assert!(config.url.is_none());
        assert!(config.fallback_to_memory);
        assert_eq!(config.connect_timeout_ms, 500);
        assert_eq!(config.operation_timeout_ms, 250);
        assert_eq!(config.max_memory_entries, 100_000);
    }

    #[test]
    fn cache_config_builder() {
        let config = CacheConfig::new()
            .url("redis://cache:6379")
            .fallback_to_memory(false)
            .connect_timeout(Duration::from_secs(1))
            .operation_timeout(Duration::from_millis(100));
        assert_eq!(config.url.as_deref(), Some("redis://cache:6379"));
        assert!(!config.fallback_to_memory);
        assert_eq!(config.connect_timeout_ms, 1_000);
        assert_eq!(config.operation_timeout_ms, 100);
    }

    #[test]
    fn outcome_accessors() {
        let done: CacheOutcome<u64> = CacheOutcome::Done(3);
        assert_eq!(*done.value(), 3);
        assert!(!done.is_degraded());
        assert_eq!(done.reason(), None);

        let degraded: CacheOutcome<u64> = CacheOutcome::Degraded {
            fallback: 0,
            reason: "down".into(),
        };
        assert!(degraded.is_degraded());
        assert_eq!(degraded.reason(), Some("down"));
        assert_eq!(degraded.map(|n| n + 1).into_value(), 1);
    }
}
