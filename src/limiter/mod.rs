//! Per-identifier rate limiting on top of [`CacheStore`].
//!
//! Two strategies share the same decision type:
//!
//! - [`RateLimiter::check`] — sliding window, exact "N per rolling period".
//!   The prune/count/append sequence runs atomically inside the backend, so
//!   concurrent checks for the same key never over-admit.
//! - [`RateLimiter::check_bucket`] — token bucket, burst tolerant. Its
//!   read-modify-write is not atomic: concurrent checks on one key may
//!   over-admit by up to the number of racers.
//!
//! When the cache fails mid-check the configured [`FailurePolicy`] decides,
//! and the returned [`RateDecision`] is marked `degraded`.

mod bucket;
mod types;
mod window;

pub use types::{
    FailurePolicy, MAX_WINDOW_SECS, Quota, RateDecision, TokenBucketState, current_time_millis,
    duration_millis,
};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::cache::{CacheOutcome, CacheStore, WindowOutcome, WindowRequest, keys};
use crate::telemetry;
use crate::{PortcullisError, Result};
use bucket::Bucket;
use types::system_time_from_millis;

/// Quotas every gateway knows about, used when the configuration does not
/// name the resource.
pub const BUILTIN_QUOTAS: &[(&str, Quota)] = &[
    ("generation", Quota::new(10, 3600)),
    ("api_call", Quota::new(100, 3600)),
    ("improvement", Quota::new(20, 3600)),
];

/// Rate limiter configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimiterConfig {
    /// Decision taken when the cache fails. Default: open.
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Extra lifetime of stored state past its window, so idle entries
    /// self-expire. Default: 60.
    #[serde(default = "default_window_grace_secs")]
    pub window_grace_secs: u64,
    /// Quota for resources with no configured or built-in entry.
    #[serde(default = "default_quota")]
    pub default_quota: Quota,
    /// Per-resource quotas, consulted before [`BUILTIN_QUOTAS`].
    #[serde(default)]
    pub quotas: HashMap<String, Quota>,
}

fn default_window_grace_secs() -> u64 {
    60
}

fn default_quota() -> Quota {
    Quota::new(60, 60)
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::default(),
            window_grace_secs: default_window_grace_secs(),
            default_quota: default_quota(),
            quotas: HashMap::new(),
        }
    }
}

impl LimiterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn window_grace(mut self, grace: Duration) -> Self {
        self.window_grace_secs = grace.as_secs();
        self
    }

    pub fn default_quota(mut self, quota: Quota) -> Self {
        self.default_quota = quota;
        self
    }

    /// Set the quota for one resource.
    pub fn quota(mut self, resource: impl Into<String>, quota: Quota) -> Self {
        self.quotas.insert(resource.into(), quota);
        self
    }

    /// Check every quota window and the grace period against
    /// [`MAX_WINDOW_SECS`].
    pub fn validate(&self) -> Result<()> {
        if self.window_grace_secs > MAX_WINDOW_SECS {
            return Err(PortcullisError::Configuration(format!(
                "window_grace_secs must be at most {MAX_WINDOW_SECS}, got {}",
                self.window_grace_secs
            )));
        }
        self.default_quota.validate("default")?;
        for (resource, quota) in &self.quotas {
            quota.validate(resource)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Algorithm {
    SlidingWindow,
    TokenBucket,
}

impl Algorithm {
    fn as_str(self) -> &'static str {
        match self {
            Algorithm::SlidingWindow => "sliding_window",
            Algorithm::TokenBucket => "token_bucket",
        }
    }
}

/// Rate limiter over a shared [`CacheStore`].
///
/// Every check returns a [`RateDecision`]; none of them fail or panic.
pub struct RateLimiter {
    cache: Arc<CacheStore>,
    config: LimiterConfig,
}

impl RateLimiter {
    pub fn new(cache: Arc<CacheStore>, config: LimiterConfig) -> Self {
        Self { cache, config }
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.config.failure_policy
    }

    fn grace(&self) -> Duration {
        Duration::from_secs(self.config.window_grace_secs)
    }

    /// Quota for `resource`: configured, then built-in, then the default.
    pub fn quota_for(&self, resource: &str) -> Quota {
        self.config
            .quotas
            .get(resource)
            .copied()
            .or_else(|| {
                BUILTIN_QUOTAS
                    .iter()
                    .find(|(name, _)| *name == resource)
                    .map(|(_, quota)| *quota)
            })
            .unwrap_or(self.config.default_quota)
    }

    /// Sliding-window check: admit at most `max_requests` per rolling
    /// `window` for this `(identifier, resource)`.
    pub async fn check(
        &self,
        identifier: &str,
        resource: &str,
        max_requests: u32,
        window: Duration,
    ) -> RateDecision {
        let request = WindowRequest {
            now_ms: current_time_millis(),
            window_ms: duration_millis(window).max(1),
            max_requests,
            ttl: window.saturating_add(self.grace()),
        };

        let decision = if max_requests == 0 {
            window::decide(
                &WindowOutcome {
                    admitted: false,
                    count: 0,
                    oldest_ms: None,
                },
                &request,
            )
        } else {
            let key = keys::window_key(resource, identifier);
            match self.cache.admit_window(&key, &request).await {
                CacheOutcome::Done(Some(observed)) => window::decide(&observed, &request),
                other => self.on_cache_failure(
                    Algorithm::SlidingWindow,
                    identifier,
                    resource,
                    max_requests,
                    window,
                    other.reason().unwrap_or("backend returned no window state"),
                ),
            }
        };

        self.record(Algorithm::SlidingWindow, identifier, resource, &decision);
        decision
    }

    /// Sliding-window check against the quota configured for `resource`.
    pub async fn check_quota(&self, identifier: &str, resource: &str) -> RateDecision {
        let quota = self.quota_for(resource);
        self.check(identifier, resource, quota.max_requests, quota.window())
            .await
    }

    /// Token-bucket check: a bucket of `capacity` tokens refilled at
    /// `refill_rate` tokens per second; each admitted request takes one.
    pub async fn check_bucket(
        &self,
        identifier: &str,
        resource: &str,
        capacity: u32,
        refill_rate: f64,
    ) -> RateDecision {
        let bucket = Bucket::new(capacity, refill_rate);
        let key = keys::bucket_key(resource, identifier);
        let now_ms = current_time_millis();

        // Undecodable state is rebuilt as a full bucket.
        let stored = match self.cache.get_or_discard::<TokenBucketState>(&key).await {
            CacheOutcome::Done(stored) => stored,
            CacheOutcome::Degraded { reason, .. } => {
                let decision = self.on_cache_failure(
                    Algorithm::TokenBucket,
                    identifier,
                    resource,
                    capacity,
                    bucket.token_interval(),
                    &reason,
                );
                self.record(Algorithm::TokenBucket, identifier, resource, &decision);
                return decision;
            }
        };

        let (next, mut decision) = bucket.take(bucket.refill(stored, now_ms), now_ms);
        if let Some(next) = next {
            let ttl = bucket.state_ttl(self.grace());
            if let CacheOutcome::Degraded { reason, .. } =
                self.cache.set(&key, &next, Some(ttl)).await
            {
                decision = self.on_cache_failure(
                    Algorithm::TokenBucket,
                    identifier,
                    resource,
                    capacity,
                    bucket.token_interval(),
                    &reason,
                );
            }
        }

        self.record(Algorithm::TokenBucket, identifier, resource, &decision);
        decision
    }

    /// Current sliding-window state for `resource`'s configured quota,
    /// without consuming anything.
    pub async fn peek(&self, identifier: &str, resource: &str) -> RateDecision {
        let quota = self.quota_for(resource);
        let window = quota.window();
        let request = WindowRequest {
            now_ms: current_time_millis(),
            window_ms: duration_millis(window).max(1),
            max_requests: quota.max_requests,
            ttl: window.saturating_add(self.grace()),
        };

        let key = keys::window_key(resource, identifier);
        match self.cache.get_or_discard::<Vec<u64>>(&key).await {
            CacheOutcome::Done(stored) => window::inspect(stored.unwrap_or_default(), &request),
            CacheOutcome::Degraded { reason, .. } => {
                warn!(
                    resource,
                    identifier,
                    reason = %reason,
                    "rate limit state unreadable; reporting full quota"
                );
                RateDecision::allowed(
                    quota.max_requests,
                    quota.max_requests,
                    system_time_from_millis(request.now_ms),
                )
                .degraded()
            }
        }
    }

    /// Clear all stored state (window and bucket) for one
    /// `(identifier, resource)`. `Done(true)` if anything was removed.
    pub async fn reset(&self, identifier: &str, resource: &str) -> CacheOutcome<bool> {
        let window = self
            .cache
            .delete(&keys::window_key(resource, identifier))
            .await;
        let bucket = self
            .cache
            .delete(&keys::bucket_key(resource, identifier))
            .await;

        match (window, bucket) {
            (CacheOutcome::Done(a), CacheOutcome::Done(b)) => {
                info!(resource, identifier, removed = a || b, "rate limit state reset");
                CacheOutcome::Done(a || b)
            }
            (window, bucket) => CacheOutcome::Degraded {
                fallback: false,
                reason: window
                    .reason()
                    .or(bucket.reason())
                    .unwrap_or_default()
                    .to_string(),
            },
        }
    }

    /// Clear stored state for every identifier of one resource.
    pub async fn reset_resource(&self, resource: &str) -> CacheOutcome<u64> {
        let outcome = self
            .cache
            .clear_pattern(&keys::resource_pattern(resource))
            .await;
        if let CacheOutcome::Done(removed) = outcome {
            info!(resource, removed, "rate limit state reset for resource");
        }
        outcome
    }

    fn on_cache_failure(
        &self,
        algorithm: Algorithm,
        identifier: &str,
        resource: &str,
        limit: u32,
        horizon: Duration,
        reason: &str,
    ) -> RateDecision {
        let policy = self.config.failure_policy;
        warn!(
            algorithm = algorithm.as_str(),
            resource,
            identifier,
            policy = policy.as_str(),
            reason,
            "cache failed during rate check; applying failure policy"
        );
        metrics::counter!(telemetry::RATE_LIMIT_FALLBACKS_TOTAL, "policy" => policy.as_str())
            .increment(1);

        let now = system_time_from_millis(current_time_millis());
        let reset_at = now.checked_add(horizon).unwrap_or(now);
        match policy {
            FailurePolicy::Open => {
                RateDecision::allowed(limit, limit.saturating_sub(1), reset_at).degraded()
            }
            FailurePolicy::Closed => RateDecision::rejected(limit, reset_at, horizon).degraded(),
        }
    }

    fn record(
        &self,
        algorithm: Algorithm,
        identifier: &str,
        resource: &str,
        decision: &RateDecision,
    ) {
        let outcome = if decision.degraded {
            "degraded"
        } else if decision.allowed {
            "allowed"
        } else {
            "rejected"
        };
        metrics::counter!(
            telemetry::RATE_LIMIT_DECISIONS_TOTAL,
            "algorithm" => algorithm.as_str(),
            "resource" => resource.to_string(),
            "outcome" => outcome
        )
        .increment(1);

        if !decision.allowed {
            debug!(
                algorithm = algorithm.as_str(),
                resource,
                identifier,
                limit = decision.limit,
                retry_after_ms = duration_millis(decision.retry_after),
                "rate limit exceeded"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_lookup_prefers_configured_then_builtin() {
        let cache = Arc::new(CacheStore::in_memory());
        let config = LimiterConfig::new()
            .quota("generation", Quota::new(3, 60))
            .default_quota(Quota::new(7, 10));
        let limiter = RateLimiter::new(cache, config);

        assert_eq!(limiter.quota_for("generation"), Quota::new(3, 60));
        assert_eq!(limiter.quota_for("api_call"), Quota::new(100, 3600));
        assert_eq!(limiter.quota_for("improvement"), Quota::new(20, 3600));
        assert_eq!(limiter.quota_for("unknown"), Quota::new(7, 10));
    }

    #[test]
    fn limiter_config_parses_from_toml() {
        let config: LimiterConfig = toml::from_str(
            r#"
            failure_policy = "closed"
            window_grace_secs = 5

            [quotas.generation]
            max_requests = 2
            window_secs = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.failure_policy, FailurePolicy::Closed);
        assert_eq!(config.window_grace_secs, 5);
        assert_eq!(config.default_quota, Quota::new(60, 60));
        assert_eq!(config.quotas["generation"], Quota::new(2, 30));
    }
}
