//! Builder for configuring gateway instances

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::AdmissionGateway;
use crate::cache::{CacheConfig, CacheStore};
use crate::config::{GatewayConfig, ModerationConfig};
use crate::limiter::{FailurePolicy, LimiterConfig, Quota, RateLimiter};
use crate::moderation::RiskLevel;
use crate::{PortcullisError, Result};

/// Main entry point for creating gateway instances.
pub struct Portcullis;

impl Portcullis {
    /// Create a new builder for configuring the gateway.
    pub fn builder() -> PortcullisBuilder {
        PortcullisBuilder::new()
    }
}

/// Builder for configuring gateway instances.
pub struct PortcullisBuilder {
    cache_config: CacheConfig,
    cache_store: Option<Arc<CacheStore>>,
    limits: LimiterConfig,
    moderation: ModerationConfig,
}

impl PortcullisBuilder {
    pub fn new() -> Self {
        Self {
            cache_config: CacheConfig::default(),
            cache_store: None,
            limits: LimiterConfig::default(),
            moderation: ModerationConfig::default(),
        }
    }

    /// Start from a loaded configuration file.
    pub fn from_config(config: GatewayConfig) -> Self {
        Self {
            cache_config: config.cache,
            cache_store: None,
            limits: config.limits,
            moderation: config.moderation,
        }
    }

    /// Configure the cache connection.
    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    /// Set the networked cache URL, keeping other cache settings.
    pub fn cache_url(mut self, url: impl Into<String>) -> Self {
        self.cache_config.url = Some(url.into());
        self
    }

    /// Use an already constructed store instead of connecting.
    ///
    /// Lets several components share one store, and lets tests inject a
    /// custom [`CacheBackend`](crate::cache::CacheBackend).
    pub fn cache_store(mut self, store: Arc<CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    /// Set what rate checks decide when the cache fails (default: open).
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.limits.failure_policy = policy;
        self
    }

    /// Set the quota for one resource.
    pub fn quota(mut self, resource: impl Into<String>, quota: Quota) -> Self {
        self.limits.quotas.insert(resource.into(), quota);
        self
    }

    /// Set the quota for resources without their own entry.
    pub fn default_quota(mut self, quota: Quota) -> Self {
        self.limits.default_quota = quota;
        self
    }

    /// Set how long idle rate limit state outlives its window.
    pub fn window_grace(mut self, grace: Duration) -> Self {
        self.limits.window_grace_secs = grace.as_secs();
        self
    }

    /// Set the lowest risk level that rejects admission (default: medium).
    pub fn block_at(mut self, level: RiskLevel) -> Self {
        self.moderation.block_at = level;
        self
    }

    /// Memoize moderation results for `ttl`, or disable with `None`.
    pub fn moderation_memo(mut self, ttl: Option<Duration>) -> Self {
        self.moderation.memo_ttl_secs = ttl.map_or(0, |ttl| ttl.as_secs());
        self
    }

    /// Build the gateway, connecting the cache unless a store was given.
    ///
    /// # Errors
    /// - [`PortcullisError::Configuration`] if `block_at` is `safe`, which
    ///   would reject every request, or a quota window is zero or longer
    ///   than [`MAX_WINDOW_SECS`](crate::limiter::MAX_WINDOW_SECS).
    /// - [`PortcullisError::CacheUnavailable`] if the cache cannot be
    ///   reached and the in-process fallback is disabled.
    pub async fn build(self) -> Result<AdmissionGateway> {
        if self.moderation.block_at == RiskLevel::Safe {
            return Err(PortcullisError::Configuration(
                "moderation.block_at = \"safe\" would reject all content".to_string(),
            ));
        }
        self.limits.validate()?;

        let cache = match self.cache_store {
            Some(store) => store,
            None => Arc::new(CacheStore::connect(&self.cache_config).await?),
        };

        info!(
            backend = %cache.backend_kind(),
            degraded = cache.is_degraded(),
            failure_policy = %self.limits.failure_policy,
            block_at = %self.moderation.block_at,
            "admission gateway ready"
        );

        let limiter = RateLimiter::new(cache.clone(), self.limits);
        Ok(AdmissionGateway::new(cache, limiter, self.moderation))
    }
}

impl Default for PortcullisBuilder {
    fn default() -> Self {
        Self::new()
    }
}
