//! Admission pipeline: sanitize, moderate, then rate limit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{CacheHealth, CacheOutcome, CacheStore, keys};
use crate::config::ModerationConfig;
use crate::limiter::{RateDecision, RateLimiter};
use crate::moderation::{ContentModerator, ModerationResult};
use crate::sanitize::{self, FieldClass, SanitizeError};
use crate::telemetry;

/// A request asking to use `resource` on behalf of `identifier`.
///
/// ```rust
/// # use portcullis::AdmissionRequest;
/// let request = AdmissionRequest::new("user-42", "generation")
///     .topic("SAP S/4HANA migration best practices");
/// ```
#[derive(Debug, Clone)]
pub struct AdmissionRequest {
    identifier: String,
    resource: String,
    fields: Vec<(FieldClass, String)>,
}

impl AdmissionRequest {
    pub fn new(identifier: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            resource: resource.into(),
            fields: Vec::new(),
        }
    }

    /// Add a free-text field of any class.
    pub fn field(mut self, class: FieldClass, text: impl Into<String>) -> Self {
        self.fields.push((class, text.into()));
        self
    }

    pub fn topic(self, text: impl Into<String>) -> Self {
        self.field(FieldClass::Topic, text)
    }

    pub fn feedback(self, text: impl Into<String>) -> Self {
        self.field(FieldClass::Feedback, text)
    }

    pub fn email(self, text: impl Into<String>) -> Self {
        self.field(FieldClass::Email, text)
    }

    pub fn name(self, text: impl Into<String>) -> Self {
        self.field(FieldClass::Name, text)
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }
}

/// A request that passed every stage.
#[derive(Debug, Clone, Serialize)]
pub struct Admitted {
    /// Sanitized fields, in request order.
    pub fields: Vec<(FieldClass, String)>,
    pub moderation: ModerationResult,
    pub decision: RateDecision,
}

impl Admitted {
    /// First sanitized value of the given class.
    pub fn field(&self, class: FieldClass) -> Option<&str> {
        self.fields
            .iter()
            .find(|(c, _)| *c == class)
            .map(|(_, value)| value.as_str())
    }
}

/// Why a request was not admitted.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Rejection {
    /// A field failed sanitization.
    #[error("invalid input: {0}")]
    Invalid(#[from] SanitizeError),

    /// Moderation scored the content at or above the blocking level.
    #[error("content flagged as {} risk", .0.risk_level)]
    Unsafe(Box<ModerationResult>),

    /// The identifier's quota for the resource is exhausted.
    #[error("rate limit exceeded for '{resource}'; retry after {}s", .decision.retry_after_secs())]
    RateLimited {
        resource: String,
        decision: RateDecision,
    },

    /// The gateway has been shut down.
    #[error("admission gateway is shut down")]
    ShutDown,
}

impl Rejection {
    /// HTTP-equivalent status for surfacing the rejection.
    pub fn status_code(&self) -> u16 {
        match self {
            Rejection::Invalid(_) => 400,
            Rejection::Unsafe(_) => 422,
            Rejection::RateLimited { .. } => 429,
            Rejection::ShutDown => 503,
        }
    }

    /// Stable outcome label.
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::Invalid(_) => "invalid",
            Rejection::Unsafe(_) => "unsafe",
            Rejection::RateLimited { .. } => "rate_limited",
            Rejection::ShutDown => "shut_down",
        }
    }
}

/// Sanitizer, moderator and rate limiter behind a single call.
///
/// Built once at startup via [`Portcullis::builder()`](super::Portcullis::builder)
/// and shared by handle.
pub struct AdmissionGateway {
    cache: Arc<CacheStore>,
    limiter: RateLimiter,
    moderator: ContentModerator,
    moderation: ModerationConfig,
    shut_down: AtomicBool,
}

impl AdmissionGateway {
    pub(crate) fn new(
        cache: Arc<CacheStore>,
        limiter: RateLimiter,
        moderation: ModerationConfig,
    ) -> Self {
        Self {
            cache,
            limiter,
            moderator: ContentModerator::new(),
            moderation,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn moderator(&self) -> &ContentModerator {
        &self.moderator
    }

    pub fn moderation_config(&self) -> &ModerationConfig {
        &self.moderation
    }

    /// Decide whether `request` may proceed to generation.
    ///
    /// Stages run in order and the first failure short-circuits. Quota is
    /// only consumed by requests that pass sanitization and moderation.
    pub async fn admit(&self, request: &AdmissionRequest) -> Result<Admitted, Rejection> {
        let started = Instant::now();
        let result = self.run_pipeline(request).await;

        let outcome = match &result {
            Ok(_) => "admitted",
            Err(rejection) => rejection.code(),
        };
        metrics::counter!(telemetry::ADMISSIONS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(telemetry::ADMISSION_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        if let Err(rejection) = &result {
            debug!(
                identifier = request.identifier(),
                resource = request.resource(),
                outcome,
                reason = %rejection,
                "request rejected"
            );
        }
        result
    }

    async fn run_pipeline(&self, request: &AdmissionRequest) -> Result<Admitted, Rejection> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(Rejection::ShutDown);
        }

        let mut fields = Vec::with_capacity(request.fields.len());
        for (class, raw) in &request.fields {
            fields.push((*class, sanitize::validate(*class, raw)?));
        }

        // Email addresses are personal information by definition; scoring
        // them would only add noise.
        let text = request
            .fields
            .iter()
            .filter(|(class, _)| *class != FieldClass::Email)
            .map(|(_, raw)| raw.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let moderation = self.moderate(&text).await;
        if moderation.risk_level >= self.moderation.block_at {
            return Err(Rejection::Unsafe(Box::new(moderation)));
        }

        let decision = self
            .limiter
            .check_quota(request.identifier(), request.resource())
            .await;
        if !decision.allowed {
            return Err(Rejection::RateLimited {
                resource: request.resource().to_string(),
                decision,
            });
        }

        Ok(Admitted {
            fields,
            moderation,
            decision,
        })
    }

    /// Moderate `text`, using the memo cache when enabled.
    pub async fn moderate(&self, text: &str) -> ModerationResult {
        let result = match self.moderation.memo_ttl() {
            None => self.moderator.moderate(text),
            Some(ttl) => {
                let key = keys::moderation_key(text);
                match self.cache.get::<ModerationResult>(&key).await {
                    CacheOutcome::Done(Some(cached)) => {
                        metrics::counter!(telemetry::MODERATION_MEMO_HITS_TOTAL).increment(1);
                        cached
                    }
                    _ => {
                        metrics::counter!(telemetry::MODERATION_MEMO_MISSES_TOTAL).increment(1);
                        let result = self.moderator.moderate(text);
                        // A failed write is already logged by the store.
                        self.cache.set(&key, &result, Some(ttl)).await;
                        result
                    }
                }
            }
        };

        metrics::counter!(
            telemetry::MODERATION_RESULTS_TOTAL,
            "risk_level" => result.risk_level.as_str()
        )
        .increment(1);
        result
    }

    /// Moderate generated output before it is returned to the user.
    ///
    /// Never rejects; unsafe output is logged and the caller decides.
    pub async fn screen_output(&self, text: &str) -> ModerationResult {
        let result = self.moderate(text).await;
        if !result.is_safe() {
            warn!(
                risk_level = result.risk_level.as_str(),
                risk_score = result.risk_score,
                flags = ?result.flags,
                "generated output flagged by moderation"
            );
        }
        result
    }

    /// Report cache health.
    pub async fn health(&self) -> CacheHealth {
        self.cache.health().await
    }

    /// Stop admitting requests. Later calls to [`admit`](Self::admit)
    /// return [`Rejection::ShutDown`]; repeated calls are no-ops.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let health = self.cache.health().await;
        info!(
            backend = %health.backend,
            status = %health.status,
            "admission gateway shut down"
        );
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}
