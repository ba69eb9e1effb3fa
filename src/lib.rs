//! Portcullis - admission and safety gateway for expensive generation calls
//!
//! Sits between untrusted free-text requests and a rate-sensitive
//! downstream generation step. Every request passes three stages, any of
//! which can reject it:
//!
//! 1. **Sanitizer** ([`sanitize`]) — normalizes fields and rejects empty,
//!    oversized, malformed or injection-bearing input.
//! 2. **Moderator** ([`moderation`]) — scores content risk across hate
//!    speech, violence, spam, profanity, personal information and scams.
//! 3. **Rate limiter** ([`limiter`]) — per-identifier, per-resource quotas
//!    on top of the [`CacheStore`], which degrades to an in-process cache
//!    when the networked one is unavailable.
//!
//! # Example
//!
//! ```rust,no_run
//! use portcullis::{AdmissionRequest, Portcullis};
//!
//! #[tokio::main]
//! async fn main() -> portcullis::Result<()> {
//!     let gateway = Portcullis::builder()
//!         .cache_url("redis://127.0.0.1:6379")
//!         .build()
//!         .await?;
//!
//!     let request = AdmissionRequest::new("user-42", "generation")
//!         .topic("SAP S/4HANA migration best practices");
//!
//!     match gateway.admit(&request).await {
//!         Ok(admitted) => println!("remaining: {}", admitted.decision.remaining),
//!         Err(rejection) => println!("{} {}", rejection.status_code(), rejection),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! The components are also usable on their own: [`ContentModerator`] and
//! the [`sanitize`] functions are pure, and [`RateLimiter`] only needs a
//! shared [`CacheStore`].

pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod limiter;
pub mod moderation;
pub mod sanitize;
pub mod telemetry;

// Re-export main types at crate root
pub use cache::{
    BackendKind, CacheBackend, CacheConfig, CacheHealth, CacheOutcome, CacheStore, HealthStatus,
};
pub use config::{GatewayConfig, ModerationConfig};
pub use error::{PortcullisError, Result};
pub use gateway::{
    AdmissionGateway, AdmissionRequest, Admitted, Portcullis, PortcullisBuilder, Rejection,
};
pub use limiter::{FailurePolicy, LimiterConfig, Quota, RateDecision, RateLimiter};
pub use moderation::{ContentModerator, ModerationFlag, ModerationResult, RiskLevel};
pub use sanitize::{FieldClass, SanitizeError};

/// Crate version, for CLI and health output.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
