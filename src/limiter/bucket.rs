//! Token bucket arithmetic.
//!
//! Unlike the sliding window, the bucket is a plain read, compute, write
//! against the cache. Two concurrent checks for the same key can both read
//! the same state and both take the last token, over-admitting by at most
//! the number of concurrent racers. Use the sliding window where that
//! matters.

use std::time::{Duration, SystemTime};

use super::types::{RateDecision, TokenBucketState, system_time_from_millis};

/// Smallest refill rate accepted, in tokens per second.
pub(crate) const MIN_REFILL_RATE: f64 = 1e-6;

/// Bucket parameters for one check.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Bucket {
    pub capacity: u32,
    /// Tokens per second, already clamped.
    pub refill_rate: f64,
}

impl Bucket {
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        let refill_rate = if refill_rate.is_finite() {
            refill_rate.max(MIN_REFILL_RATE)
        } else {
            MIN_REFILL_RATE
        };
        Self {
            capacity,
            refill_rate,
        }
    }

    /// Seconds for one token to refill.
    pub fn token_interval(&self) -> Duration {
        secs_ceil(1.0 / self.refill_rate)
    }

    /// How long a stored state stays meaningful: after a full refill an
    /// absent entry and a stored one are equivalent.
    pub fn state_ttl(&self, grace: Duration) -> Duration {
        secs_ceil(f64::from(self.capacity) / self.refill_rate).saturating_add(grace)
    }

    /// Bring `state` up to `now_ms`. Absent state starts full.
    pub fn refill(&self, state: Option<TokenBucketState>, now_ms: u64) -> TokenBucketState {
        let capacity = f64::from(self.capacity);
        match state {
            None => TokenBucketState {
                tokens: capacity,
                last_refill_ms: now_ms,
            },
            Some(state) => {
                let elapsed_secs = now_ms.saturating_sub(state.last_refill_ms) as f64 / 1000.0;
                let tokens =
                    (state.tokens.max(0.0) + elapsed_secs * self.refill_rate).min(capacity);
                TokenBucketState {
                    tokens,
                    last_refill_ms: now_ms.max(state.last_refill_ms),
                }
            }
        }
    }

    /// Try to take one token from an already refilled state.
    ///
    /// Returns the state to persist when admitted (`None` on rejection)
    /// and the decision.
    pub fn take(
        &self,
        state: TokenBucketState,
        now_ms: u64,
    ) -> (Option<TokenBucketState>, RateDecision) {
        if state.tokens >= 1.0 {
            let tokens = state.tokens - 1.0;
            let until_full = secs_ceil((f64::from(self.capacity) - tokens) / self.refill_rate);
            let decision = RateDecision::allowed(
                self.capacity,
                tokens.floor() as u32,
                after(now_ms, until_full),
            );
            let next = TokenBucketState {
                tokens,
                last_refill_ms: now_ms,
            };
            return (Some(next), decision);
        }

        let retry_after =
            secs_ceil((1.0 - state.tokens) / self.refill_rate).max(Duration::from_secs(1));
        let decision =
            RateDecision::rejected(self.capacity, after(now_ms, retry_after), retry_after);
        (None, decision)
    }
}

fn after(now_ms: u64, wait: Duration) -> SystemTime {
    let now = system_time_from_millis(now_ms);
    now.checked_add(wait).unwrap_or(now)
}

fn secs_ceil(secs: f64) -> Duration {
    if secs.is_finite() && secs > 0.0 {
        Duration::from_secs(secs.ceil() as u64)
    } else {
        Duration::ZERO
    }
}
