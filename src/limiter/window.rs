//! Sliding-window decisions.
//!
//! The stored state is the list of admitted timestamps (milliseconds) under
//! `resource:identifier`. Pruning, counting and appending happen inside the
//! backend as one atomic step (see [`CacheBackend::admit_window`]); this
//! module only turns what the backend observed into a [`RateDecision`].
//!
//! [`CacheBackend::admit_window`]: crate::cache::CacheBackend::admit_window

use std::time::Duration;

use super::types::{RateDecision, system_time_from_millis};
use crate::cache::{WindowOutcome, WindowRequest};

/// Decision for an attempt the backend has already applied.
pub(crate) fn decide(observed: &WindowOutcome, request: &WindowRequest) -> RateDecision {
    let limit = request.max_requests;
    let now = request.now_ms;

    if observed.admitted {
        // The appended timestamp guarantees an oldest entry.
        let oldest = observed.oldest_ms.unwrap_or(now);
        return RateDecision::allowed(
            limit,
            limit.saturating_sub(observed.count),
            system_time_from_millis(oldest.saturating_add(request.window_ms)),
        );
    }

    let retry_ms = retry_after_ms(observed.oldest_ms, request);
    RateDecision::rejected(
        limit,
        system_time_from_millis(now.saturating_add(retry_ms)),
        Duration::from_millis(retry_ms),
    )
}

/// Read-only view of a stored sequence, without consuming quota.
pub(crate) fn inspect(stored: Vec<u64>, request: &WindowRequest) -> RateDecision {
    let kept = request.prune(stored);
    let count = kept.len() as u32;
    let limit = request.max_requests;
    let oldest = kept.first().copied();

    if count >= limit {
        let retry_ms = retry_after_ms(oldest, request);
        return RateDecision::rejected(
            limit,
            system_time_from_millis(request.now_ms.saturating_add(retry_ms)),
            Duration::from_millis(retry_ms),
        );
    }

    let reset_ms = oldest.map_or(request.now_ms, |t| t.saturating_add(request.window_ms));
    RateDecision::allowed(
        limit,
        limit - count,
        system_time_from_millis(reset_ms),
    )
}

/// Time until the oldest timestamp leaves the window, never zero. With no
/// timestamps to wait for (a zero limit) the whole window is reported.
fn retry_after_ms(oldest: Option<u64>, request: &WindowRequest) -> u64 {
    match oldest {
        Some(oldest) => oldest
            .saturating_add(request.window_ms)
            .saturating_sub(request.now_ms)
            .max(1),
        None => request.window_ms.max(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn request(now_ms: u64, max_requests: u32) -> WindowRequest {
        WindowRequest {
            now_ms,
            window_ms: 60_000,
            max_requests,
            ttl: Duration::from_secs(120),
        }
    }

    #[test]
    fn admitted_reports_remaining_and_reset() {
        let req = request(100_000, 3);
        let observed = WindowOutcome {
            admitted: true,
            count: 2,
            oldest_ms: Some(90_000),
        };
        let decision = decide(&observed, &req);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
        assert_eq!(decision.retry_after, Duration::ZERO);
        assert_eq!(
            decision.reset_at,
            UNIX_EPOCH + Duration::from_millis(150_000)
        );
    }

    #[test]
    fn rejected_waits_for_oldest_to_expire() {
        let req = request(100_000, 2);
        let observed = WindowOutcome {
            admitted: false,
            count: 2,
            oldest_ms: Some(70_000),
        };
        let decision = decide(&observed, &req);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.retry_after, Duration::from_secs(30));
    }

    #[test]
    fn zero_limit_waits_whole_window() {
        let req = request(100_000, 0);
        let observed = WindowOutcome {
            admitted: false,
            count: 0,
            oldest_ms: None,
        };
        assert_eq!(decide(&observed, &req).retry_after, Duration::from_secs(60));
    }

    #[test]
    fn inspect_does_not_count_stale_entries() {
        let req = request(100_000, 3);
        let decision = inspect(vec![10_000, 50_000, 99_000], &req);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 2);
    }

    #[test]
    fn inspect_on_empty_history_is_full() {
        let decision = inspect(Vec::new(), &request(100_000, 5));
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 5);
    }
}
