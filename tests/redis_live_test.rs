//! Live cache tests - ignored by default, run with:
//! `REDIS_URL=redis://127.0.0.1:6379 cargo test --test redis_live_test -- --ignored`
//!
//! Each test works under its own resource prefix and clears it afterwards.

use std::sync::Arc;
use std::time::Duration;

use portcullis::{
    BackendKind, CacheConfig, CacheOutcome, CacheStore, HealthStatus, LimiterConfig, RateLimiter,
};

async fn live_store() -> Arc<CacheStore> {
    let url = std::env::var("REDIS_URL").expect("REDIS_URL must be set for live tests");
    let config = CacheConfig::new().url(url).fallback_to_memory(false);
    Arc::new(
        CacheStore::connect(&config)
            .await
            .expect("live cache must be reachable"),
    )
}

#[tokio::test]
#[ignore]
async fn test_live_health_and_round_trip() {
    let cache = live_store().await;
    assert_eq!(cache.backend_kind(), BackendKind::Redis);
    assert!(!cache.is_degraded());
    assert_eq!(cache.health().await.status, HealthStatus::Healthy);

    cache
        .set("portcullis_live_kv:a", &vec![1u64, 2, 3], Some(Duration::from_secs(5)))
        .await;
    assert_eq!(
        cache.get::<Vec<u64>>("portcullis_live_kv:a").await,
        CacheOutcome::Done(Some(vec![1, 2, 3]))
    );
    assert_eq!(cache.increment("portcullis_live_kv:n", 3).await, CacheOutcome::Done(3));
    assert_eq!(
        cache.clear_pattern("portcullis_live_kv:*").await,
        CacheOutcome::Done(2)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_live_window_is_atomic_across_tasks() {
    let cache = live_store().await;
    let limiter = Arc::new(RateLimiter::new(cache.clone(), LimiterConfig::new()));
    let resource = "portcullis_live_window";
    limiter.reset_resource(resource).await;

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let limiter = limiter.clone();
            tokio::spawn(async move {
                limiter
                    .check("user-1", resource, 10, Duration::from_secs(30))
                    .await
            })
        })
        .collect();

    let mut admitted = 0;
    for handle in handles {
        let decision = handle.await.unwrap();
        assert!(!decision.degraded);
        if decision.allowed {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 10);

    let peek = limiter.peek("user-1", resource).await;
    assert!(!peek.degraded);

    assert_eq!(limiter.reset("user-1", resource).await, CacheOutcome::Done(true));
    limiter.reset_resource(resource).await;
}

#[tokio::test]
#[ignore]
async fn test_live_bucket_state_round_trips() {
    let cache = live_store().await;
    let limiter = RateLimiter::new(cache, LimiterConfig::new());
    let resource = "portcullis_live_bucket";
    limiter.reset_resource(resource).await;

    assert!(limiter.check_bucket("user-1", resource, 2, 0.01).await.allowed);
    assert!(limiter.check_bucket("user-1", resource, 2, 0.01).await.allowed);
    let decision = limiter.check_bucket("user-1", resource, 2, 0.01).await;
    assert!(!decision.allowed);
    assert!(!decision.degraded);

    limiter.reset_resource(resource).await;
}
