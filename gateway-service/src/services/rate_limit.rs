//! Fixed-window rate limiting over the external counter store.
//!
//! Counters are read-then-written without compare-and-swap: concurrent
//! requests from the same identifier may briefly over-admit, which is the
//! accepted tradeoff for a lock-free pipeline. A counter-store failure
//! fails open; blocking all traffic on an infrastructure fault is worse
//! than admitting some.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::models::rate_limit::RateLimitCounter;
use crate::models::{EndpointClass, TierLimits};
use crate::services::store::CounterStore;

/// Outcome of a limit check. `limit`/`remaining` feed the `X-RateLimit-*`
/// headers on API routes.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the current window ends; only meaningful when denied
    pub retry_after_seconds: i64,
    pub window_reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    fn allowed(limit: u32, used: u32, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: true,
            limit,
            remaining: limit.saturating_sub(used),
            retry_after_seconds: 0,
            window_reset_at: reset_at,
        }
    }

    fn denied(limit: u32, retry_after_seconds: i64, reset_at: DateTime<Utc>) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            retry_after_seconds: retry_after_seconds.max(1),
            window_reset_at: reset_at,
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService {
    counters: Arc<dyn CounterStore>,
}

impl RateLimitService {
    pub fn new(counters: Arc<dyn CounterStore>) -> Self {
        Self { counters }
    }

    /// Count this request against `(class, identifier)` and decide.
    pub async fn check(
        &self,
        class: EndpointClass,
        identifier: &str,
        max_requests: u32,
        window_seconds: i64,
    ) -> RateLimitDecision {
        let key = class.scope_key(identifier);
        let now = Utc::now();
        // Stale counters may outlive one full window before the store
        // drops them
        let ttl = window_seconds * 2;

        let existing = match self.counters.fetch(&key).await {
            Ok(existing) => existing,
            Err(e) => {
                tracing::warn!(error = %e, scope = %key, "Counter store read failed, failing open");
                return RateLimitDecision::allowed(max_requests, 1, now);
            }
        };

        let counter = match existing {
            None => RateLimitCounter::started(now),
            Some(mut counter) => {
                let elapsed = (now - counter.window_start).num_seconds();
                if elapsed >= window_seconds {
                    RateLimitCounter::started(now)
                } else if counter.request_count < max_requests {
                    counter.request_count += 1;
                    counter.last_request_at = now;
                    counter
                } else {
                    let reset_at =
                        counter.window_start + chrono::Duration::seconds(window_seconds);
                    return RateLimitDecision::denied(max_requests, window_seconds - elapsed, reset_at);
                }
            }
        };

        let reset_at = counter.window_start + chrono::Duration::seconds(window_seconds);
        let used = counter.request_count;
        if let Err(e) = self.counters.put(&key, &counter, ttl).await {
            tracing::warn!(error = %e, scope = %key, "Counter store write failed, failing open");
        }

        RateLimitDecision::allowed(max_requests, used, reset_at)
    }

    /// Tiered check for API traffic: the key's per-minute window and the
    /// owning user's per-day window must both pass. A day limit of -1
    /// disables that axis. Returned headers reflect the per-minute axis
    /// unless the day axis is the one that denied.
    pub async fn check_api(
        &self,
        key_id: &str,
        owner_user_id: &str,
        limits: &TierLimits,
    ) -> RateLimitDecision {
        let minute = self
            .check(
                EndpointClass::ApiMinute,
                key_id,
                limits.requests_per_minute,
                60,
            )
            .await;
        if !minute.allowed {
            return minute;
        }

        if limits.requests_per_day >= 0 {
            let day = self
                .check(
                    EndpointClass::ApiDay,
                    owner_user_id,
                    limits.requests_per_day as u32,
                    86_400,
                )
                .await;
            if !day.allowed {
                return day;
            }
        }

        minute
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::MemoryCounterStore;
    use async_trait::async_trait;

    fn service() -> RateLimitService {
        RateLimitService::new(Arc::new(MemoryCounterStore::new()))
    }

    #[tokio::test]
    async fn fifth_request_allowed_sixth_denied() {
        let limiter = service();

        for i in 1..=5 {
            let decision = limiter
                .check(EndpointClass::AuthLogin, "10.0.0.1", 5, 60)
                .await;
            assert!(decision.allowed, "request {} should pass", i);
            assert_eq!(decision.remaining, 5 - i);
        }

        let denied = limiter
            .check(EndpointClass::AuthLogin, "10.0.0.1", 5, 60)
            .await;
        assert!(!denied.allowed);
        assert!(denied.retry_after_seconds > 0);
        assert_eq!(denied.remaining, 0);
    }

    #[tokio::test]
    async fn identifiers_and_classes_count_separately() {
        let limiter = service();

        for _ in 0..3 {
            assert!(
                limiter
                    .check(EndpointClass::AuthLogin, "10.0.0.1", 3, 60)
                    .await
                    .allowed
            );
        }
        assert!(
            !limiter
                .check(EndpointClass::AuthLogin, "10.0.0.1", 3, 60)
                .await
                .allowed
        );

        // Same identifier, different class: fresh window
        assert!(
            limiter
                .check(EndpointClass::AuthSignup, "10.0.0.1", 3, 60)
                .await
                .allowed
        );
        // Same class, different identifier: fresh window
        assert!(
            limiter
                .check(EndpointClass::AuthLogin, "10.0.0.2", 3, 60)
                .await
                .allowed
        );
    }

    #[tokio::test]
    async fn window_expiry_resets_the_counter() {
        let limiter = service();

        assert!(limiter.check(EndpointClass::Session, "u1", 1, 1).await.allowed);
        assert!(!limiter.check(EndpointClass::Session, "u1", 1, 1).await.allowed);

        tokio::time::sleep(std::time::Duration::from_millis(1100)).await;

        let fresh = limiter.check(EndpointClass::Session, "u1", 1, 1).await;
        assert!(fresh.allowed);
        assert_eq!(fresh.remaining, 0);
    }

    struct BrokenCounterStore;

    #[async_trait]
    impl CounterStore for BrokenCounterStore {
        async fn fetch(
            &self,
            _scope_key: &str,
        ) -> Result<Option<RateLimitCounter>, anyhow::Error> {
            Err(anyhow::anyhow!("store unreachable"))
        }

        async fn put(
            &self,
            _scope_key: &str,
            _counter: &RateLimitCounter,
            _ttl_seconds: i64,
        ) -> Result<(), anyhow::Error> {
            Err(anyhow::anyhow!("store unreachable"))
        }

        async fn sweep(&self, _max_window_seconds: i64) -> Result<u64, anyhow::Error> {
            Err(anyhow::anyhow!("store unreachable"))
        }

        async fn health_check(&self) -> Result<(), anyhow::Error> {
            Err(anyhow::anyhow!("store unreachable"))
        }
    }

    #[tokio::test]
    async fn store_failure_fails_open() {
        let limiter = RateLimitService::new(Arc::new(BrokenCounterStore));
        // Way past any limit; every request is still admitted
        for _ in 0..10 {
            assert!(limiter.check(EndpointClass::ApiMinute, "k1", 1, 60).await.allowed);
        }
    }

    #[tokio::test]
    async fn tiered_check_enforces_both_axes() {
        let limiter = service();
        let limits = TierLimits {
            requests_per_minute: 10,
            requests_per_day: 3,
        };

        for _ in 0..3 {
            assert!(limiter.check_api("key1", "owner1", &limits).await.allowed);
        }
        // Minute axis has room, day axis is spent
        let denied = limiter.check_api("key1", "owner1", &limits).await;
        assert!(!denied.allowed);
        assert!(denied.retry_after_seconds > 0);
    }

    #[tokio::test]
    async fn unlimited_day_axis_is_skipped() {
        let limiter = service();
        let limits = TierLimits {
            requests_per_minute: 2,
            requests_per_day: -1,
        };

        assert!(limiter.check_api("key1", "owner1", &limits).await.allowed);
        assert!(limiter.check_api("key1", "owner1", &limits).await.allowed);
        let denied = limiter.check_api("key1", "owner1", &limits).await;
        assert!(!denied.allowed);
        assert_eq!(denied.limit, 2);
    }
}
