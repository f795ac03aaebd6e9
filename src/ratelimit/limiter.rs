use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use super::store::{CounterStore, StoreError};

/// The limiter's store could not answer. Callers must fail closed.
#[derive(Debug, Error)]
#[error("rate limiter unavailable: {0}")]
pub struct RateLimiterUnavailable(#[from] StoreError);

/// Outcome of one admission check. Derived per call, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// Admissions left in the current window; zero when denied.
    pub remaining: u64,
    /// When the current window rolls over.
    pub reset_at: DateTime<Utc>,
}

/// Sliding-window admission control: `quota` requests per `window` per key.
///
/// The window slides by weighting the previous fixed bucket by its
/// unelapsed fraction and adding the current bucket. Denied requests are
/// not counted; a burst that exhausts the quota is admitted again only as
/// the old bucket's weight decays. The weigh-check-increment runs as one
/// atomic store operation, so concurrent checks on a key cannot all read
/// the same pre-increment count.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    quota: u64,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, quota: u64, window: Duration) -> Self {
        Self {
            store,
            quota,
            window,
        }
    }

    pub async fn check(&self, key: &str) -> Result<RateLimitDecision, RateLimiterUnavailable> {
        self.check_at(key, Utc::now().timestamp_millis()).await
    }

    async fn check_at(
        &self,
        key: &str,
        now_ms: i64,
    ) -> Result<RateLimitDecision, RateLimiterUnavailable> {
        let window_ms = self.window.as_millis() as i64;
        let slot = now_ms.div_euclid(window_ms);
        let elapsed = now_ms.rem_euclid(window_ms) as f64 / window_ms as f64;
        let reset_at = DateTime::from_timestamp_millis((slot + 1) * window_ms)
            .unwrap_or(DateTime::UNIX_EPOCH);

        // Bucket ttl is twice the window so the bucket is still readable as
        // the previous one after rollover.
        let admission = self
            .store
            .admit(
                &bucket_key(key, slot - 1),
                &bucket_key(key, slot),
                1.0 - elapsed,
                self.quota,
                self.window * 2,
            )
            .await?;

        let remaining = if admission.allowed {
            (self.quota as f64 - admission.weighted).max(0.0) as u64
        } else {
            0
        };
        Ok(RateLimitDecision {
            allowed: admission.allowed,
            remaining,
            reset_at,
        })
    }
}

fn bucket_key(key: &str, slot: i64) -> String {
    format!("ratelimit:{key}:{slot}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::store::{Admission, MemoryStore};

    fn limiter(quota: u64, window_secs: u64) -> RateLimiter {
        RateLimiter::new(
            Arc::new(MemoryStore::new()),
            quota,
            Duration::from_secs(window_secs),
        )
    }

    #[tokio::test]
    async fn test_quota_admits_then_denies() {
        let limiter = limiter(4, 10);
        for expected_remaining in [3, 2, 1, 0] {
            let decision = limiter.check_at("1.2.3.4", 1_000).await.unwrap();
            assert!(decision.allowed);
            assert_eq!(decision.remaining, expected_remaining);
        }
        let denied = limiter.check_at("1.2.3.4", 1_200).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
    }

    #[tokio::test]
    async fn test_idle_key_is_admitted_after_window() {
        let limiter = limiter(4, 10);
        for t in [0, 200, 500, 900] {
            assert!(limiter.check_at("k", t).await.unwrap().allowed);
        }
        assert!(!limiter.check_at("k", 1_000).await.unwrap().allowed);
        // Eleven seconds after the first admitted call the old bucket has
        // decayed below quota.
        assert!(limiter.check_at("k", 11_000).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = limiter(1, 10);
        assert!(limiter.check_at("1.2.3.4", 500).await.unwrap().allowed);
        assert!(!limiter.check_at("1.2.3.4", 600).await.unwrap().allowed);
        assert!(limiter.check_at("5.6.7.8", 700).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_denied_requests_are_not_counted() {
        let limiter = limiter(2, 10);
        assert!(limiter.check_at("k", 0).await.unwrap().allowed);
        assert!(limiter.check_at("k", 100).await.unwrap().allowed);
        for t in [200, 300, 400] {
            assert!(!limiter.check_at("k", t).await.unwrap().allowed);
        }
        // A full window later the burst has aged out entirely.
        assert!(limiter.check_at("k", 20_000).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_previous_window_weight_decays() {
        let limiter = limiter(4, 10);
        // Burst late in the first window.
        for t in [9_000, 9_100, 9_200, 9_300] {
            assert!(limiter.check_at("k", t).await.unwrap().allowed);
        }
        // Just after rollover the previous bucket still carries almost all
        // its weight: 4 * 0.99 >= 4 is false, so one request slips in.
        assert!(limiter.check_at("k", 10_100).await.unwrap().allowed);
        // Now 4 * 0.98 + 1 >= 4 holds.
        assert!(!limiter.check_at("k", 10_200).await.unwrap().allowed);
        // Mid-window the old burst has decayed to half weight.
        assert!(limiter.check_at("k", 15_000).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_concurrent_burst_stays_within_quota() {
        // Conforming store that answers slowly, widening any race window
        // between the caller's check and its increment.
        struct SlowStore(MemoryStore);

        #[async_trait::async_trait]
        impl CounterStore for SlowStore {
            async fn admit(
                &self,
                previous_key: &str,
                current_key: &str,
                previous_weight: f64,
                quota: u64,
                ttl: Duration,
            ) -> Result<Admission, StoreError> {
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.0
                    .admit(previous_key, current_key, previous_weight, quota, ttl)
                    .await
            }
        }

        let limiter = Arc::new(RateLimiter::new(
            Arc::new(SlowStore(MemoryStore::new())),
            4,
            Duration::from_secs(10),
        ));
        let handles: Vec<_> = (0..30)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move {
                    limiter.check_at("9.9.9.9", 5_000).await.unwrap().allowed
                })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 4);
    }

    #[tokio::test]
    async fn test_reset_at_is_window_end() {
        let limiter = limiter(4, 10);
        let decision = limiter.check_at("k", 12_345).await.unwrap();
        assert_eq!(
            decision.reset_at,
            DateTime::from_timestamp_millis(20_000).unwrap()
        );
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        struct FailingStore;

        #[async_trait::async_trait]
        impl CounterStore for FailingStore {
            async fn admit(
                &self,
                _previous_key: &str,
                _current_key: &str,
                _previous_weight: f64,
                _quota: u64,
                _ttl: Duration,
            ) -> Result<Admission, StoreError> {
                Err(StoreError("connection refused".to_string()))
            }
        }

        let limiter = RateLimiter::new(Arc::new(FailingStore), 4, Duration::from_secs(10));
        let err = limiter.check("k").await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }
}
