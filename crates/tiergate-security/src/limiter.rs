//! Sliding-window rate limiter.
//!
//! State per `(identifier, class)` lives in the shared tier under
//! `rl:{class}:{identifier}` as the timestamps of admitted requests:
//!
//! ```text
//! Open (count < limit) ──limit reached──▶ Closed ──oldest leaves window──▶ Open
//! ```
//!
//! There is no background sweep; the window is recomputed from the stored
//! timestamps on every check. Admission and recording happen in one atomic
//! store operation, so concurrent checks never admit more than `limit`
//! requests per window. A denied check does not touch the stored sequence.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tiergate_cache::{TieredCache, now_millis};

use crate::error::{Result, SecurityError};
use crate::policy::RateLimitPolicy;

/// Extra lifetime of a window key past the window itself.
const WINDOW_KEY_SLACK: Duration = Duration::from_secs(60);

/// Result of one limiter check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStatus {
    pub allowed: bool,
    /// Class whose limit applied (unknown classes resolve to `default`).
    pub class: String,
    pub limit: u64,
    pub remaining: u64,
    /// Unix seconds at which the oldest request in the window expires.
    pub reset_at: u64,
    /// Seconds to wait before retrying; only set when denied.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

/// Outcome of a multi-class check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompositeOutcome {
    /// Statuses of the classes that were evaluated, in order. Evaluation
    /// stops at the first denial, so a denied status is always last.
    pub checked: Vec<RateLimitStatus>,
}

impl CompositeOutcome {
    pub fn allowed(&self) -> bool {
        self.denied().is_none()
    }

    pub fn denied(&self) -> Option<&RateLimitStatus> {
        self.checked.last().filter(|status| !status.allowed)
    }
}

pub struct SlidingWindowLimiter {
    cache: Arc<TieredCache>,
    policy: RateLimitPolicy,
}

impl SlidingWindowLimiter {
    /// Fails if any class in `policy` has a zero limit or window.
    pub fn new(cache: Arc<TieredCache>, policy: RateLimitPolicy) -> Result<Self> {
        policy.validate()?;
        Ok(Self { cache, policy })
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub fn window_key(class: &str, identifier: &str) -> String {
        format!("rl:{class}:{identifier}")
    }

    /// Check and, if admitted, record one request for `identifier` in `class`.
    pub async fn check(&self, identifier: &str, class: &str) -> Result<RateLimitStatus> {
        self.check_at(identifier, class, now_millis()).await
    }

    /// [`check`](Self::check) with an explicit clock, in unix milliseconds.
    pub async fn check_at(
        &self,
        identifier: &str,
        class: &str,
        now_ms: u64,
    ) -> Result<RateLimitStatus> {
        if identifier.is_empty() {
            return Err(SecurityError::EmptyIdentifier);
        }
        let (class, limit) = self.policy.resolve(class);
        let window = limit.window();
        let key = Self::window_key(class, identifier);

        let snapshot = self
            .cache
            .record_in_window(&key, now_ms, window, limit.requests, window + WINDOW_KEY_SLACK)
            .await?;

        let window_ms = window.as_millis() as u64;
        let reset_ms = snapshot.oldest_ms.unwrap_or(now_ms) + window_ms;
        let reset_at = reset_ms.div_ceil(1000);

        let status = if snapshot.admitted {
            RateLimitStatus {
                allowed: true,
                class: class.to_string(),
                limit: limit.requests,
                remaining: limit.requests.saturating_sub(snapshot.count + 1),
                reset_at,
                retry_after: None,
            }
        } else {
            let retry_after = reset_ms.saturating_sub(now_ms).div_ceil(1000).max(1);
            tracing::debug!(
                identifier = %identifier,
                class,
                limit = limit.requests,
                retry_after,
                "rate limit exceeded"
            );
            RateLimitStatus {
                allowed: false,
                class: class.to_string(),
                limit: limit.requests,
                remaining: 0,
                reset_at,
                retry_after: Some(retry_after),
            }
        };
        crate::metrics::record_limit_check(status.allowed);
        Ok(status)
    }

    /// Check `classes` in order and stop at the first one that is closed.
    ///
    /// Classes before the denial have recorded the request; classes after it
    /// are never evaluated.
    pub async fn check_composite(
        &self,
        identifier: &str,
        classes: &[&str],
    ) -> Result<CompositeOutcome> {
        let mut outcome = CompositeOutcome::default();
        for class in classes {
            let status = self.check(identifier, class).await?;
            let allowed = status.allowed;
            outcome.checked.push(status);
            if !allowed {
                break;
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ClassLimit;
    use tiergate_cache::{CacheSettings, MemoryStore};

    fn limiter(policy: RateLimitPolicy) -> SlidingWindowLimiter {
        let cache = Arc::new(TieredCache::new(
            CacheSettings::default(),
            Some(Arc::new(MemoryStore::new())),
        ));
        SlidingWindowLimiter::new(cache, policy).unwrap()
    }

    #[tokio::test]
    async fn test_remaining_counts_down() {
        let limiter = limiter(RateLimitPolicy::default().with_class("t", ClassLimit::new(3, 60)));
        let now = 1_700_000_000_000;

        let first = limiter.check_at("ip1", "t", now).await.unwrap();
        assert!(first.allowed);
        assert_eq!(first.remaining, 2);
        assert_eq!(first.reset_at, 1_700_000_060);
        assert_eq!(first.retry_after, None);

        assert_eq!(limiter.check_at("ip1", "t", now + 1).await.unwrap().remaining, 1);
        assert_eq!(limiter.check_at("ip1", "t", now + 2).await.unwrap().remaining, 0);

        let denied = limiter.check_at("ip1", "t", now + 3).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.retry_after, Some(60));
    }

    #[tokio::test]
    async fn test_window_reopens_after_oldest_expires() {
        let limiter = limiter(RateLimitPolicy::default().with_class("t", ClassLimit::new(2, 10)));
        let now = 1_700_000_000_000;

        assert!(limiter.check_at("ip", "t", now).await.unwrap().allowed);
        assert!(limiter.check_at("ip", "t", now + 4_000).await.unwrap().allowed);

        let denied = limiter.check_at("ip", "t", now + 9_500).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after, Some(1));

        // The first request has left the window; the second has not.
        let reopened = limiter.check_at("ip", "t", now + 10_001).await.unwrap();
        assert!(reopened.allowed);
        assert_eq!(reopened.remaining, 0);
        assert!(!limiter.check_at("ip", "t", now + 10_002).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_denial_does_not_extend_window() {
        let limiter = limiter(RateLimitPolicy::default().with_class("t", ClassLimit::new(1, 10)));
        let now = 1_700_000_000_000;
        assert!(limiter.check_at("ip", "t", now).await.unwrap().allowed);
        for offset in 1..20 {
            assert!(!limiter.check_at("ip", "t", now + offset * 100).await.unwrap().allowed);
        }
        assert!(limiter.check_at("ip", "t", now + 10_001).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_request_exactly_one_window_old_still_counts() {
        let limiter = limiter(RateLimitPolicy::default().with_class("t", ClassLimit::new(1, 10)));
        let now = 1_700_000_000_000;
        assert!(limiter.check_at("ip", "t", now).await.unwrap().allowed);

        let boundary = limiter.check_at("ip", "t", now + 10_000).await.unwrap();
        assert!(!boundary.allowed);
        assert_eq!(boundary.retry_after, Some(1));

        assert!(limiter.check_at("ip", "t", now + 10_001).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_identifiers_and_classes_are_independent() {
        let limiter = limiter(
            RateLimitPolicy::default()
                .with_class("a", ClassLimit::new(1, 60))
                .with_class("b", ClassLimit::new(1, 60)),
        );
        assert!(limiter.check("ip1", "a").await.unwrap().allowed);
        assert!(!limiter.check("ip1", "a").await.unwrap().allowed);
        assert!(limiter.check("ip2", "a").await.unwrap().allowed);
        assert!(limiter.check("ip1", "b").await.unwrap().allowed);
    }

    #[tokio::test]
    async fn test_unknown_class_uses_default_window() {
        let limiter = limiter(RateLimitPolicy::default());
        let status = limiter.check("ip1", "charts").await.unwrap();
        assert_eq!(status.class, "default");
        assert_eq!(status.limit, 100);
        assert_eq!(status.remaining, 99);
        // Shares the default window.
        let status = limiter.check("ip1", "default").await.unwrap();
        assert_eq!(status.remaining, 98);
    }

    #[tokio::test]
    async fn test_composite_short_circuits() {
        let limiter = limiter(
            RateLimitPolicy::default()
                .with_class("first", ClassLimit::new(5, 60))
                .with_class("tight", ClassLimit::new(1, 60))
                .with_class("last", ClassLimit::new(5, 60)),
        );
        let classes = ["first", "tight", "last"];

        let ok = limiter.check_composite("ip", &classes).await.unwrap();
        assert!(ok.allowed());
        assert_eq!(ok.checked.len(), 3);

        let denied = limiter.check_composite("ip", &classes).await.unwrap();
        assert!(!denied.allowed());
        assert_eq!(denied.checked.len(), 2);
        assert_eq!(denied.denied().unwrap().class, "tight");

        // "last" was never evaluated for the denied request.
        let last = limiter.check("ip", "last").await.unwrap();
        assert_eq!(last.remaining, 3);
    }

    #[tokio::test]
    async fn test_rejects_empty_identifier_and_bad_policy() {
        let limiter = limiter(RateLimitPolicy::default());
        assert!(matches!(
            limiter.check("", "default").await,
            Err(SecurityError::EmptyIdentifier)
        ));

        let cache = Arc::new(TieredCache::local_only(CacheSettings::default()));
        let bad = RateLimitPolicy::default().with_class("x", ClassLimit::new(0, 1));
        assert!(SlidingWindowLimiter::new(cache, bad).is_err());
    }

    #[tokio::test]
    async fn test_works_without_shared_tier() {
        let cache = Arc::new(TieredCache::local_only(CacheSettings::default()));
        let limiter = SlidingWindowLimiter::new(
            cache,
            RateLimitPolicy::default().with_class("t", ClassLimit::new(2, 60)),
        )
        .unwrap();
        assert!(limiter.check("ip", "t").await.unwrap().allowed);
        assert!(limiter.check("ip", "t").await.unwrap().allowed);
        assert!(!limiter.check("ip", "t").await.unwrap().allowed);
    }
}
