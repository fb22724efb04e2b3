use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use ps2filter_common::{ClientIdentity, RateLimitDecision};

use crate::traits::CounterStore;

/// Fixed-window limiter keyed by client identity.
///
/// Availability wins over strictness: with no store configured, no resolvable
/// identity, or a failing store, the request is let through and no decision
/// is returned.
pub struct RateLimiter {
    store: Option<Arc<dyn CounterStore>>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, limit: u32, window: Duration) -> Self {
        Self {
            store: Some(store),
            limit,
            window,
        }
    }

    pub fn disabled() -> Self {
        Self {
            store: None,
            limit: 0,
            window: Duration::ZERO,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub async fn check_and_consume(
        &self,
        identity: Option<&ClientIdentity>,
    ) -> Option<RateLimitDecision> {
        self.check_and_consume_at(identity, Utc::now()).await
    }

    pub async fn check_and_consume_at(
        &self,
        identity: Option<&ClientIdentity>,
        now: DateTime<Utc>,
    ) -> Option<RateLimitDecision> {
        let store = self.store.as_ref()?;

        let Some(identity) = identity else {
            warn!("Client identity unavailable, skipping rate limit");
            return None;
        };

        let (window_index, reset) = window_bounds(now, self.window);
        let key = format!("ratelimit:{identity}:{window_index}");
        let ttl = (reset - now).to_std().unwrap_or(self.window);

        let count = match store.increment(&key, ttl).await {
            Ok(count) => count,
            Err(e) => {
                warn!(error = %e, "Rate limit store unavailable, allowing request");
                return None;
            }
        };

        let used = u32::try_from(count).unwrap_or(u32::MAX);
        let decision = RateLimitDecision {
            allowed: used <= self.limit,
            limit: self.limit,
            remaining: self.limit.saturating_sub(used),
            reset,
        };
        debug!(
            client = %identity,
            count,
            limit = self.limit,
            allowed = decision.allowed,
            "Rate limit checked"
        );
        Some(decision)
    }
}

/// Index of the fixed window containing `now`, and the instant it closes.
fn window_bounds(now: DateTime<Utc>, window: Duration) -> (i64, DateTime<Utc>) {
    let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX).max(1);
    let index = now.timestamp_millis().div_euclid(window_ms);
    let reset_ms = index.saturating_add(1).saturating_mul(window_ms);
    let reset = DateTime::from_timestamp_millis(reset_ms).unwrap_or(now);
    (index, reset)
}

// ---------------------------------------------------------------------------
// MemoryCounterStore
// ---------------------------------------------------------------------------

const PRUNE_THRESHOLD: usize = 1000;

struct Counter {
    count: u64,
    expires_at: Instant,
}

/// Process-local counter store. Correct for a single instance only.
#[derive(Default)]
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, Counter>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, ttl: Duration) -> Result<u64> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        // Prune expired windows to keep the map bounded
        if entries.len() > PRUNE_THRESHOLD {
            entries.retain(|_, c| c.expires_at > now);
        }

        let counter = entries.entry(key.to_string()).or_insert(Counter {
            count: 0,
            expires_at: now + ttl,
        });
        if counter.expires_at <= now {
            counter.count = 0;
            counter.expires_at = now + ttl;
        }
        counter.count += 1;
        Ok(counter.count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCounterStore;
    use chrono::TimeZone;

    const DAY: Duration = Duration::from_secs(86_400);

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn client(ip: &str) -> ClientIdentity {
        ClientIdentity::new(ip)
    }

    #[tokio::test]
    async fn allows_up_to_limit_then_denies() {
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()), 3, DAY);
        let ip = client("203.0.113.7");

        let remaining: Vec<u32> = {
            let mut out = Vec::new();
            for _ in 0..3 {
                let d = limiter.check_and_consume_at(Some(&ip), at(10)).await.unwrap();
                assert!(d.allowed);
                out.push(d.remaining);
            }
            out
        };
        assert_eq!(remaining, vec![2, 1, 0]);

        let denied = limiter.check_and_consume_at(Some(&ip), at(11)).await.unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.limit, 3);
        assert_eq!(denied.remaining, 0);
    }

    #[tokio::test]
    async fn next_window_starts_fresh() {
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()), 1, DAY);
        let ip = client("203.0.113.7");

        assert!(limiter.check_and_consume_at(Some(&ip), at(23)).await.unwrap().allowed);
        assert!(!limiter.check_and_consume_at(Some(&ip), at(23)).await.unwrap().allowed);

        let tomorrow = at(1) + chrono::Duration::days(1);
        assert!(limiter.check_and_consume_at(Some(&ip), tomorrow).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn identities_are_counted_separately() {
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()), 1, DAY);

        assert!(limiter.check_and_consume_at(Some(&client("10.0.0.1")), at(9)).await.unwrap().allowed);
        assert!(limiter.check_and_consume_at(Some(&client("10.0.0.2")), at(9)).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn reset_is_end_of_fixed_window() {
        let limiter = RateLimiter::new(Arc::new(MemoryCounterStore::new()), 3, DAY);
        let d = limiter
            .check_and_consume_at(Some(&client("10.0.0.1")), at(10))
            .await
            .unwrap();
        assert_eq!(d.reset, Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap());
    }

    #[tokio::test]
    async fn disabled_limiter_allows_everything() {
        let limiter = RateLimiter::disabled();
        assert!(!limiter.is_enabled());
        assert!(limiter.check_and_consume(Some(&client("10.0.0.1"))).await.is_none());
    }

    #[tokio::test]
    async fn missing_identity_fails_open_without_touching_store() {
        let store = Arc::new(MockCounterStore::fixed(99));
        let limiter = RateLimiter::new(store.clone(), 3, DAY);

        assert!(limiter.check_and_consume(None).await.is_none());
        assert_eq!(store.calls(), 0);
    }

    #[tokio::test]
    async fn failing_store_fails_open() {
        let store = Arc::new(MockCounterStore::failing());
        let limiter = RateLimiter::new(store.clone(), 3, DAY);

        assert!(limiter.check_and_consume(Some(&client("10.0.0.1"))).await.is_none());
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_increments_never_share_a_count() {
        let store = Arc::new(MemoryCounterStore::new());
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..25 {
            let store = store.clone();
            tasks.spawn(async move { store.increment("ratelimit:k:1", DAY).await.unwrap() });
        }

        let mut counts = Vec::new();
        while let Some(count) = tasks.join_next().await {
            counts.push(count.unwrap());
        }
        counts.sort_unstable();
        assert_eq!(counts, (1..=25).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn expired_counter_restarts() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.increment("k", Duration::ZERO).await.unwrap(), 1);
        // Zero TTL means the entry is already expired on the next call
        assert_eq!(store.increment("k", Duration::ZERO).await.unwrap(), 1);
        assert_eq!(store.len().await, 1);
    }
}
