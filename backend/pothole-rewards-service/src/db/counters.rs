//! Fixed-window counters backing the submission rate limiter

use crate::clock::Clock;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::Script;
use std::sync::Arc;

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Check-then-increment as one indivisible step.
    ///
    /// Returns `true` (limited) when the live counter for `key` already
    /// reached `limit`; the counter is not incremented in that case.
    /// Otherwise increments, opening a `window_seconds` window on first use.
    async fn hit(&self, key: &str, limit: u32, window_seconds: u64) -> Result<bool>;
}

const MAX_WINDOW_SECONDS: u64 = 31_536_000;

#[derive(Debug, Clone, Copy)]
struct CounterWindow {
    count: u32,
    expires_at: DateTime<Utc>,
}

/// In-process counters keyed in a DashMap; the entry guard makes each hit atomic
pub struct MemoryCounterStore {
    counters: DashMap<String, CounterWindow>,
    clock: Arc<dyn Clock>,
}

impl MemoryCounterStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: DashMap::new(),
            clock,
        }
    }

    /// Drop expired windows
    pub fn purge_expired(&self) {
        let now = self.clock.now();
        self.counters.retain(|_, window| window.expires_at > now);
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn hit(&self, key: &str, limit: u32, window_seconds: u64) -> Result<bool> {
        let now = self.clock.now();
        let window_len = Duration::seconds(window_seconds.min(MAX_WINDOW_SECONDS) as i64);

        let mut window = self
            .counters
            .entry(key.to_string())
            .or_insert(CounterWindow {
                count: 0,
                expires_at: now + window_len,
            });

        if window.expires_at <= now {
            *window = CounterWindow {
                count: 0,
                expires_at: now + window_len,
            };
        }

        if window.count >= limit {
            return Ok(true);
        }

        window.count += 1;
        Ok(false)
    }
}

const HIT_SCRIPT: &str = r#"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
if current >= tonumber(ARGV[1]) then
    return 1
end
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('EXPIRE', KEYS[1], ARGV[2])
end
return 0
"#;

/// Redis counters; the Lua script runs atomically on the server
pub struct RedisCounterStore {
    redis: ConnectionManager,
    script: Script,
    prefix: String,
}

impl RedisCounterStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            script: Script::new(HIT_SCRIPT),
            prefix: "rl".to_string(),
        }
    }

    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self::new(manager))
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn hit(&self, key: &str, limit: u32, window_seconds: u64) -> Result<bool> {
        // ConnectionManager clones share the underlying multiplexed connection
        let mut conn = self.redis.clone();
        let limited: i32 = self
            .script
            .key(format!("{}:{}", self.prefix, key))
            .arg(limit)
            .arg(window_seconds)
            .invoke_async(&mut conn)
            .await?;

        Ok(limited == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[tokio::test]
    async fn test_limit_reached_within_window() {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryCounterStore::new(clock.clone());

        assert!(!store.hit("rep:user:1", 3, 60).await.unwrap());
        assert!(!store.hit("rep:user:1", 3, 60).await.unwrap());
        assert!(!store.hit("rep:user:1", 3, 60).await.unwrap());
        assert!(store.hit("rep:user:1", 3, 60).await.unwrap());
        assert!(store.hit("rep:user:1", 3, 60).await.unwrap());
    }

    #[tokio::test]
    async fn test_window_resets_after_expiry() {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryCounterStore::new(clock.clone());

        for _ in 0..3 {
            store.hit("k", 3, 60).await.unwrap();
        }
        assert!(store.hit("k", 3, 60).await.unwrap());

        clock.advance(Duration::seconds(60));
        assert!(!store.hit("k", 3, 60).await.unwrap());
    }

    #[tokio::test]
    async fn test_limited_calls_do_not_extend_count() {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryCounterStore::new(clock.clone());

        store.hit("k", 1, 60).await.unwrap();
        for _ in 0..5 {
            assert!(store.hit("k", 1, 60).await.unwrap());
        }
        assert_eq!(store.counters.get("k").unwrap().count, 1);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryCounterStore::new(clock);

        store.hit("rep:user:a", 1, 60).await.unwrap();
        assert!(store.hit("rep:user:a", 1, 60).await.unwrap());
        assert!(!store.hit("rep:ip:10.0.0.1", 1, 60).await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired_windows() {
        let clock = Arc::new(ManualClock::default());
        let store = MemoryCounterStore::new(clock.clone());

        store.hit("k", 3, 10).await.unwrap();
        clock.advance(Duration::seconds(11));
        store.purge_expired();
        assert!(store.counters.is_empty());
    }
}
