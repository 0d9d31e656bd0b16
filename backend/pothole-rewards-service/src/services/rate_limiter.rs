use crate::config::RateLimitConfig;
use crate::db::CounterStore;
use crate::error::{Result, RewardsError};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use uuid::Uuid;

/// Fixed-window limiter over an atomic counter store
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    /// Returns true when `key` has used up `limit` calls in the current window.
    ///
    /// A slow or failing counter store lets the call through rather than
    /// blocking submissions.
    pub async fn is_limited(&self, key: &str, limit: u32, window_seconds: u64) -> bool {
        let budget = Duration::from_millis(self.config.store_timeout_ms);

        match timeout(budget, self.store.hit(key, limit, window_seconds)).await {
            Ok(Ok(limited)) => limited,
            Ok(Err(e)) => {
                tracing::warn!(key = %key, "Rate limit store error (allowing request): {}", e);
                false
            }
            Err(_) => {
                tracing::warn!(
                    key = %key,
                    "Rate limit store timeout ({}ms, allowing request)",
                    self.config.store_timeout_ms
                );
                false
            }
        }
    }

    /// Per-user then per-IP submission throttle
    pub async fn check_submission(&self, user_id: Uuid, client_ip: Option<&str>) -> Result<()> {
        let window = self.config.window_seconds;

        if self
            .is_limited(&format!("rep:user:{}", user_id), self.config.user_limit, window)
            .await
        {
            return Err(RewardsError::RateLimited(
                "Too many reports. Slow down.".to_string(),
            ));
        }

        if let Some(ip) = client_ip {
            if self
                .is_limited(&format!("rep:ip:{}", ip), self.config.ip_limit, window)
                .await
            {
                return Err(RewardsError::RateLimited(
                    "Too many reports from this IP.".to_string(),
                ));
            }
        }

        Ok(())
    }
}
