use std::time::Duration;

use alloy::primitives::Address;
use giftrelay_core::error::EngineError;
use redis::aio::ConnectionManager;

use crate::epoch_ms;

const RATE_LIMIT_PREFIX: &str = "rate_limit";

/// Outcome of a rate-limit check. `reset_at_ms` lets a rejected caller
/// compute its own backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at_ms: u64,
}

/// Fixed-window per-user rate limiter backed by the shared Redis store.
///
/// The counter and its expiry are owned by Redis, so every server instance
/// sees the same window. The window resets lazily: the key simply expires
/// and the next INCR starts a fresh one.
#[derive(Clone)]
pub struct RedisRateLimiter {
    redis: ConnectionManager,
    namespace: Option<String>,
    window: Duration,
    max_attempts: u32,
}

impl RedisRateLimiter {
    pub fn new(
        redis: ConnectionManager,
        namespace: Option<String>,
        window: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            redis,
            namespace,
            window,
            max_attempts,
        }
    }

    fn window_key(&self, user: &Address) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}:{RATE_LIMIT_PREFIX}:{user:#x}"),
            None => format!("{RATE_LIMIT_PREFIX}:{user:#x}"),
        }
    }

    /// Count an attempt against the user's current window and decide
    /// whether it is admitted. The increment and window-start expiry are one
    /// atomic script; concurrent requests cannot both observe "first in
    /// window".
    pub async fn admit(&self, user: &Address) -> Result<RateLimitDecision, EngineError> {
        let mut conn = self.redis.clone();

        let script = redis::Script::new(
            r#"
            local key = KEYS[1]
            local window_ms = tonumber(ARGV[1])

            local count = redis.call('INCR', key)
            if count == 1 then
                redis.call('PEXPIRE', key, window_ms)
            end

            local ttl = redis.call('PTTL', key)
            if ttl < 0 then
                -- Key existed without an expiry (e.g. restored from a dump);
                -- re-arm the window rather than rate limiting forever.
                redis.call('PEXPIRE', key, window_ms)
                ttl = window_ms
            end

            return {count, ttl}
            "#,
        );

        let (count, ttl_ms): (u64, u64) = script
            .key(self.window_key(user))
            .arg(self.window.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;

        let decision = Self::decide(self.max_attempts, count, epoch_ms() + ttl_ms);

        if !decision.allowed {
            tracing::warn!(
                user = %user,
                count,
                reset_at_ms = decision.reset_at_ms,
                "rate limit exceeded"
            );
        }

        Ok(decision)
    }

    fn decide(max_attempts: u32, count: u64, reset_at_ms: u64) -> RateLimitDecision {
        RateLimitDecision {
            allowed: count <= max_attempts as u64,
            remaining: (max_attempts as u64).saturating_sub(count) as u32,
            reset_at_ms,
        }
    }
}
