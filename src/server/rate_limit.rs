//! Token-bucket rate limiter (C3).
//!
//! `check_and_consume` performs check-then-consume under one lock per key (I8),
//! closing the TOCTOU gap a naive check-then-consume-in-two-calls API would leave.

use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_second: f64,
    pub burst_capacity: f64,
    pub per_minute_limit: Option<u32>,
    pub cooldown: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: 10.0,
            burst_capacity: 20.0,
            per_minute_limit: Some(300),
            cooldown: Duration::from_secs(1),
        }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
    window_start: Instant,
    window_count: u32,
    blocked_until: Option<Instant>,
}

impl BucketState {
    fn new(capacity: f64) -> Self {
        let now = Instant::now();
        Self { tokens: capacity, last_refill: now, window_start: now, window_count: 0, blocked_until: None }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub retry_after: Option<f64>,
}

/// Per-client (and optionally per-(client, tool)) token bucket limiter.
pub struct RateLimiter {
    config: RateLimitConfig,
    tool_configs: DashMap<String, RateLimitConfig>,
    buckets: DashMap<String, parking_lot::Mutex<BucketState>>,
    enabled: bool,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self { config, tool_configs: DashMap::new(), buckets: DashMap::new(), enabled: true }
    }

    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::new(RateLimitConfig::default()) }
    }

    pub fn set_tool_limit(&self, tool: impl Into<String>, config: RateLimitConfig) {
        self.tool_configs.insert(tool.into(), config);
    }

    fn key(client: &str, tool: Option<&str>) -> String {
        match tool {
            Some(t) => format!("{client}::{t}"),
            None => client.to_string(),
        }
    }

    /// Atomically check availability and consume one token if allowed (I5, I8).
    pub fn check_and_consume(&self, client: &str, tool: Option<&str>) -> RateLimitDecision {
        if !self.enabled {
            return RateLimitDecision { allowed: true, retry_after: None };
        }
        let config = tool
            .and_then(|t| self.tool_configs.get(t).map(|c| c.clone()))
            .unwrap_or_else(|| self.config.clone());
        let key = Self::key(client, tool);
        let entry = self
            .buckets
            .entry(key)
            .or_insert_with(|| parking_lot::Mutex::new(BucketState::new(config.burst_capacity)));
        let mut state = entry.lock();
        let now = Instant::now();

        if let Some(blocked_until) = state.blocked_until {
            if now < blocked_until {
                return RateLimitDecision {
                    allowed: false,
                    retry_after: Some((blocked_until - now).as_secs_f64()),
                };
            }
            state.blocked_until = None;
        }

        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * config.requests_per_second).min(config.burst_capacity);
        state.last_refill = now;

        if now.duration_since(state.window_start) >= Duration::from_secs(60) {
            state.window_start = now;
            state.window_count = 0;
        }

        if state.tokens < 1.0 {
            state.blocked_until = Some(now + config.cooldown);
            return RateLimitDecision { allowed: false, retry_after: Some(config.cooldown.as_secs_f64()) };
        }

        if let Some(limit) = config.per_minute_limit {
            if state.window_count >= limit {
                let retry_after = (Duration::from_secs(60) - now.duration_since(state.window_start)).as_secs_f64();
                return RateLimitDecision { allowed: false, retry_after: Some(retry_after.max(0.0)) };
            }
        }

        state.tokens -= 1.0;
        state.window_count += 1;
        RateLimitDecision { allowed: true, retry_after: None }
    }

    pub fn reset(&self, client: &str) {
        self.buckets.remove(client);
    }

    pub fn tokens_remaining(&self, client: &str) -> Option<f64> {
        self.buckets.get(client).map(|e| e.lock().tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhausts_burst_then_recovers_after_cooldown() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_second: 1000.0,
            burst_capacity: 1.0,
            per_minute_limit: None,
            cooldown: Duration::from_millis(10),
        });
        let first = limiter.check_and_consume("c1", None);
        assert!(first.allowed);
        let second = limiter.check_and_consume("c1", None);
        assert!(!second.allowed);
        assert!(second.retry_after.unwrap() > 0.0);
    }

    #[test]
    fn reset_restores_full_capacity() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_second: 0.0,
            burst_capacity: 1.0,
            per_minute_limit: None,
            cooldown: Duration::from_secs(60),
        });
        assert!(limiter.check_and_consume("c1", None).allowed);
        assert!(!limiter.check_and_consume("c1", None).allowed);
        limiter.reset("c1");
        assert!(limiter.check_and_consume("c1", None).allowed);
    }

    #[test]
    fn disabled_limiter_always_allows() {
        let limiter = RateLimiter::disabled();
        for _ in 0..100 {
            assert!(limiter.check_and_consume("c1", None).allowed);
        }
    }

    #[test]
    fn per_tool_limit_is_independent_of_client_limit() {
        let limiter = RateLimiter::new(RateLimitConfig {
            requests_per_second: 1000.0,
            burst_capacity: 100.0,
            per_minute_limit: None,
            cooldown: Duration::from_millis(1),
        });
        limiter.set_tool_limit(
            "danger",
            RateLimitConfig { requests_per_second: 0.0, burst_capacity: 1.0, per_minute_limit: None, cooldown: Duration::from_secs(60) },
        );
        assert!(limiter.check_and_consume("c1", Some("danger")).allowed);
        assert!(!limiter.check_and_consume("c1", Some("danger")).allowed);
        assert!(limiter.check_and_consume("c1", None).allowed);
    }
}
