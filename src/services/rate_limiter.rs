//! Sliding-window rate limiting.
//!
//! Each identifier keeps a log of request timestamps for the policy window.
//! A request is admitted while fewer than `limit` timestamps remain in the
//! window; rejected requests are not logged. Counters live in Redis in
//! production and in process memory for local runs and tests.

use anyhow::{Context, Result};
use axum::{
    async_trait,
    http::{header::RETRY_AFTER, HeaderName, HeaderValue},
    response::{IntoResponseParts, ResponseParts},
};
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// Distinct keys tracked by the in-memory store before stale entries are swept
const MEMORY_SWEEP_THRESHOLD: usize = 10_000;

/// A named quota over a window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub name: &'static str,
    pub limit: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    /// Public intake form submissions, keyed by IP
    pub const INTAKE: Self = Self::new("intake", 5, Duration::from_secs(60));
    /// Intake photo presigns, keyed by IP. Two per attachable photo.
    pub const INTAKE_UPLOAD: Self = Self::new("intake_upload", 20, Duration::from_secs(60));
    /// AI analysis and estimate generation, keyed by user
    pub const AI: Self = Self::new("ai", 10, Duration::from_secs(3600));
    /// Authenticated mutations, keyed by user
    pub const API: Self = Self::new("api", 100, Duration::from_secs(60));
    /// Checkout sessions and public estimate actions, keyed by IP
    pub const CHECKOUT: Self = Self::new("checkout", 10, Duration::from_secs(60));

    pub const fn new(name: &'static str, limit: u32, window: Duration) -> Self {
        Self {
            name,
            limit,
            window,
        }
    }

    pub fn key(&self, identifier: &str) -> String {
        format!("ratelimit:{}:{}", self.name, identifier)
    }

    fn window_ms(&self) -> u64 {
        self.window.as_millis() as u64
    }
}

/// Outcome of one limiter consultation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub success: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix time (ms) when the oldest counted request leaves the window
    pub reset_ms: u64,
}

impl RateLimitDecision {
    /// Decision used when the store is unreachable
    fn fail_open(policy: &RateLimitPolicy, now_ms: u64) -> Self {
        Self {
            success: true,
            limit: policy.limit,
            remaining: policy.limit,
            reset_ms: now_ms + policy.window_ms(),
        }
    }

    /// Whole seconds until a retry can succeed, never less than one
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        let wait_ms = self.reset_ms.saturating_sub(now_ms);
        wait_ms.div_ceil(1000).max(1)
    }
}

fn header_value(value: u64) -> HeaderValue {
    HeaderValue::from_str(&value.to_string()).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

impl IntoResponseParts for RateLimitDecision {
    type Error = Infallible;

    fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        let headers = res.headers_mut();
        headers.insert(
            HeaderName::from_static(X_RATELIMIT_LIMIT),
            header_value(self.limit as u64),
        );
        headers.insert(
            HeaderName::from_static(X_RATELIMIT_REMAINING),
            header_value(self.remaining as u64),
        );
        headers.insert(
            HeaderName::from_static(X_RATELIMIT_RESET),
            header_value(self.reset_ms.div_ceil(1000)),
        );
        if !self.success {
            headers.insert(RETRY_AFTER, header_value(self.retry_after_secs(now_ms())));
        }
        Ok(res)
    }
}

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Backing store for request logs
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn hit(&self, key: &str, policy: &RateLimitPolicy, now_ms: u64)
        -> Result<RateLimitDecision>;

    async fn health_check(&self) -> Result<()>;
}

/// Rate limiter shared through application state
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryRateLimitStore::default()))
    }

    /// Record a request. Store failures admit the request.
    pub async fn check(&self, policy: &RateLimitPolicy, identifier: &str) -> RateLimitDecision {
        let now = now_ms();
        let key = policy.key(identifier);
        match self.store.hit(&key, policy, now).await {
            Ok(decision) => {
                debug!(
                    key = %key,
                    allowed = decision.success,
                    remaining = decision.remaining,
                    "Rate limit consulted"
                );
                decision
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Rate limit store unavailable - allowing request");
                RateLimitDecision::fail_open(policy, now)
            }
        }
    }

    /// Record a request and reject with 429 once the quota is spent
    pub async fn enforce(
        &self,
        policy: &RateLimitPolicy,
        identifier: &str,
    ) -> ApiResult<RateLimitDecision> {
        let decision = self.check(policy, identifier).await;
        if decision.success {
            Ok(decision)
        } else {
            Err(ApiError::RateLimited(decision))
        }
    }

    pub async fn health_check(&self) -> Result<()> {
        self.store.health_check().await
    }
}

// =============================================================================
// Redis store
// =============================================================================

/// Trims the window, admits when under quota, and reports the oldest entry.
/// Returns `{allowed, count, reset_ms}`.
const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local now = tonumber(ARGV[1])
local window = tonumber(ARGV[2])
local limit = tonumber(ARGV[3])
local member = ARGV[4]

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
local allowed = 0
if count < limit then
  redis.call('ZADD', key, now, member)
  count = count + 1
  allowed = 1
end
redis.call('PEXPIRE', key, window)

local reset = now + window
local oldest = redis.call('ZRANGE', key, 0, 0, 'WITHSCORES')
if oldest[2] then
  reset = tonumber(oldest[2]) + window
end
return {allowed, count, reset}
"#;

#[derive(Clone)]
pub struct RedisRateLimitStore {
    conn: ConnectionManager,
    script: Arc<redis::Script>,
}

impl RedisRateLimitStore {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        tracing::info!("Redis rate-limit store connected");

        Ok(Self {
            conn,
            script: Arc::new(redis::Script::new(SLIDING_WINDOW_SCRIPT)),
        })
    }
}

#[async_trait]
impl RateLimitStore for RedisRateLimitStore {
    async fn hit(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
        now_ms: u64,
    ) -> Result<RateLimitDecision> {
        let mut conn = self.conn.clone();
        let member = format!("{}-{}", now_ms, Uuid::new_v4());

        let (allowed, count, reset): (i64, i64, i64) = self
            .script
            .key(key)
            .arg(now_ms)
            .arg(policy.window_ms())
            .arg(policy.limit)
            .arg(member)
            .invoke_async(&mut conn)
            .await
            .context("Rate limit script failed")?;

        Ok(RateLimitDecision {
            success: allowed == 1,
            limit: policy.limit,
            remaining: (policy.limit as i64 - count).max(0) as u32,
            reset_ms: reset.max(0) as u64,
        })
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis health check failed")?;
        Ok(())
    }
}

// =============================================================================
// In-memory store
// =============================================================================

#[derive(Default)]
pub struct MemoryRateLimitStore {
    requests: Mutex<HashMap<String, HitLog>>,
}

/// Timestamps counted for one key, with the window they were counted in
#[derive(Debug, Default)]
struct HitLog {
    window_ms: u64,
    hits: VecDeque<u64>,
}

impl HitLog {
    fn is_expired(&self, now_ms: u64) -> bool {
        self.hits
            .back()
            .map_or(true, |ts| ts + self.window_ms <= now_ms)
    }
}

impl MemoryRateLimitStore {
    fn decide(log: &mut HitLog, policy: &RateLimitPolicy, now_ms: u64) -> RateLimitDecision {
        let window = policy.window_ms();
        log.window_ms = window;
        while log.hits.front().is_some_and(|ts| ts + window <= now_ms) {
            log.hits.pop_front();
        }

        let success = (log.hits.len() as u64) < policy.limit as u64;
        if success {
            log.hits.push_back(now_ms);
        }

        let reset_ms = log
            .hits
            .front()
            .map(|ts| ts + window)
            .unwrap_or(now_ms + window);
        RateLimitDecision {
            success,
            limit: policy.limit,
            remaining: policy.limit.saturating_sub(log.hits.len() as u32),
            reset_ms,
        }
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn hit(
        &self,
        key: &str,
        policy: &RateLimitPolicy,
        now_ms: u64,
    ) -> Result<RateLimitDecision> {
        let mut requests = self.requests.lock();

        if requests.len() >= MEMORY_SWEEP_THRESHOLD && !requests.contains_key(key) {
            requests.retain(|_, log| !log.is_expired(now_ms));
        }

        let log = requests.entry(key.to_string()).or_default();
        Ok(Self::decide(log, policy, now_ms))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICY: RateLimitPolicy = RateLimitPolicy::new("test", 3, Duration::from_secs(60));

    #[tokio::test]
    async fn rejects_request_over_quota() {
        let store = MemoryRateLimitStore::default();
        let start = 1_700_000_000_000;

        for (i, expected_remaining) in [2, 1, 0].into_iter().enumerate() {
            let decision = store
                .hit("ratelimit:test:ip:1.2.3.4", &POLICY, start + i as u64)
                .await
                .unwrap();
            assert!(decision.success);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let rejected = store
            .hit("ratelimit:test:ip:1.2.3.4", &POLICY, start + 10)
            .await
            .unwrap();
        assert!(!rejected.success);
        assert_eq!(rejected.remaining, 0);
        // Oldest counted request leaves the window 60s after it was made
        assert_eq!(rejected.reset_ms, start + 60_000);
        assert_eq!(rejected.retry_after_secs(start + 10), 60);
    }

    #[tokio::test]
    async fn window_slides_past_oldest_request() {
        let store = MemoryRateLimitStore::default();
        let start = 1_700_000_000_000;
        for i in 0..3 {
            store.hit("k", &POLICY, start + i * 1000).await.unwrap();
        }
        assert!(!store.hit("k", &POLICY, start + 30_000).await.unwrap().success);

        // First request expires, one slot frees up
        let decision = store.hit("k", &POLICY, start + 60_000).await.unwrap();
        assert!(decision.success);
        assert_eq!(decision.remaining, 0);
        assert!(!store.hit("k", &POLICY, start + 60_001).await.unwrap().success);
    }

    #[tokio::test]
    async fn identifiers_are_isolated() {
        let store = MemoryRateLimitStore::default();
        for _ in 0..3 {
            store.hit("a", &POLICY, 1_000).await.unwrap();
        }
        assert!(!store.hit("a", &POLICY, 1_001).await.unwrap().success);
        assert!(store.hit("b", &POLICY, 1_001).await.unwrap().success);
    }

    #[tokio::test]
    async fn rejected_requests_do_not_extend_the_window() {
        let store = MemoryRateLimitStore::default();
        for _ in 0..3 {
            store.hit("k", &POLICY, 0).await.unwrap();
        }
        for t in 1..20 {
            assert!(!store.hit("k", &POLICY, t * 1000).await.unwrap().success);
        }
        assert!(store.hit("k", &POLICY, 60_000).await.unwrap().success);
    }

    #[tokio::test]
    async fn sweep_keeps_logs_inside_their_own_window() {
        let store = MemoryRateLimitStore::default();
        let start = 1_700_000_000_000;
        let ai_key = RateLimitPolicy::AI.key("user:u1");

        for _ in 0..RateLimitPolicy::AI.limit {
            assert!(store.hit(&ai_key, &RateLimitPolicy::AI, start).await.unwrap().success);
        }
        assert!(!store.hit(&ai_key, &RateLimitPolicy::AI, start).await.unwrap().success);

        // Enough short-window keys to trigger a sweep two minutes later
        for i in 0..MEMORY_SWEEP_THRESHOLD {
            let key = RateLimitPolicy::API.key(&format!("ip:{}", i));
            store.hit(&key, &RateLimitPolicy::API, start + 100_000).await.unwrap();
        }
        store
            .hit("ratelimit:api:ip:fresh", &RateLimitPolicy::API, start + 120_000)
            .await
            .unwrap();

        let decision = store
            .hit(&ai_key, &RateLimitPolicy::AI, start + 120_000)
            .await
            .unwrap();
        assert!(!decision.success);
        assert_eq!(decision.reset_ms, start + 3_600_000);
    }

    #[tokio::test]
    async fn sweep_drops_expired_logs() {
        let store = MemoryRateLimitStore::default();
        let start = 1_700_000_000_000;
        for i in 0..MEMORY_SWEEP_THRESHOLD {
            store.hit(&format!("k{}", i), &POLICY, start).await.unwrap();
        }
        store.hit("late", &POLICY, start + 60_000).await.unwrap();
        assert_eq!(store.requests.lock().len(), 1);
    }

    #[tokio::test]
    async fn enforce_returns_rate_limited_error() {
        let limiter = RateLimiter::in_memory();
        let policy = RateLimitPolicy::new("enforce", 1, Duration::from_secs(30));
        assert!(limiter.enforce(&policy, "ip:9.9.9.9").await.is_ok());
        let err = limiter.enforce(&policy, "ip:9.9.9.9").await.unwrap_err();
        assert_eq!(err.status_code(), axum::http::StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn retry_after_is_at_least_one_second() {
        let decision = RateLimitDecision {
            success: false,
            limit: 1,
            remaining: 0,
            reset_ms: 5_000,
        };
        assert_eq!(decision.retry_after_secs(5_000), 1);
        assert_eq!(decision.retry_after_secs(9_000), 1);
        assert_eq!(decision.retry_after_secs(3_500), 2);
    }

    #[test]
    fn policy_keys_are_namespaced() {
        assert_eq!(
            RateLimitPolicy::INTAKE.key("ip:10.0.0.1"),
            "ratelimit:intake:ip:10.0.0.1"
        );
    }
}
