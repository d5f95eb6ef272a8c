use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::config::{RateLimitBackend, ServiceConfig};

/// Buckets kept before expired entries are swept from the in-memory map.
const SWEEP_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub current: i64,
}

/// Fixed-window attempt counter keyed by source identifier.
///
/// The first attempt opens a window with count 1; later attempts inside the window increment
/// the count and are allowed while it stays at or under the ceiling.
#[async_trait]
pub trait RateLimiterEngine: Send + Sync {
    async fn check(&self, key: &str) -> Result<RateDecision>;
}

// ---------------- Redis Implementation ----------------

/// Shared counter for multi-instance deployments.
#[derive(Clone)]
pub struct RedisRateLimiter {
    manager: ConnectionManager,
    limit: u32,
    window: Duration,
    prefix: String,
}

impl RedisRateLimiter {
    pub async fn new(redis_url: &str, limit: u32, window: Duration, prefix: String) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let manager = ConnectionManager::new(client)
            .await
            .context("Failed to create Redis connection manager")?;
        Ok(Self { manager, limit, window, prefix })
    }
}

/// Redis `TTL` reply for a key that exists but carries no expiry.
const TTL_NO_EXPIRY: i64 = -1;

/// Any attempt that finds the counter without a TTL re-arms the window, including one whose
/// opening `EXPIRE` was lost.
fn window_needs_expiry(ttl: i64) -> bool {
    ttl == TTL_NO_EXPIRY
}

#[async_trait]
impl RateLimiterEngine for RedisRateLimiter {
    async fn check(&self, key: &str) -> Result<RateDecision> {
        let redis_key = format!("{}:{}", self.prefix, key);
        let mut conn = self.manager.clone();
        let (current, ttl): (i64, i64) = redis::pipe()
            .atomic()
            .incr(&redis_key, 1)
            .ttl(&redis_key)
            .query_async(&mut conn)
            .await?;
        if window_needs_expiry(ttl) {
            let _: () = conn
                .expire(&redis_key, self.window.as_secs().max(1) as i64)
                .await?;
        }
        Ok(RateDecision { allowed: current <= i64::from(self.limit), current })
    }
}

// ---------------- In-Memory Implementation ----------------

#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: i64,
    reset_at: Instant,
}

/// Process-local limiter for single-instance deployments and tests.
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    inner: Arc<Mutex<HashMap<String, Bucket>>>,
    limit: u32,
    window: Duration,
}

impl InMemoryRateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { inner: Arc::new(Mutex::new(HashMap::new())), limit, window }
    }
}

#[async_trait]
impl RateLimiterEngine for InMemoryRateLimiter {
    async fn check(&self, key: &str) -> Result<RateDecision> {
        let mut guard = self.inner.lock().await;
        let now = Instant::now();
        if guard.len() >= SWEEP_THRESHOLD {
            guard.retain(|_, bucket| now <= bucket.reset_at);
        }

        let window = self.window;
        let bucket = guard
            .entry(key.to_string())
            .or_insert(Bucket { count: 0, reset_at: now + window });
        if now > bucket.reset_at {
            *bucket = Bucket { count: 0, reset_at: now + window };
        }
        bucket.count = bucket.count.saturating_add(1);
        let current = bucket.count;
        Ok(RateDecision { allowed: current <= i64::from(self.limit), current })
    }
}

pub async fn build_rate_limiter(config: &ServiceConfig) -> Result<Arc<dyn RateLimiterEngine>> {
    let limit = config.break_glass.max_attempts;
    let window = config.break_glass.window;
    match config.rate_limit_backend {
        RateLimitBackend::Memory => Ok(Arc::new(InMemoryRateLimiter::new(limit, window))),
        RateLimitBackend::Redis => {
            let url = config
                .redis_url
                .as_deref()
                .context("REDIS_URL must be set when RATE_LIMIT_BACKEND=redis")?;
            let limiter =
                RedisRateLimiter::new(url, limit, window, config.rate_limit_prefix.clone()).await?;
            Ok(Arc::new(limiter))
        }
    }
}
