//! Coarse per-IP rate limiting
//!
//! Token bucket per client IP: 60 requests per 60-second window by default.
//! Buckets refill continuously; stale buckets are swept probabilistically so
//! the map stays bounded without a background task.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Rate limiter tuning.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Requests allowed per window (also the bucket capacity).
    pub max_requests: u32,
    /// Window the allowance is spread over.
    pub window: Duration,
    /// Sweep stale buckets every N checks.
    pub sweep_every: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 60,
            window: Duration::from_secs(60),
            sweep_every: 100,
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
struct Inner {
    buckets: HashMap<IpAddr, Bucket>,
    checks: u64,
}

/// Token-bucket limiter keyed by client IP.
#[derive(Debug)]
pub struct IpRateLimiter {
    config: RateLimitConfig,
    inner: Mutex<Inner>,
}

impl IpRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                buckets: HashMap::new(),
                checks: 0,
            }),
        }
    }

    /// Take one token for `ip`. Returns `false` when the bucket is empty.
    pub fn allow(&self, ip: IpAddr) -> bool {
        let mut inner = self.lock();
        let now = Instant::now();

        inner.checks += 1;
        if inner.checks % self.config.sweep_every == 0 {
            // Anything idle for two windows has fully refilled; drop it.
            let stale_after = self.config.window * 2;
            inner
                .buckets
                .retain(|_, b| now.duration_since(b.last_refill) < stale_after);
        }

        let capacity = f64::from(self.config.max_requests);
        let refill_per_sec = capacity / self.config.window.as_secs_f64();

        let bucket = inner.buckets.entry(ip).or_insert(Bucket {
            tokens: capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * refill_per_sec).min(capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn tracked_ips(&self) -> usize {
        self.lock().buckets.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for IpRateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

/// Pick the client IP: left-most `x-forwarded-for` entry when present,
/// otherwise the socket peer address.
pub fn client_ip(forwarded_for: Option<&str>, peer: Option<IpAddr>) -> Option<IpAddr> {
    if let Some(header) = forwarded_for {
        if let Some(first) = header.split(',').next() {
            if let Ok(ip) = first.trim().parse() {
                return Some(ip);
            }
        }
    }
    peer
}
