//! Per-key token bucket rate limiting.
//!
//! # Design Decisions
//! - Token bucket rather than fixed window: no 2x burst across a window edge
//! - O(1) per check; eviction only reclaims memory
//! - Map lock covers lookup/insert only, refill runs under the bucket's own lock
//! - Denial is a normal `Decision`, never an error

use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::observability::metrics;
use crate::security::clock::{Clock, SystemClock};

/// Caller-supplied identity that partitions quota.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct RateLimitKey(String);

impl RateLimitKey {
    pub fn new(identity: impl Into<String>) -> Self {
        Self(identity.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RateLimitKey {
    fn from(identity: &str) -> Self {
        Self::new(identity)
    }
}

impl From<String> for RateLimitKey {
    fn from(identity: String) -> Self {
        Self(identity)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum PolicyError {
    #[error("capacity must be a finite number of at least 1, got {0}")]
    InvalidCapacity(f64),
    #[error("refill rate must be a finite positive number, got {0}")]
    InvalidRefillRate(f64),
}

/// Bucket size and refill speed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitPolicy {
    capacity: f64,
    refill_per_sec: f64,
}

impl RateLimitPolicy {
    pub fn new(capacity: f64, refill_per_sec: f64) -> Result<Self, PolicyError> {
        if !capacity.is_finite() || capacity < 1.0 {
            return Err(PolicyError::InvalidCapacity(capacity));
        }
        if !refill_per_sec.is_finite() || refill_per_sec <= 0.0 {
            return Err(PolicyError::InvalidRefillRate(refill_per_sec));
        }
        Ok(Self {
            capacity,
            refill_per_sec,
        })
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn refill_per_sec(&self) -> f64 {
        self.refill_per_sec
    }

    /// Time for an empty bucket to refill completely.
    pub fn time_to_full(&self) -> Duration {
        seconds(self.capacity / self.refill_per_sec)
    }

    fn idle_after(&self, multiplier: u32) -> Duration {
        self.time_to_full()
            .checked_mul(multiplier.max(1))
            .unwrap_or(Duration::MAX)
    }
}

fn seconds(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Result of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub allowed: bool,
    /// Whole tokens left after this decision.
    pub remaining: u32,
    /// `None` on allow, and on deny when the cost exceeds capacity.
    pub retry_after: Option<Duration>,
}

impl Decision {
    pub fn allow(remaining: u32) -> Self {
        Self {
            allowed: true,
            remaining,
            retry_after: None,
        }
    }

    pub fn deny(remaining: u32, retry_after: Option<Duration>) -> Self {
        Self {
            allowed: false,
            remaining,
            retry_after,
        }
    }
}

/// Token bucket state for one key.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    /// A full bucket.
    pub fn new(policy: &RateLimitPolicy, now: Instant) -> Self {
        Self {
            tokens: policy.capacity,
            last_update: now,
        }
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    pub fn last_update(&self) -> Instant {
        self.last_update
    }

    fn refill(&mut self, policy: &RateLimitPolicy, now: Instant) {
        // Readings behind last_update count as zero elapsed time.
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.tokens = (self.tokens + elapsed * policy.refill_per_sec).min(policy.capacity);
        if now > self.last_update {
            self.last_update = now;
        }
    }

    /// Refill, then debit `cost` if enough tokens are available.
    pub fn try_acquire(&mut self, policy: &RateLimitPolicy, cost: u32, now: Instant) -> Decision {
        self.refill(policy, now);

        let cost = f64::from(cost);
        if self.tokens >= cost {
            self.tokens = (self.tokens - cost).max(0.0);
            return Decision::allow(self.tokens.floor() as u32);
        }

        let retry_after = if cost > policy.capacity {
            None
        } else {
            Some(seconds((cost - self.tokens) / policy.refill_per_sec))
        };
        Decision::deny(self.tokens.floor() as u32, retry_after)
    }

    fn is_idle(&self, now: Instant, idle_after: Duration) -> bool {
        now.saturating_duration_since(self.last_update) > idle_after
    }
}

/// Default multiple of the full-refill time after which a bucket is idle.
pub const DEFAULT_IDLE_MULTIPLIER: u32 = 10;

/// In-process token bucket limiter, one bucket per key.
pub struct RateLimiter {
    name: String,
    policy: RateLimitPolicy,
    buckets: DashMap<RateLimitKey, Arc<Mutex<TokenBucket>>>,
    clock: Arc<dyn Clock>,
    idle_after: Duration,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, policy: RateLimitPolicy) -> Self {
        Self::with_clock(name, policy, Arc::new(SystemClock))
    }

    pub fn with_clock(
        name: impl Into<String>,
        policy: RateLimitPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name: name.into(),
            policy,
            buckets: DashMap::new(),
            clock,
            idle_after: policy.idle_after(DEFAULT_IDLE_MULTIPLIER),
        }
    }

    /// Override how many full-refill periods a bucket may sit untouched
    /// before `evict_idle` reclaims it.
    pub fn idle_multiplier(mut self, multiplier: u32) -> Self {
        self.idle_after = self.policy.idle_after(multiplier);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    pub fn allow_one(&self, key: &RateLimitKey) -> Decision {
        self.allow(key, 1)
    }

    /// Check and, if allowed, debit `cost` tokens from `key`'s bucket.
    pub fn allow(&self, key: &RateLimitKey, cost: u32) -> Decision {
        let decision = self.decide(key, cost);

        metrics::record_decision(&self.name, decision.allowed);
        // Denials are logged at warn by the gateway, which owns the rejection.
        tracing::debug!(
            limiter = %self.name,
            key = %key,
            allowed = decision.allowed,
            remaining = decision.remaining,
            retry_after_ms = decision.retry_after.map(|d| d.as_millis() as u64),
            "Rate limit decision"
        );
        decision
    }

    /// As `allow`, without recording metrics or logging. For store
    /// implementations whose caller records the decision itself.
    pub(crate) fn decide(&self, key: &RateLimitKey, cost: u32) -> Decision {
        if cost == 0 {
            return Decision::allow(self.peek_remaining(key));
        }

        // Clone the bucket handle so the shard lock is released before the
        // refill arithmetic runs.
        let bucket = {
            let entry = self.buckets.entry(key.clone()).or_insert_with(|| {
                tracing::debug!(limiter = %self.name, key = %key, "Creating rate limit bucket");
                Arc::new(Mutex::new(TokenBucket::new(&self.policy, self.clock.now())))
            });
            Arc::clone(entry.value())
        };

        let mut bucket = bucket.lock().unwrap_or_else(|e| e.into_inner());
        bucket.try_acquire(&self.policy, cost, self.clock.now())
    }

    fn peek_remaining(&self, key: &RateLimitKey) -> u32 {
        let bucket = self.buckets.get(key).map(|entry| Arc::clone(entry.value()));
        match bucket {
            Some(bucket) => {
                let mut bucket = bucket.lock().unwrap_or_else(|e| e.into_inner());
                bucket.refill(&self.policy, self.clock.now());
                bucket.tokens.floor() as u32
            }
            None => self.policy.capacity.floor() as u32,
        }
    }

    /// Remove buckets idle past the configured threshold.
    ///
    /// A bucket whose handle is held by an in-flight check, or whose lock is
    /// taken, is kept regardless of age.
    pub fn evict_idle(&self) -> usize {
        let now = self.clock.now();
        let before = self.buckets.len();

        self.buckets.retain(|_, bucket| {
            if Arc::strong_count(bucket) > 1 {
                return true;
            }
            match bucket.try_lock() {
                Ok(state) => !state.is_idle(now, self.idle_after),
                Err(_) => true,
            }
        });

        let evicted = before.saturating_sub(self.buckets.len());
        if evicted > 0 {
            tracing::debug!(
                limiter = %self.name,
                evicted,
                remaining = self.buckets.len(),
                "Evicted idle buckets"
            );
        }
        metrics::record_evicted(&self.name, evicted, self.buckets.len());
        evicted
    }

    /// Number of keys currently tracked.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

impl fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("buckets", &self.buckets.len())
            .finish()
    }
}
