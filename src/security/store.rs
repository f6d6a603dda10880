//! Rate limit state held outside the process.
//!
//! # Responsibilities
//! - Define the port a multi-instance deployment implements (`BucketStore`)
//! - Bound every store call with an explicit timeout
//! - Resolve store failures to allow or deny per configured policy
//!
//! # Design Decisions
//! - The store call is the only suspension point in the guard path
//! - The store performs refill and debit atomically; a caller dropped
//!   mid-call cannot leave a half-applied debit on this side
//! - Fail closed by default

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::observability::metrics;
use crate::security::clock::{Clock, SystemClock};
use crate::security::rate_limit::{Decision, RateLimitKey, RateLimitPolicy, RateLimiter};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("rate limit store did not answer within {0:?}")]
    Timeout(Duration),
    #[error("rate limit store unavailable: {0}")]
    Unavailable(String),
}

/// What to do when the store cannot be reached in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Allow the request; availability over the limit.
    FailOpen,
    /// Deny the request; the limit over availability.
    #[default]
    FailClosed,
}

impl FailurePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            FailurePolicy::FailOpen => "fail_open",
            FailurePolicy::FailClosed => "fail_closed",
        }
    }
}

/// Token bucket state shared between instances.
///
/// Implementations must refill and debit atomically per key.
#[async_trait]
pub trait BucketStore: Send + Sync {
    async fn take(
        &self,
        channel: &str,
        key: &RateLimitKey,
        cost: u32,
        policy: &RateLimitPolicy,
    ) -> Result<Decision, StoreError>;

    /// Drop idle buckets held in this process, returning how many went.
    /// Remote stores expire keys on their own and keep the default.
    fn evict_idle(&self) -> usize {
        0
    }
}

/// `BucketStore` over in-process limiters, one per channel.
pub struct InMemoryStore {
    limiters: DashMap<String, Arc<RateLimiter>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            limiters: DashMap::new(),
            clock,
        }
    }

    /// Buckets held across every channel.
    pub fn bucket_count(&self) -> usize {
        self.limiters.iter().map(|e| e.value().bucket_count()).sum()
    }

    fn limiter(&self, channel: &str, policy: &RateLimitPolicy) -> Arc<RateLimiter> {
        let entry = self.limiters.entry(channel.to_string()).or_insert_with(|| {
            Arc::new(RateLimiter::with_clock(channel, *policy, Arc::clone(&self.clock)))
        });
        Arc::clone(entry.value())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BucketStore for InMemoryStore {
    async fn take(
        &self,
        channel: &str,
        key: &RateLimitKey,
        cost: u32,
        policy: &RateLimitPolicy,
    ) -> Result<Decision, StoreError> {
        Ok(self.limiter(channel, policy).decide(key, cost))
    }

    fn evict_idle(&self) -> usize {
        let limiters: Vec<_> = self.limiters.iter().map(|e| Arc::clone(e.value())).collect();
        limiters.iter().map(|limiter| limiter.evict_idle()).sum()
    }
}

/// Limiter whose buckets live in a `BucketStore`.
#[derive(Clone)]
pub struct StoreBackedLimiter {
    channel: String,
    policy: RateLimitPolicy,
    store: Arc<dyn BucketStore>,
    timeout: Duration,
    on_failure: FailurePolicy,
}

impl StoreBackedLimiter {
    pub fn new(
        channel: impl Into<String>,
        policy: RateLimitPolicy,
        store: Arc<dyn BucketStore>,
        timeout: Duration,
        on_failure: FailurePolicy,
    ) -> Self {
        Self {
            channel: channel.into(),
            policy,
            store,
            timeout,
            on_failure,
        }
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.on_failure
    }

    /// Ask the store for a decision.
    ///
    /// Returns `Err` only when the store failed and the policy is fail-closed.
    pub async fn allow(&self, key: &RateLimitKey, cost: u32) -> Result<Decision, StoreError> {
        let result = match tokio::time::timeout(
            self.timeout,
            self.store.take(&self.channel, key, cost, &self.policy),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(self.timeout)),
        };

        match result {
            Ok(decision) => {
                metrics::record_decision(&self.channel, decision.allowed);
                Ok(decision)
            }
            Err(error) => {
                tracing::warn!(
                    channel = %self.channel,
                    policy = self.on_failure.as_str(),
                    error = %error,
                    "Rate limit store failure"
                );
                metrics::record_store_failure(&self.channel, self.on_failure.as_str());
                match self.on_failure {
                    FailurePolicy::FailOpen => Ok(Decision::allow(0)),
                    FailurePolicy::FailClosed => Err(error),
                }
            }
        }
    }
}

/// The limiter a channel is configured with.
#[derive(Clone)]
pub enum ChannelLimiter {
    Local(Arc<RateLimiter>),
    Shared(StoreBackedLimiter),
}

impl ChannelLimiter {
    pub async fn allow(&self, key: &RateLimitKey, cost: u32) -> Result<Decision, StoreError> {
        match self {
            ChannelLimiter::Local(limiter) => Ok(limiter.allow(key, cost)),
            ChannelLimiter::Shared(limiter) => limiter.allow(key, cost).await,
        }
    }
}
