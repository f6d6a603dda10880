//! Background reclamation of idle rate limit buckets.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time;

use crate::security::rate_limit::RateLimiter;
use crate::security::store::BucketStore;

/// Periodically evicts idle buckets from a set of limiters.
///
/// Correctness of rate limiting never depends on this task; it only bounds
/// memory held for keys that stopped sending traffic.
pub struct EvictionTask {
    limiters: Vec<Arc<RateLimiter>>,
    stores: Vec<Arc<dyn BucketStore>>,
    interval: Duration,
}

impl EvictionTask {
    pub fn new(limiters: Vec<Arc<RateLimiter>>, interval: Duration) -> Self {
        Self {
            limiters,
            stores: Vec::new(),
            interval,
        }
    }

    /// Also sweep `store` on every tick.
    pub fn with_store(mut self, store: Arc<dyn BucketStore>) -> Self {
        self.stores.push(store);
        self
    }

    /// Run until the shutdown signal fires or its sender is dropped.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if self.limiters.is_empty() && self.stores.is_empty() {
            tracing::debug!("Nothing to sweep, eviction task not started");
            return;
        }

        tracing::info!(
            interval_secs = self.interval.as_secs_f64(),
            limiters = self.limiters.len(),
            stores = self.stores.len(),
            "Bucket eviction starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing can be idle yet.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Bucket eviction received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Spawn `run` onto the current runtime.
    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    fn sweep(&self) -> usize {
        let local: usize = self.limiters.iter().map(|limiter| limiter.evict_idle()).sum();
        local + self.stores.iter().map(|store| store.evict_idle()).sum::<usize>()
    }
}
