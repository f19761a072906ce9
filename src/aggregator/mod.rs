//! The aggregator: owns the cache and the flusher, and is itself the
//! single in-process [`Observer`] registered on the fan-out.

mod flusher;

pub use flusher::Flusher;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{error, info};

use crate::cache::AggregationCache;
use crate::domain::UserEvent;
use crate::error::AggregatorError;
use crate::fanout::Observer;
use crate::store::Store;

/// Snapshot of aggregator health, for readiness/observability callers
/// (spec.md's non-goals exclude a query API, not a liveness signal).
///
/// `consumer_running` is supplied by the caller rather than read off a
/// `ConsumerLoop` reference: the aggregator has no handle on the consumer
/// (and shouldn't gain one just for this), so whoever owns both — `main`,
/// or a test — passes the consumer's own running flag in.
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub cache_size: usize,
    pub flush_in_progress: bool,
    pub last_successful_flush: Option<DateTime<Utc>>,
    pub consumer_running: bool,
}

pub struct Aggregator {
    cache: Arc<AggregationCache>,
    flusher: Flusher,
}

impl Aggregator {
    pub fn new(store: Arc<dyn Store>, flush_interval: Duration) -> Self {
        let cache = Arc::new(AggregationCache::new());
        let flusher = Flusher::new(cache.clone(), store, flush_interval);
        Self { cache, flusher }
    }

    /// Start the periodic flush timer. The first tick fires one interval
    /// after this call returns (spec §4.3).
    pub fn start(&self) {
        self.flusher.start();
    }

    /// Run one flush cycle on demand, independent of the periodic timer
    /// and of shutdown. Used by callers (and tests) that want to force a
    /// drain without completing the fan-out.
    pub async fn flush(&self) -> Result<(), AggregatorError> {
        self.flusher.flush().await
    }

    /// Assemble the health snapshot. `consumer_running` is the caller's
    /// view of the consumer loop's liveness (see [`HealthStatus`]).
    pub fn health(&self, consumer_running: bool) -> HealthStatus {
        HealthStatus {
            cache_size: self.cache.size(),
            flush_in_progress: self.flusher.is_flushing(),
            last_successful_flush: self.flusher.last_successful_flush(),
            consumer_running,
        }
    }
}

#[async_trait]
impl Observer for Aggregator {
    async fn on_next(&self, event: &UserEvent) -> Result<(), AggregatorError> {
        self.cache.increment(event.user_id, &event.event_type);
        Ok(())
    }

    async fn on_error(&self, err: &AggregatorError) {
        error!(error = %err, "fan-out reported an error; cache left untouched");
    }

    async fn on_completed(&self) {
        info!("fan-out completed; performing final flush and stopping timer");
        if let Err(e) = self.flusher.flush().await {
            error!(error = %e, "final flush failed during shutdown");
        }
        self.flusher.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests_support::InMemoryStore;
    use chrono::Utc;
    use std::collections::HashMap;

    fn event(user_id: i64, event_type: &str) -> UserEvent {
        UserEvent::new(user_id, event_type, Utc::now(), HashMap::new()).unwrap()
    }

    #[tokio::test]
    async fn on_next_increments_cache_without_touching_store() {
        let store = Arc::new(InMemoryStore::new());
        let aggregator = Aggregator::new(store.clone(), Duration::from_secs(60));
        aggregator.on_next(&event(1, "click")).await.unwrap();
        let health = aggregator.health(true);
        assert_eq!(health.cache_size, 1);
        assert!(health.consumer_running);
        assert!(health.last_successful_flush.is_none());
        assert!(store.get(1, "click").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn on_completed_flushes_and_stops_timer() {
        let store = Arc::new(InMemoryStore::new());
        let aggregator = Aggregator::new(store.clone(), Duration::from_secs(60));
        aggregator.on_next(&event(1, "click")).await.unwrap();
        aggregator.on_completed().await;
        assert_eq!(store.get(1, "click").await.unwrap(), Some(1));
        let health = aggregator.health(false);
        assert_eq!(health.cache_size, 0);
        assert!(health.last_successful_flush.is_some());
        assert!(!health.consumer_running);
    }
}
