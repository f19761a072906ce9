//! Periodic drain-and-store cycle. A recurring `tokio::time::interval`
//! tick guarded by a single-permit `tokio::sync::Mutex` — the "timer +
//! mutex" design note in §9: re-entrant ticks wait for the in-progress
//! flush rather than skip it, so sustained back-pressure still
//! eventually flushes everything.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::cache::AggregationCache;
use crate::error::AggregatorResult;
use crate::store::Store;

pub struct Flusher {
    cache: Arc<AggregationCache>,
    store: Arc<dyn Store>,
    interval: Duration,
    flush_guard: Arc<Mutex<()>>,
    flushing: Arc<AtomicBool>,
    last_success: Arc<StdMutex<Option<DateTime<Utc>>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Flusher {
    pub fn new(cache: Arc<AggregationCache>, store: Arc<dyn Store>, interval: Duration) -> Self {
        Self {
            cache,
            store,
            interval,
            flush_guard: Arc::new(Mutex::new(())),
            flushing: Arc::new(AtomicBool::new(false)),
            last_success: Arc::new(StdMutex::new(None)),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the recurring timer task. The first fire happens one
    /// interval after this call, matching `tokio::time::interval`'s
    /// default of a tick already consumed at construction.
    pub fn start(&self) {
        let cache = self.cache.clone();
        let store = self.store.clone();
        let flush_guard = self.flush_guard.clone();
        let flushing = self.flushing.clone();
        let last_success = self.last_success.clone();
        let interval = self.interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // consume the immediate first tick
            loop {
                ticker.tick().await;
                if let Err(e) =
                    run_flush(&cache, store.as_ref(), &flush_guard, &flushing, &last_success).await
                {
                    error!(error = %e, "periodic flush failed");
                }
            }
        });

        // Fire-and-forget: `handle` is only consulted by `stop`, and this
        // runs on the (sync) call path, so a blocking_lock is safe here.
        if let Ok(mut guard) = self.handle.try_lock() {
            *guard = Some(task);
        }
    }

    /// Stop the periodic timer. Idempotent.
    pub fn stop(&self) {
        if let Ok(mut guard) = self.handle.try_lock() {
            if let Some(task) = guard.take() {
                task.abort();
            }
        }
    }

    pub fn is_flushing(&self) -> bool {
        self.flushing.load(Ordering::SeqCst)
    }

    /// When the last flush that actually committed a batch to the store
    /// completed, for the health snapshot. `None` until the first success.
    pub fn last_successful_flush(&self) -> Option<DateTime<Utc>> {
        *self.last_success.lock().unwrap()
    }

    /// Run one flush cycle synchronously (used for the final
    /// shutdown-triggered flush and directly by tests).
    pub async fn flush(&self) -> AggregatorResult<()> {
        run_flush(
            &self.cache,
            self.store.as_ref(),
            &self.flush_guard,
            &self.flushing,
            &self.last_success,
        )
        .await
    }
}

/// `flush()` algorithm (spec §4.3):
/// 1. empty cache -> no-op
/// 2. acquire the flush mutex
/// 3. snapshot; empty (racy) -> no-op
/// 4. upsert_batch in one transaction
/// 5. success -> remove_drained, record the completion time
/// 6. failure -> leave drained keys in cache, propagate the error
async fn run_flush(
    cache: &AggregationCache,
    store: &dyn Store,
    flush_guard: &Mutex<()>,
    flushing: &AtomicBool,
    last_success: &StdMutex<Option<DateTime<Utc>>>,
) -> AggregatorResult<()> {
    if cache.is_empty() {
        return Ok(());
    }

    let _permit = flush_guard.lock().await;
    flushing.store(true, Ordering::SeqCst);
    let result = async {
        let snapshot = cache.snapshot();
        if snapshot.is_empty() {
            return Ok(());
        }

        store.upsert_batch(&snapshot).await?;
        cache.remove_drained(&snapshot);
        info!(flushed = snapshot.len(), "flush committed");
        Ok(())
    }
    .await;
    flushing.store(false, Ordering::SeqCst);
    if result.is_ok() {
        *last_success.lock().unwrap() = Some(Utc::now());
    }
    result
}
