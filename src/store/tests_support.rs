//! In-memory [`Store`] test doubles, available to unit tests across the
//! crate (the design notes require the core be testable with in-memory
//! doubles for store and broker without a running Postgres/Kafka).

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::UserEventStats;
use crate::error::{AggregatorError, AggregatorResult};

use super::Store;

#[derive(Default)]
pub struct InMemoryStore {
    rows: Mutex<HashMap<(i64, String), i64>>,
    calls: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_batch(&self, stats: &[UserEventStats]) -> AggregatorResult<()> {
        if stats.is_empty() {
            return Ok(());
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut rows = self.rows.lock().unwrap();
        for s in stats {
            *rows.entry((s.user_id, s.event_type.clone())).or_insert(0) += s.count();
        }
        Ok(())
    }

    async fn get(&self, user_id: i64, event_type: &str) -> AggregatorResult<Option<i64>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .get(&(user_id, event_type.to_string()))
            .copied())
    }

    async fn get_user(&self, user_id: i64) -> AggregatorResult<Vec<UserEventStats>> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .filter(|((uid, _), _)| *uid == user_id)
            .map(|((uid, et), count)| UserEventStats::with_count(*uid, et.clone(), *count))
            .collect::<Result<Vec<_>, _>>()
    }

    async fn initialize(&self) -> AggregatorResult<()> {
        Ok(())
    }
}

/// A store whose every write fails, for exercising the "failed flush
/// leaves drained keys in the cache" path.
#[derive(Default)]
pub struct FailingStore;

impl FailingStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Store for FailingStore {
    async fn upsert_batch(&self, _stats: &[UserEventStats]) -> AggregatorResult<()> {
        Err(AggregatorError::StoreError("simulated failure".to_string()))
    }

    async fn get(&self, _user_id: i64, _event_type: &str) -> AggregatorResult<Option<i64>> {
        Err(AggregatorError::StoreError("simulated failure".to_string()))
    }

    async fn get_user(&self, _user_id: i64) -> AggregatorResult<Vec<UserEventStats>> {
        Err(AggregatorError::StoreError("simulated failure".to_string()))
    }

    async fn initialize(&self) -> AggregatorResult<()> {
        Err(AggregatorError::StoreError("simulated failure".to_string()))
    }
}
