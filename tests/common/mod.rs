use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use user_event_aggregator::{AggregatorResult, Store, UserEventStats};

/// In-memory store double for the end-to-end scenarios in the design
/// doc's testable-properties section. Exercised only through the public
/// `Store` trait, the same contract `PostgresStore` implements.
#[derive(Default)]
pub struct InMemoryStore {
    rows: Mutex<HashMap<(i64, String), i64>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(&self, user_id: i64, event_type: &str) -> Option<i64> {
        self.rows
            .lock()
            .unwrap()
            .get(&(user_id, event_type.to_string()))
            .copied()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn upsert_batch(&self, stats: &[UserEventStats]) -> AggregatorResult<()> {
        let mut rows = self.rows.lock().unwrap();
        for s in stats {
            *rows.entry((s.user_id, s.event_type.clone())).or_insert(0) += s.count();
        }
        Ok(())
    }

    async fn get(&self, user_id: i64, event_type: &str) -> AggregatorResult<Option<i64>> {
        Ok(self.row(user_id, event_type))
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

pub fn event(
    user_id: i64,
    event_type: &str,
    button_id: Option<&str>,
) -> user_event_aggregator::UserEvent {
    let mut data = HashMap::new();
    if let Some(b) = button_id {
        data.insert("button_id".to_string(), serde_json::json!(b));
    }
    user_event_aggregator::UserEvent::new(
        user_id,
        event_type,
        "2025-01-07T00:00:00Z".parse().unwrap(),
        data,
    )
    .unwrap()
}
