use std::hash::{Hash, Hasher};

use crate::error::AggregatorError;

/// A counter for one `(user_id, event_type)` pair.
///
/// Identity and equality are defined by the key alone — two stats with
/// the same `(user_id, event_type)` and different `count` are equal, so
/// that cache lookups and snapshot diffing work by key regardless of the
/// value in flight.
#[derive(Debug, Clone)]
pub struct UserEventStats {
    pub user_id: i64,
    pub event_type: String,
    count: i64,
}

impl UserEventStats {
    pub fn new(user_id: i64, event_type: impl Into<String>) -> Self {
        Self {
            user_id,
            event_type: event_type.into(),
            count: 0,
        }
    }

    pub fn with_count(
        user_id: i64,
        event_type: impl Into<String>,
        count: i64,
    ) -> Result<Self, AggregatorError> {
        let mut stats = Self::new(user_id, event_type);
        stats.set_count(count)?;
        Ok(stats)
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn set_count(&mut self, count: i64) -> Result<(), AggregatorError> {
        if count < 0 {
            return Err(AggregatorError::ValidationFailed(format!(
                "count must be >= 0, got {count}"
            )));
        }
        self.count = count;
        Ok(())
    }

    pub fn increment(&mut self) {
        self.count += 1;
    }

    pub fn key(&self) -> (i64, &str) {
        (self.user_id, &self.event_type)
    }
}

impl PartialEq for UserEventStats {
    fn eq(&self, other: &Self) -> bool {
        self.user_id == other.user_id && self.event_type == other.event_type
    }
}

impl Eq for UserEventStats {}

impl Hash for UserEventStats {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.user_id.hash(state);
        self.event_type.hash(state);
    }
}
