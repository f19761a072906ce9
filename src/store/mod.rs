//! Durable store interface: the single-table idempotent-merge target for
//! flushed counters, plus a Postgres implementation over `sqlx` and a
//! bounded-retry wrapper matching the teacher's
//! `error::retry::RetryPolicy` shape.

mod postgres;
mod retry;
#[cfg(test)]
pub mod tests_support;

pub use postgres::PostgresStore;
pub use retry::RetryPolicy;

use async_trait::async_trait;

use crate::domain::UserEventStats;
use crate::error::AggregatorResult;

/// The durable store the flusher writes to. External collaborator per
/// the spec — the core only depends on this contract, never on a
/// concrete database client.
#[async_trait]
pub trait Store: Send + Sync {
    /// Within one transaction, upsert every `(user_id, event_type,
    /// delta)` triple with `count := existing.count + delta`. An empty
    /// input is a no-op that does not open a transaction.
    async fn upsert_batch(&self, stats: &[UserEventStats]) -> AggregatorResult<()>;

    /// Same semantics as `upsert_batch` for a single row.
    async fn upsert(&self, stats: &UserEventStats) -> AggregatorResult<()> {
        self.upsert_batch(std::slice::from_ref(stats)).await
    }

    /// The durably-committed count for one key, not merged with the
    /// in-memory cache.
    async fn get(&self, user_id: i64, event_type: &str) -> AggregatorResult<Option<i64>>;

    /// All durably-committed counters for one user.
    async fn get_user(&self, user_id: i64) -> AggregatorResult<Vec<UserEventStats>>;

    /// Ensure the target table and its `(user_id)` index exist.
    async fn initialize(&self) -> AggregatorResult<()>;
}
