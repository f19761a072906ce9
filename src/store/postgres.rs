//! PostgreSQL implementation of [`Store`], over `sqlx::PgPool` — the same
//! async-Postgres stack the teacher's sibling services
//! (`content_processing`, `knowledge_graph`, `realtime_communication`)
//! use for their own database access.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{error, info};

use crate::domain::UserEventStats;
use crate::error::{AggregatorError, AggregatorResult};

use super::{RetryPolicy, Store};

pub struct PostgresStore {
    pool: PgPool,
    retry: RetryPolicy,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(pool: PgPool, retry: RetryPolicy) -> Self {
        Self { pool, retry }
    }

    fn classify(err: sqlx::Error) -> AggregatorError {
        match &err {
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                AggregatorError::TransientStoreError(err.to_string())
            }
            _ => AggregatorError::StoreError(err.to_string()),
        }
    }
}

#[async_trait]
impl Store for PostgresStore {
    async fn upsert_batch(&self, stats: &[UserEventStats]) -> AggregatorResult<()> {
        if stats.is_empty() {
            return Ok(());
        }
        self.retry
            .run(|| async {
                let mut tx = self.pool.begin().await.map_err(Self::classify)?;
                for s in stats {
                    sqlx::query(
                        "INSERT INTO user_event_stats (user_id, event_type, count) \
                         VALUES ($1, $2, $3) \
                         ON CONFLICT (user_id, event_type) \
                         DO UPDATE SET count = user_event_stats.count + excluded.count",
                    )
                    .bind(s.user_id)
                    .bind(&s.event_type)
                    .bind(s.count())
                    .execute(&mut *tx)
                    .await
                    .map_err(Self::classify)?;
                }
                tx.commit().await.map_err(Self::classify)?;
                Ok(())
            })
            .await
            .map_err(|e| {
                error!(error = %e, "upsert_batch failed, drained keys remain in cache");
                e
            })
    }

    async fn get(&self, user_id: i64, event_type: &str) -> AggregatorResult<Option<i64>> {
        self.retry
            .run(|| async {
                sqlx::query("SELECT count FROM user_event_stats WHERE user_id = $1 AND event_type = $2")
                    .bind(user_id)
                    .bind(event_type)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(Self::classify)
                    .map(|row| row.map(|r| r.get::<i64, _>("count")))
            })
            .await
    }

    async fn get_user(&self, user_id: i64) -> AggregatorResult<Vec<UserEventStats>> {
        self.retry
            .run(|| async {
                let rows = sqlx::query("SELECT event_type, count FROM user_event_stats WHERE user_id = $1")
                    .bind(user_id)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(Self::classify)?;
                rows.into_iter()
                    .map(|row| {
                        UserEventStats::with_count(user_id, row.get::<String, _>("event_type"), row.get::<i64, _>("count"))
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .await
    }

    async fn initialize(&self) -> AggregatorResult<()> {
        self.retry
            .run(|| async {
                sqlx::query(
                    "CREATE TABLE IF NOT EXISTS user_event_stats ( \
                         user_id BIGINT NOT NULL, \
                         event_type VARCHAR(50) NOT NULL, \
                         count BIGINT NOT NULL DEFAULT 0, \
                         PRIMARY KEY (user_id, event_type) \
                     )",
                )
                .execute(&self.pool)
                .await
                .map_err(Self::classify)?;

                sqlx::query(
                    "CREATE INDEX IF NOT EXISTS idx_user_event_stats_user_id \
                     ON user_event_stats (user_id)",
                )
                .execute(&self.pool)
                .await
                .map_err(Self::classify)?;

                info!("user_event_stats table and index ready");
                Ok(())
            })
            .await
    }
}
