//! Streaming aggregation service: ingests user-activity events from
//! Kafka, maintains per-`(user_id, event_type)` counters in memory, and
//! periodically flushes them to PostgreSQL via an idempotent merge.
//!
//! The event-processing core lives in [`cache`], [`fanout`],
//! [`aggregator`], and [`consumer`]; [`store`] and [`config`] are the
//! external collaborators the core depends on through narrow traits.

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod consumer;
pub mod domain;
pub mod error;
pub mod fanout;
pub mod store;

pub use aggregator::{Aggregator, HealthStatus};
pub use cache::AggregationCache;
pub use config::AppConfig;
pub use consumer::{Broker, CommitPolicy, ConsumerLoop, KafkaBroker};
pub use domain::{UserEvent, UserEventStats};
pub use error::{AggregatorError, AggregatorResult};
pub use fanout::{EventBus, Observer, Subscription};
pub use store::{PostgresStore, Store};
