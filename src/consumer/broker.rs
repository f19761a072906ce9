//! Broker abstraction the consumer loop depends on, so the loop can be
//! exercised with an in-memory double in tests instead of a live Kafka
//! cluster (design notes: "tests must be able to instantiate it with
//! in-memory test doubles for the store and broker").

use async_trait::async_trait;
use rdkafka::client::ClientContext;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, Rebalance, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::{ClientConfig, Message, Offset, TopicPartitionList};
use tracing::{info, warn};

use crate::config::KafkaConfig;
use crate::error::{AggregatorError, AggregatorResult};

/// Logs partition-assigned/revoked rebalance events. No state changes —
/// spec §4.4 asks only for visibility here.
pub struct LoggingContext;

impl ClientContext for LoggingContext {}

impl ConsumerContext for LoggingContext {
    fn pre_rebalance(&self, rebalance: &Rebalance<'_>) {
        match rebalance {
            Rebalance::Assign(partitions) => log_partition_assignment(partitions),
            Rebalance::Revoke(partitions) => log_partition_revocation(partitions),
            Rebalance::Error(e) => warn!(error = %e, "rebalance error"),
        }
    }
}

/// One polled record, detached from the underlying client's borrowed
/// message lifetime so it can cross an `async_trait` boundary.
#[derive(Debug, Clone)]
pub struct BrokerRecord {
    pub payload: Vec<u8>,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Poll for one record. `Ok(None)` means the poll timed out with
    /// nothing available — not an error.
    async fn poll(&self) -> AggregatorResult<Option<BrokerRecord>>;

    /// Store the offset and commit it (manual, per-record — spec §4.4).
    async fn commit(&self, record: &BrokerRecord) -> AggregatorResult<()>;
}

pub struct KafkaBroker {
    consumer: StreamConsumer<LoggingContext>,
}

impl KafkaBroker {
    pub fn new(config: &KafkaConfig) -> AggregatorResult<Self> {
        let consumer: StreamConsumer<LoggingContext> = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", config.enable_auto_commit.to_string())
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set(
                "session.timeout.ms",
                config.session_timeout.as_millis().to_string(),
            )
            .set(
                "max.poll.interval.ms",
                config.max_poll_interval.as_millis().to_string(),
            )
            .create_with_context(LoggingContext)
            .map_err(|e| AggregatorError::Configuration(format!("failed to build consumer: {e}")))?;

        consumer
            .subscribe(&[&config.topic])
            .map_err(|e| AggregatorError::Configuration(format!("failed to subscribe: {e}")))?;

        Ok(Self { consumer })
    }

    /// librdkafka surfaces a fatal client-level error (broker no longer
    /// usable, needs a restart) independently of the `Result` returned by
    /// any one call, so we check for it whenever a call errors.
    fn classify(&self, err: KafkaError) -> AggregatorError {
        if let Some((code, reason)) = self.consumer.client().fatal_error() {
            AggregatorError::FatalBrokerError(format!("{code}: {reason}"))
        } else {
            AggregatorError::TransientConsumeError(err.to_string())
        }
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    async fn poll(&self) -> AggregatorResult<Option<BrokerRecord>> {
        match self.consumer.recv().await {
            Ok(message) => {
                let payload = message.payload().unwrap_or_default().to_vec();
                let topic = message.topic().to_string();
                let partition = message.partition();
                let offset = message.offset();
                Ok(Some(BrokerRecord {
                    payload,
                    topic,
                    partition,
                    offset,
                }))
            }
            Err(e) => Err(self.classify(e)),
        }
    }

    async fn commit(&self, record: &BrokerRecord) -> AggregatorResult<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&record.topic, record.partition, Offset::Offset(record.offset + 1))
            .map_err(|e| AggregatorError::TransientConsumeError(e.to_string()))?;
        self.consumer
            .commit(&tpl, CommitMode::Sync)
            .map_err(|e| self.classify(e))
    }
}

pub fn log_partition_assignment(partitions: &TopicPartitionList) {
    info!(?partitions, "partitions assigned");
}

pub fn log_partition_revocation(partitions: &TopicPartitionList) {
    warn!(?partitions, "partitions revoked");
}
