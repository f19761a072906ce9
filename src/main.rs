use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use user_event_aggregator::{
    Aggregator, AppConfig, Broker, ConsumerLoop, KafkaBroker, PostgresStore, Store,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    info!("starting user-event-aggregator");

    let pool = PgPoolOptions::new()
        .acquire_timeout(config.postgres.command_timeout)
        .connect(&config.postgres.connection_string)
        .await?;
    let store: Arc<dyn Store> = Arc::new(PostgresStore::new(pool));
    store.initialize().await?;

    let aggregator = Arc::new(Aggregator::new(store, config.event_processing.flush_interval));
    aggregator.start();

    let fanout = Arc::new(user_event_aggregator::EventBus::new());
    let subscription = fanout.subscribe(aggregator.clone()).await;

    let broker: Arc<dyn Broker> = Arc::new(KafkaBroker::new(&config.kafka)?);
    let consumer = ConsumerLoop::new(broker, fanout.clone());
    consumer.start();

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    // spec §2/§5 shutdown sequence: consumer stops first, then the
    // fan-out completes (which triggers the aggregator's final flush and
    // timer stop), then the subscription is released.
    consumer.stop().await;
    fanout.complete().await;
    subscription.release().await;

    info!("shutdown complete");
    Ok(())
}
