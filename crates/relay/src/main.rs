use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use catalog_infra::broker::{RedisStreamsProducer, RedisStreamsSource};
use catalog_infra::{BrokerBackend, RelayConfig};
use catalog_relay::Relay;

const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    catalog_observability::init().map_err(anyhow::Error::msg)?;

    let config = RelayConfig::from_env().context("invalid relay configuration")?;
    match config.backend {
        BrokerBackend::Redis => run_redis(config).await,
        BrokerBackend::Kafka => run_kafka(config).await,
    }
}

async fn run_redis(config: RelayConfig) -> anyhow::Result<()> {
    let producer = Arc::new(
        RedisStreamsProducer::open(&config.endpoint).context("failed to open redis producer")?,
    );
    let consumer_name = format!("{}-{}", config.consumer.group_id, std::process::id());
    let relay = Relay::start(&config, Arc::clone(&producer), |topic| {
        RedisStreamsSource::open(
            &config.endpoint,
            topic,
            config.consumer.group_id.as_str(),
            consumer_name.as_str(),
        )
    })?;

    wait_for_shutdown().await?;
    tokio::task::spawn_blocking(move || {
        relay.shutdown();
        producer.flush(SHUTDOWN_FLUSH_TIMEOUT)
    })
    .await?
    .context("failed to flush redis producer")?;
    Ok(())
}

#[cfg(feature = "kafka")]
async fn run_kafka(config: RelayConfig) -> anyhow::Result<()> {
    use catalog_infra::broker::{KafkaProducer, KafkaSource};

    let producer = Arc::new(
        KafkaProducer::create(&config.endpoint, &config.producer)
            .context("failed to create kafka producer")?,
    );
    let relay = Relay::start(&config, Arc::clone(&producer), |topic| {
        KafkaSource::subscribe(&config.endpoint, &config.consumer, topic)
    })?;

    wait_for_shutdown().await?;
    tokio::task::spawn_blocking(move || {
        relay.shutdown();
        producer.flush(SHUTDOWN_FLUSH_TIMEOUT)
    })
    .await?
    .context("failed to flush kafka producer")?;
    Ok(())
}

#[cfg(not(feature = "kafka"))]
async fn run_kafka(_config: RelayConfig) -> anyhow::Result<()> {
    anyhow::bail!("the kafka backend requires building catalog-relay with the `kafka` feature")
}

async fn wait_for_shutdown() -> anyhow::Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");
    Ok(())
}
