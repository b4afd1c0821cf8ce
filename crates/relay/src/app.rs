use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use catalog_events::{BrokerError, BrokerProducer, EventPublisher, RecordSource, RetryConsumer};
use catalog_infra::{ConfigError, RelayConfig, RetryWorker, WorkerHandle};
use catalog_products::{ProductEventEmitter, delete_channels, upsert_channels};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("broker setup failed: {0}")]
    Broker(#[from] BrokerError),

    #[error("failed to spawn retry worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Running publication pipeline: one publisher and one retry worker per event type.
pub struct Relay<P> {
    emitter: Arc<ProductEventEmitter<P>>,
    workers: Vec<WorkerHandle>,
}

impl<P> Relay<P>
where
    P: BrokerProducer + Clone + 'static,
{
    /// Build publishers on `producer` and start a retry worker per retry topic.
    ///
    /// `open_source` is called once per retry topic and must return a consumer-group
    /// reader for it.
    pub fn start<S, F>(config: &RelayConfig, producer: P, mut open_source: F) -> Result<Self, RelayError>
    where
        S: RecordSource + 'static,
        F: FnMut(&str) -> Result<S, BrokerError>,
    {
        config.validate()?;
        let topics = &config.topics;

        let upserts = Arc::new(EventPublisher::new(producer.clone(), upsert_channels(topics)));
        let deletes = Arc::new(EventPublisher::new(producer, delete_channels(topics)));

        let mut workers = Vec::with_capacity(2);
        workers.push(RetryWorker::spawn(
            format!("retry:{}", topics.upsert_retry),
            open_source(&topics.upsert_retry)?,
            RetryConsumer::new(Arc::clone(&upserts), config.retry.clone()),
            config.consumer.poll_timeout,
        )?);
        workers.push(RetryWorker::spawn(
            format!("retry:{}", topics.delete_retry),
            open_source(&topics.delete_retry)?,
            RetryConsumer::new(Arc::clone(&deletes), config.retry.clone()),
            config.consumer.poll_timeout,
        )?);

        info!(
            backend = config.backend.as_str(),
            tenant_id = %config.tenant_id,
            max_attempts = config.retry.max_attempts,
            workers = workers.len(),
            "catalog relay started"
        );

        Ok(Self {
            emitter: Arc::new(ProductEventEmitter::new(config.tenant_id.clone(), upserts, deletes)),
            workers,
        })
    }

    /// Emitter for the catalog's CRUD layer.
    pub fn emitter(&self) -> Arc<ProductEventEmitter<P>> {
        Arc::clone(&self.emitter)
    }

    pub fn worker_names(&self) -> Vec<&str> {
        self.workers.iter().map(WorkerHandle::name).collect()
    }

    /// Stop all retry workers, letting in-progress records finish.
    pub fn shutdown(self) {
        for worker in self.workers {
            let name = worker.name().to_string();
            worker.shutdown();
            info!(worker = %name, "retry worker joined");
        }
        info!("catalog relay stopped");
    }
}
