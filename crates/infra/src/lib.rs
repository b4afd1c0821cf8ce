//! Infrastructure layer: broker backends, configuration, background workers.

pub mod broker;
pub mod config;
pub mod workers;


pub use config::{
    Acks, BrokerBackend, ConfigError, ConsumerSettings, OffsetReset, ProducerSettings, RelayConfig,
};
pub use workers::{RetryWorker, WorkerHandle};
