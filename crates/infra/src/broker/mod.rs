//! Broker backends.
//!
//! The broker abstraction itself (`BrokerProducer`, `RecordSource`, `Acknowledgment`)
//! lives in `catalog-events` as pure mechanics, together with the in-memory broker.
//! This module provides network-backed implementations, each behind a cargo feature.

#[cfg(feature = "kafka")]
pub mod kafka;
#[cfg(feature = "redis")]
pub mod redis_streams;

#[cfg(feature = "kafka")]
pub use kafka::{KafkaAck, KafkaProducer, KafkaSource};
#[cfg(feature = "redis")]
pub use redis_streams::{RedisStreamsAck, RedisStreamsProducer, RedisStreamsSource};
