//! Domain-event publication pipeline (mechanics only).
//!
//! - `event`: the domain event contract
//! - `key`: publish key resolution
//! - `classify`: transient vs terminal send failures
//! - `broker`: producer/consumer abstraction with manual acknowledgment
//! - `publisher`: main/retry/fail routing per event type
//! - `retry`: bounded retry-topic consumption with backoff and recovery
//! - `in_memory_broker`: broker for tests/dev
//!
//! Delivery is **at-least-once**: consumers of the published events must be idempotent
//! (dedup by key + action + timestamp). Ordering holds only for first-attempt sends that
//! share a key.

pub mod broker;
pub mod classify;
pub mod event;
pub mod in_memory_broker;
pub mod key;
pub mod publisher;
pub mod retry;

pub use broker::{
    AckGuard, Acknowledgment, BrokerError, BrokerProducer, DeliveryCallback, DeliveryReceipt,
    InboundRecord, OutboundRecord, RecordSource,
};
pub use classify::{ErrorClass, classify};
pub use event::{ActionKind, DomainEvent};
pub use in_memory_broker::{InMemoryAck, InMemoryBroker, InMemoryBrokerError, InMemorySource};
pub use key::PublishKey;
pub use publisher::{EventPublisher, PublisherChannels, RecordOrigin};
pub use retry::{RecoveryCause, RetryConsumer, RetryOutcome, RetryPolicy};
