//! Broker producer/consumer abstraction (mechanics only).
//!
//! The publication pipeline talks to its message broker exclusively through the traits
//! in this module, which keeps the routing logic testable against the in-memory broker
//! and swappable between real backends (Redis Streams, Kafka).
//!
//! ## Delivery model
//!
//! - **Non-blocking send**: [`BrokerProducer::send`] enqueues a record and returns. The
//!   outcome is reported later through a [`DeliveryCallback`], typically on a
//!   broker-internal thread.
//! - **Synchronous failure**: if the enqueue itself fails (queue full, serialization,
//!   no connection) `send` returns the error and the callback is never invoked.
//! - **Manual acknowledgment**: consumed records are only committed when their
//!   [`Acknowledgment`] is triggered. [`AckGuard`] makes that happen on every exit path.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Broker-level failure.
///
/// Backends map their native errors onto these kinds so that the classifier stays
/// backend-agnostic.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// A request or delivery timed out.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The client-side send buffer is exhausted.
    #[error("producer queue full: {0}")]
    QueueFull(String),

    /// The broker signalled a condition that may clear on its own.
    #[error("retriable broker error: {0}")]
    Retriable(String),

    /// The broker could not be reached.
    #[error("connection error: {0}")]
    Connection(String),

    /// The record could not be encoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The client is not allowed to write to the topic.
    #[error("authorization failed: {0}")]
    Authorization(String),

    /// The broker refused the record for a reason that will not change on retry.
    #[error("record rejected: {0}")]
    Rejected(String),

    /// A higher-level failure wrapping its cause.
    #[error("{message}")]
    Wrapped {
        message: String,
        #[source]
        source: Box<BrokerError>,
    },
}

impl BrokerError {
    pub fn wrap(message: impl Into<String>, source: BrokerError) -> Self {
        Self::Wrapped {
            message: message.into(),
            source: Box::new(source),
        }
    }
}

/// A record to be written to a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRecord {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
    pub headers: Vec<(String, String)>,
}

impl OutboundRecord {
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            payload,
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Where the broker placed a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

/// Completion handler invoked once the broker confirms or rejects a send.
///
/// Runs on a broker-owned thread; it must not block or touch shared mutable state.
pub type DeliveryCallback = Box<dyn FnOnce(Result<DeliveryReceipt, BrokerError>) + Send + Sync>;

/// Producer side of a broker.
///
/// Implementations must be safe to share between request threads; one handle per
/// event type is expected to serve all concurrent publishers.
pub trait BrokerProducer: Send + Sync {
    /// Enqueue `record` without waiting for the broker.
    ///
    /// `Err` means the record was not enqueued and `on_delivery` will not run.
    fn send(&self, record: OutboundRecord, on_delivery: DeliveryCallback) -> Result<(), BrokerError>;
}

impl<P> BrokerProducer for Arc<P>
where
    P: BrokerProducer + ?Sized,
{
    fn send(&self, record: OutboundRecord, on_delivery: DeliveryCallback) -> Result<(), BrokerError> {
        (**self).send(record, on_delivery)
    }
}

/// A record consumed from a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Option<Vec<u8>>,
}

impl InboundRecord {
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn payload(&self) -> &[u8] {
        self.payload.as_deref().unwrap_or_default()
    }

    /// Payload as text, for logging.
    pub fn payload_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(self.payload())
    }
}

/// Commits the position of one consumed record.
pub trait Acknowledgment {
    fn acknowledge(&mut self);
}

impl<A: Acknowledgment + ?Sized> Acknowledgment for Box<A> {
    fn acknowledge(&mut self) {
        (**self).acknowledge()
    }
}

/// Scoped acknowledgment: acknowledges exactly once, at the latest when dropped.
///
/// Holding the guard for the duration of record processing means every exit path,
/// including early returns and panics, commits the record.
#[derive(Debug)]
pub struct AckGuard<A: Acknowledgment> {
    inner: Option<A>,
}

impl<A: Acknowledgment> AckGuard<A> {
    pub fn new(ack: A) -> Self {
        Self { inner: Some(ack) }
    }

    /// Acknowledge now instead of at scope exit.
    pub fn acknowledge(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(mut ack) = self.inner.take() {
            ack.acknowledge();
        }
    }
}

impl<A: Acknowledgment> Drop for AckGuard<A> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Consumer side of a broker: yields records one at a time with manual commit.
pub trait RecordSource: Send {
    type Ack: Acknowledgment;
    type Error: core::fmt::Debug + core::fmt::Display;

    /// Wait up to `timeout` for the next record.
    fn poll(&mut self, timeout: Duration) -> Result<Option<(InboundRecord, Self::Ack)>, Self::Error>;
}
