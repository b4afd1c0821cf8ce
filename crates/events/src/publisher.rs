//! Reliable domain-event publication.
//!
//! One [`EventPublisher`] exists per event type. It is generic over the event and the
//! broker producer, and parameterized once by a [`PublisherChannels`] value naming the
//! three topics of the event type and how to extract a loggable id from an event.
//!
//! ```text
//! publish(key, event)
//!   └─ send → main topic ─── ok ──→ (completion callback logs receipt)
//!        │
//!        └─ synchronous error → classify
//!              ├─ Transient → send → retry topic ─── error → fail topic ("Retry failed: …")
//!              └─ Terminal  → send → fail topic ("Non-retryable error: …")
//! ```
//!
//! Nothing in this module returns an error to the caller of `publish`; failures are
//! logged and redirected. A failure to reach the fail topic is logged and dropped.

use std::marker::PhantomData;

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::broker::{BrokerError, BrokerProducer, DeliveryCallback, OutboundRecord};
use crate::classify::{ErrorClass, classify};
use crate::key::PublishKey;

/// Header carrying the reason a record was parked in the fail topic.
pub const FAILURE_REASON_HEADER: &str = "x-failure-reason";
/// Headers identifying where an unreadable record was consumed from.
pub const ORIGIN_TOPIC_HEADER: &str = "x-origin-topic";
pub const ORIGIN_PARTITION_HEADER: &str = "x-origin-partition";
pub const ORIGIN_OFFSET_HEADER: &str = "x-origin-offset";

/// Topics and id extraction for one event type.
#[derive(Debug, Clone)]
pub struct PublisherChannels<T> {
    pub main_topic: String,
    pub fail_topic: String,
    pub retry_topic: String,
    /// Loggable id of an event (never used for routing).
    pub event_id: fn(&T) -> String,
}

/// Coordinates of a consumed record that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOrigin {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, Clone, Copy)]
enum Channel {
    Main,
    Retry,
    Fail,
}

impl Channel {
    fn as_str(&self) -> &'static str {
        match self {
            Channel::Main => "main",
            Channel::Retry => "retry",
            Channel::Fail => "fail",
        }
    }
}

/// Completion handler that only logs.
fn delivery_logger(channel: Channel, event_id: String) -> DeliveryCallback {
    Box::new(move |result| match result {
        Ok(receipt) => debug!(
            channel = channel.as_str(),
            event_id = %event_id,
            topic = %receipt.topic,
            partition = receipt.partition,
            offset = receipt.offset,
            "broker send acknowledged"
        ),
        Err(err) => warn!(
            channel = channel.as_str(),
            event_id = %event_id,
            error = %err,
            "broker send failed after enqueue"
        ),
    })
}

/// Publication engine for one event type.
#[derive(Debug)]
pub struct EventPublisher<T, P> {
    producer: P,
    channels: PublisherChannels<T>,
    _event: PhantomData<fn(&T)>,
}

impl<T, P> EventPublisher<T, P>
where
    T: Serialize,
    P: BrokerProducer,
{
    pub fn new(producer: P, channels: PublisherChannels<T>) -> Self {
        Self {
            producer,
            channels,
            _event: PhantomData,
        }
    }

    pub fn channels(&self) -> &PublisherChannels<T> {
        &self.channels
    }

    /// Publish `event` to the main topic without waiting for the broker.
    ///
    /// Never fails from the caller's point of view. A synchronous send error routes the
    /// event to the retry topic (transient) or the fail topic (terminal).
    pub fn publish(&self, key: &PublishKey, event: &T) {
        if let Err(err) = self.try_publish(key, event) {
            match classify(&err) {
                ErrorClass::Transient => {
                    warn!(
                        event_id = %self.event_id(event),
                        key = %key,
                        error = %err,
                        "transient publish failure, routing to retry topic"
                    );
                    self.publish_retry(key, event);
                }
                ErrorClass::Terminal => {
                    warn!(
                        event_id = %self.event_id(event),
                        key = %key,
                        error = %err,
                        "terminal publish failure, routing to fail topic"
                    );
                    self.publish_failed(key, event, &format!("Non-retryable error: {err}"));
                }
            }
        }
    }

    /// One raw attempt to enqueue `event` on the main topic.
    ///
    /// Unlike [`publish`](Self::publish) the synchronous error is returned instead of
    /// routed; the retry consumer uses this to drive its own attempts.
    pub fn try_publish(&self, key: &PublishKey, event: &T) -> Result<(), BrokerError> {
        let topic = self.channels.main_topic.clone();
        self.send(Channel::Main, topic, key, event, Vec::new())
    }

    /// Best-effort send to the fail topic. Errors are logged and swallowed.
    pub fn publish_failed(&self, key: &PublishKey, event: &T, reason: &str) {
        let event_id = self.event_id(event);
        warn!(
            event_id = %event_id,
            key = %key,
            reason,
            "publishing event to fail topic"
        );

        let topic = self.channels.fail_topic.clone();
        let headers = vec![(FAILURE_REASON_HEADER.to_string(), reason.to_string())];
        if let Err(err) = self.send(Channel::Fail, topic, key, event, headers) {
            error!(
                event_id = %event_id,
                key = %key,
                error = %err,
                "failed to publish to fail topic; event dropped"
            );
        }
    }

    /// Best-effort send of an undecodable payload to the fail topic, byte for byte.
    pub fn publish_failed_raw(
        &self,
        key: &PublishKey,
        payload: &[u8],
        reason: &str,
        origin: &RecordOrigin,
    ) {
        warn!(
            key = %key,
            reason,
            origin_topic = %origin.topic,
            origin_offset = origin.offset,
            "publishing undecodable record to fail topic"
        );

        let record = OutboundRecord::new(
            self.channels.fail_topic.as_str(),
            key.as_str(),
            payload.to_vec(),
        )
        .with_header(FAILURE_REASON_HEADER, reason)
        .with_header(ORIGIN_TOPIC_HEADER, origin.topic.as_str())
        .with_header(ORIGIN_PARTITION_HEADER, origin.partition.to_string())
        .with_header(ORIGIN_OFFSET_HEADER, origin.offset.to_string());

        let callback = delivery_logger(Channel::Fail, format!("{}@{}", origin.topic, origin.offset));
        if let Err(err) = self.producer.send(record, callback) {
            error!(
                key = %key,
                error = %err,
                "failed to publish undecodable record to fail topic; record dropped"
            );
        }
    }

    /// Best-effort send to the retry topic; falls through to the fail topic once.
    fn publish_retry(&self, key: &PublishKey, event: &T) {
        let topic = self.channels.retry_topic.clone();
        if let Err(err) = self.send(Channel::Retry, topic, key, event, Vec::new()) {
            error!(
                event_id = %self.event_id(event),
                key = %key,
                error = %err,
                "failed to publish to retry topic"
            );
            self.publish_failed(key, event, &format!("Retry failed: {err}"));
        }
    }

    fn send(
        &self,
        channel: Channel,
        topic: String,
        key: &PublishKey,
        event: &T,
        headers: Vec<(String, String)>,
    ) -> Result<(), BrokerError> {
        let payload =
            serde_json::to_vec(event).map_err(|e| BrokerError::Serialization(e.to_string()))?;

        let mut record = OutboundRecord::new(topic, key.as_str(), payload);
        record.headers = headers;

        self.producer
            .send(record, delivery_logger(channel, self.event_id(event)))
    }

    fn event_id(&self, event: &T) -> String {
        (self.channels.event_id)(event)
    }
}
