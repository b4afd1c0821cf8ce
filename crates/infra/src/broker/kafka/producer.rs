use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, Message, OwnedHeaders};
use rdkafka::producer::{BaseRecord, DeliveryResult, Producer, ProducerContext, ThreadedProducer};
use rdkafka::ClientContext;

use catalog_events::{BrokerError, BrokerProducer, DeliveryCallback, DeliveryReceipt, OutboundRecord};

use super::map_kafka_error;
use crate::config::ProducerSettings;

/// Routes librdkafka delivery reports to the per-record callback.
#[derive(Debug, Clone, Copy)]
pub struct CallbackContext;

impl ClientContext for CallbackContext {}

impl ProducerContext for CallbackContext {
    type DeliveryOpaque = Box<DeliveryCallback>;

    fn delivery(&self, delivery_result: &DeliveryResult<'_>, on_delivery: Self::DeliveryOpaque) {
        let outcome = match delivery_result {
            Ok(message) => Ok(DeliveryReceipt {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
            }),
            Err((err, _)) => Err(map_kafka_error(err)),
        };
        on_delivery(outcome);
    }
}

/// Idempotent Kafka producer with a background polling thread.
///
/// `send` only enqueues; delivery reports arrive on librdkafka's thread.
pub struct KafkaProducer {
    inner: ThreadedProducer<CallbackContext>,
}

impl std::fmt::Debug for KafkaProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaProducer").finish_non_exhaustive()
    }
}

impl KafkaProducer {
    pub fn create(bootstrap_servers: &str, settings: &ProducerSettings) -> Result<Self, BrokerError> {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", bootstrap_servers);
        for (name, value) in settings.client_properties() {
            config.set(name, value);
        }

        let inner = config
            .create_with_context(CallbackContext)
            .map_err(|e| map_kafka_error(&e))?;
        Ok(Self { inner })
    }

    /// Wait for in-flight records to be delivered (or fail).
    pub fn flush(&self, timeout: Duration) -> Result<(), BrokerError> {
        self.inner.flush(timeout).map_err(|e| map_kafka_error(&e))
    }
}

impl BrokerProducer for KafkaProducer {
    fn send(&self, record: OutboundRecord, on_delivery: DeliveryCallback) -> Result<(), BrokerError> {
        let mut headers = OwnedHeaders::new_with_capacity(record.headers.len());
        for (name, value) in &record.headers {
            headers = headers.insert(Header {
                key: name.as_str(),
                value: Some(value.as_str()),
            });
        }

        let base = BaseRecord::with_opaque_to(&record.topic, Box::new(on_delivery))
            .key(record.key.as_str())
            .payload(record.payload.as_slice())
            .headers(headers);

        // On error librdkafka hands the record back; its callback is dropped unrun.
        self.inner.send(base).map_err(|(err, _)| map_kafka_error(&err))
    }
}
