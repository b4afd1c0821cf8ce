use std::sync::Arc;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, CommitMode, Consumer};
use rdkafka::{Message, Offset, TopicPartitionList};
use tracing::error;

use catalog_events::{Acknowledgment, BrokerError, InboundRecord, RecordSource};

use super::map_kafka_error;
use crate::config::ConsumerSettings;

/// Retry-topic consumer with manual, per-record commits.
pub struct KafkaSource {
    consumer: Arc<BaseConsumer>,
}

impl std::fmt::Debug for KafkaSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaSource").finish_non_exhaustive()
    }
}

impl KafkaSource {
    pub fn subscribe(
        bootstrap_servers: &str,
        settings: &ConsumerSettings,
        topic: &str,
    ) -> Result<Self, BrokerError> {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", bootstrap_servers);
        for (name, value) in settings.client_properties() {
            config.set(name, value);
        }

        let consumer: BaseConsumer = config.create().map_err(|e| map_kafka_error(&e))?;
        consumer.subscribe(&[topic]).map_err(|e| map_kafka_error(&e))?;

        Ok(Self {
            consumer: Arc::new(consumer),
        })
    }
}

impl RecordSource for KafkaSource {
    type Ack = KafkaAck;
    type Error = BrokerError;

    fn poll(&mut self, timeout: Duration) -> Result<Option<(InboundRecord, Self::Ack)>, Self::Error> {
        let message = match self.consumer.poll(timeout) {
            None => return Ok(None),
            Some(Err(err)) => return Err(map_kafka_error(&err)),
            Some(Ok(message)) => message,
        };

        let record = InboundRecord {
            topic: message.topic().to_string(),
            partition: message.partition(),
            offset: message.offset(),
            key: message.key().map(|k| String::from_utf8_lossy(k).into_owned()),
            payload: message.payload().map(<[u8]>::to_vec),
        };
        let ack = KafkaAck {
            consumer: Arc::clone(&self.consumer),
            topic: record.topic.clone(),
            partition: record.partition,
            offset: record.offset,
        };
        Ok(Some((record, ack)))
    }
}

/// Commits the offset after one consumed record.
pub struct KafkaAck {
    consumer: Arc<BaseConsumer>,
    topic: String,
    partition: i32,
    offset: i64,
}

impl std::fmt::Debug for KafkaAck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaAck")
            .field("topic", &self.topic)
            .field("partition", &self.partition)
            .field("offset", &self.offset)
            .finish()
    }
}

impl Acknowledgment for KafkaAck {
    fn acknowledge(&mut self) {
        let mut positions = TopicPartitionList::new();
        let committed = positions
            .add_partition_offset(&self.topic, self.partition, Offset::Offset(self.offset + 1))
            .and_then(|()| self.consumer.commit(&positions, CommitMode::Sync));

        if let Err(err) = committed {
            // The record is redelivered after a rebalance or restart.
            error!(
                topic = %self.topic,
                partition = self.partition,
                offset = self.offset,
                error = %err,
                "failed to commit retry record"
            );
        }
    }
}
