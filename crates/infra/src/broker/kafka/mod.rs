//! Kafka backend over librdkafka.
//!
//! The producer applies the idempotent delivery contract from
//! [`ProducerSettings`](crate::config::ProducerSettings); the source consumes with
//! auto-commit disabled and commits one record at a time when acknowledged.

mod consumer;
mod producer;

pub use consumer::{KafkaAck, KafkaSource};
pub use producer::KafkaProducer;

use rdkafka::error::{KafkaError, RDKafkaErrorCode};

use catalog_events::BrokerError;

/// Map a librdkafka error onto the backend-agnostic broker error kinds.
pub fn map_kafka_error(err: &KafkaError) -> BrokerError {
    let message = err.to_string();
    match err.rdkafka_error_code() {
        Some(RDKafkaErrorCode::QueueFull) => BrokerError::QueueFull(message),
        Some(RDKafkaErrorCode::MessageTimedOut | RDKafkaErrorCode::RequestTimedOut) => {
            BrokerError::Timeout(message)
        }
        Some(
            RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::NetworkException,
        ) => BrokerError::Connection(message),
        Some(
            RDKafkaErrorCode::NotLeaderForPartition
            | RDKafkaErrorCode::LeaderNotAvailable
            | RDKafkaErrorCode::NotEnoughReplicas
            | RDKafkaErrorCode::NotEnoughReplicasAfterAppend,
        ) => BrokerError::Retriable(message),
        Some(
            RDKafkaErrorCode::TopicAuthorizationFailed
            | RDKafkaErrorCode::GroupAuthorizationFailed
            | RDKafkaErrorCode::ClusterAuthorizationFailed,
        ) => BrokerError::Authorization(message),
        _ => BrokerError::Rejected(message),
    }
}

#[cfg(test)]
mod tests {
    use catalog_events::{ErrorClass, classify};

    use super::*;

    #[test]
    fn queue_full_and_timeouts_are_transient() {
        let full = KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull);
        let timed_out = KafkaError::MessageProduction(RDKafkaErrorCode::MessageTimedOut);

        assert!(matches!(map_kafka_error(&full), BrokerError::QueueFull(_)));
        assert_eq!(classify(&map_kafka_error(&timed_out)), ErrorClass::Transient);
    }

    #[test]
    fn oversized_and_unauthorized_records_are_terminal() {
        let too_large = KafkaError::MessageProduction(RDKafkaErrorCode::MessageSizeTooLarge);
        let denied = KafkaError::MessageProduction(RDKafkaErrorCode::TopicAuthorizationFailed);

        assert_eq!(classify(&map_kafka_error(&too_large)), ErrorClass::Terminal);
        assert!(matches!(map_kafka_error(&denied), BrokerError::Authorization(_)));
    }
}
