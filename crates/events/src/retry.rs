//! Retry-topic consumption with bounded attempts and exponential backoff.
//!
//! ## Per-record state machine
//!
//! ```text
//! RECEIVED → DESERIALIZE ─ error ─────────────────────────────┐
//!                │                                             ▼
//!                └→ ATTEMPT(1) ─ ok → ACK            EXHAUSTED → RECOVER → ACK
//!                      │                                 ▲
//!                      └ error → BACKOFF → ATTEMPT(n+1) ─┘ (n = max or terminal error)
//! ```
//!
//! Attempts run synchronously on the listener thread; the sleep between attempts blocks
//! it. Retry-topic volume is expected to be low, and blocking keeps worst-case latency
//! predictable. Whatever happens, the record is acknowledged exactly once.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::broker::{AckGuard, Acknowledgment, BrokerError, BrokerProducer, InboundRecord};
use crate::classify::{ErrorClass, classify};
use crate::key::{self, PublishKey};
use crate::publisher::{EventPublisher, RecordOrigin};
use crate::DomainEvent;

/// Default maximum number of attempts per retry-topic record.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default delay before the second attempt.
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 300;
/// Default factor applied to the delay after each attempt.
pub const DEFAULT_MULTIPLIER: f64 = 2.0;
/// Default cap on a single backoff delay.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first (at least 1).
    pub max_attempts: u32,
    /// Delay between attempt 1 and attempt 2.
    pub initial_delay: Duration,
    /// Exponential growth factor.
    pub multiplier: f64,
    /// Maximum delay cap.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            multiplier: DEFAULT_MULTIPLIER,
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with exponential backoff.
    pub fn exponential(max_attempts: u32, initial_delay: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts,
            initial_delay,
            multiplier,
            ..Default::default()
        }
    }

    /// Create a policy that retries without sleeping (tests).
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            multiplier: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay to wait after the failed attempt `attempt` (1-indexed).
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.initial_delay.as_millis() as f64;
        let max_ms = self.max_delay.as_millis() as f64;
        let factor = self.multiplier.max(1.0).powi((attempt - 1) as i32);

        Duration::from_millis((base_ms * factor).min(max_ms) as u64)
    }

    /// Check if another attempt is allowed after `attempt` attempts.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }
}

/// How a retry-topic record left the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome {
    /// The event reached the main topic.
    Republished { key: PublishKey, attempts: u32 },
    /// The event (or its raw payload) was routed to the fail topic.
    Recovered { key: PublishKey, attempts: u32, reason: String },
}

impl RetryOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryOutcome::Republished { attempts, .. } | RetryOutcome::Recovered { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Why a record ended up in recovery.
#[derive(Debug)]
pub enum RecoveryCause {
    /// The payload did not decode into the event type.
    Undecodable(String),
    /// Attempts ran out (or hit a terminal error).
    Exhausted(BrokerError),
}

impl core::fmt::Display for RecoveryCause {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RecoveryCause::Undecodable(msg) => write!(f, "cannot deserialize payload: {msg}"),
            RecoveryCause::Exhausted(err) => core::fmt::Display::fmt(err, f),
        }
    }
}

/// Retry-topic consumer for one event type.
///
/// Re-attempts delivery through the same [`EventPublisher`] the request path uses.
#[derive(Debug)]
pub struct RetryConsumer<T, P> {
    publisher: Arc<EventPublisher<T, P>>,
    policy: RetryPolicy,
}

impl<T, P> RetryConsumer<T, P>
where
    T: DomainEvent,
    P: BrokerProducer,
{
    pub fn new(publisher: Arc<EventPublisher<T, P>>, policy: RetryPolicy) -> Self {
        Self { publisher, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Process one retry-topic record and acknowledge it exactly once.
    pub fn retry<A: Acknowledgment>(&self, record: &InboundRecord, ack: A) -> RetryOutcome {
        let guard = AckGuard::new(ack);
        info!(
            topic = %record.topic,
            offset = record.offset,
            key = record.key().unwrap_or_default(),
            "retry consumer received record"
        );

        let event = match serde_json::from_slice::<T>(record.payload()) {
            Ok(event) => event,
            Err(err) => {
                return self.recover_with(RecoveryCause::Undecodable(err.to_string()), record, 0, guard);
            }
        };

        let publish_key = key::resolve_for_recovery(
            record.key(),
            Some(event.tenant_id()),
            Some(event.entity_id()),
        );

        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.publisher.try_publish(&publish_key, &event) {
                Ok(()) => {
                    guard.acknowledge();
                    info!(key = %publish_key, attempt, "retry consumer republished event");
                    return RetryOutcome::Republished {
                        key: publish_key,
                        attempts: attempt,
                    };
                }
                Err(err) => err,
            };

            let class = classify(&err);
            warn!(
                key = %publish_key,
                attempt,
                max_attempts = self.policy.max_attempts,
                error = %err,
                transient = class.is_transient(),
                "retry attempt failed"
            );

            if class == ErrorClass::Terminal || !self.policy.should_retry(attempt) {
                return self.recover_event(RecoveryCause::Exhausted(err), record, &event, attempt, guard);
            }

            std::thread::sleep(self.policy.delay_after_attempt(attempt));
        }
    }

    /// Route a record straight to the fail topic and acknowledge it exactly once.
    ///
    /// Used when attempts are exhausted by an outer driver; the payload may be
    /// undecodable.
    pub fn recover<A: Acknowledgment>(
        &self,
        cause: RecoveryCause,
        record: &InboundRecord,
        ack: A,
    ) -> RetryOutcome {
        self.recover_with(cause, record, 0, AckGuard::new(ack))
    }

    fn recover_with<A: Acknowledgment>(
        &self,
        cause: RecoveryCause,
        record: &InboundRecord,
        attempts: u32,
        guard: AckGuard<A>,
    ) -> RetryOutcome {
        match serde_json::from_slice::<T>(record.payload()) {
            Ok(event) => self.recover_event(cause, record, &event, attempts, guard),
            Err(err) => {
                let reason = format!("Retry exhausted: {cause}");
                error!(
                    topic = %record.topic,
                    offset = record.offset,
                    key = record.key().unwrap_or_default(),
                    payload = %record.payload_lossy(),
                    error = %err,
                    reason = %reason,
                    "retry record is undecodable, routing raw payload to fail topic"
                );

                let (tenant_id, entity_id) = salvage_key_fields::<T>(record.payload());
                let publish_key = key::resolve_for_recovery(
                    record.key(),
                    tenant_id.as_deref(),
                    entity_id.as_deref(),
                );
                let origin = RecordOrigin {
                    topic: record.topic.clone(),
                    partition: record.partition,
                    offset: record.offset,
                };
                self.publisher
                    .publish_failed_raw(&publish_key, record.payload(), &reason, &origin);

                drop(guard);
                RetryOutcome::Recovered {
                    key: publish_key,
                    attempts,
                    reason,
                }
            }
        }
    }

    fn recover_event<A: Acknowledgment>(
        &self,
        cause: RecoveryCause,
        record: &InboundRecord,
        event: &T,
        attempts: u32,
        guard: AckGuard<A>,
    ) -> RetryOutcome {
        let reason = format!("Retry exhausted: {cause}");
        error!(
            topic = %record.topic,
            offset = record.offset,
            key = record.key().unwrap_or_default(),
            attempts,
            reason = %reason,
            "retry attempts exhausted, routing to fail topic"
        );

        let publish_key = key::resolve_for_recovery(
            record.key(),
            Some(event.tenant_id()),
            Some(event.entity_id()),
        );
        self.publisher.publish_failed(&publish_key, event, &reason);

        drop(guard);
        RetryOutcome::Recovered {
            key: publish_key,
            attempts,
            reason,
        }
    }
}

/// Best-effort extraction of the key inputs from a payload that does not decode into `T`.
fn salvage_key_fields<T: DomainEvent>(payload: &[u8]) -> (Option<String>, Option<String>) {
    let Ok(serde_json::Value::Object(fields)) = serde_json::from_slice(payload) else {
        return (None, None);
    };
    let field = |name: &str| {
        fields
            .get(name)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };
    (field(T::TENANT_FIELD), field(T::ENTITY_FIELD))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use chrono::{DateTime, TimeZone, Utc};

    use super::*;
    use crate::in_memory_broker::InMemoryBroker;
    use crate::publisher::{FAILURE_REASON_HEADER, ORIGIN_OFFSET_HEADER, PublisherChannels};
    use crate::ActionKind;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Renamed {
        id: String,
        tenant_id: String,
        new_name: String,
        timestamp: DateTime<Utc>,
    }

    impl DomainEvent for Renamed {
        fn event_type(&self) -> &'static str {
            "test.renamed"
        }

        fn entity_id(&self) -> &str {
            &self.id
        }

        fn tenant_id(&self) -> &str {
            &self.tenant_id
        }

        fn action(&self) -> ActionKind {
            ActionKind::Updated
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.timestamp
        }
    }

    #[derive(Debug, Default)]
    struct CountingAck(Arc<AtomicU32>);

    impl Acknowledgment for CountingAck {
        fn acknowledge(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn setup(policy: RetryPolicy) -> (Arc<InMemoryBroker>, RetryConsumer<Renamed, Arc<InMemoryBroker>>) {
        let broker = Arc::new(InMemoryBroker::new());
        let publisher = Arc::new(EventPublisher::new(
            broker.clone(),
            PublisherChannels {
                main_topic: "renamed".to_string(),
                fail_topic: "renamed-fail".to_string(),
                retry_topic: "renamed-retry".to_string(),
                event_id: |e: &Renamed| e.id.clone(),
            },
        ));
        (broker, RetryConsumer::new(publisher, policy))
    }

    fn event() -> Renamed {
        Renamed {
            id: "product-1001".to_string(),
            tenant_id: "tenant-1001".to_string(),
            new_name: "Widget".to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn record(key: Option<&str>, payload: &[u8]) -> InboundRecord {
        InboundRecord {
            topic: "renamed-retry".to_string(),
            partition: 0,
            offset: 7,
            key: key.map(str::to_string),
            payload: Some(payload.to_vec()),
        }
    }

    #[test]
    fn valid_payload_is_republished_once_and_acknowledged_once() {
        let (broker, consumer) = setup(RetryPolicy::immediate(3));
        let acks = Arc::new(AtomicU32::new(0));
        let payload = serde_json::to_vec(&event()).unwrap();

        let outcome = consumer.retry(
            &record(Some("tenant-1001-product-1001"), &payload),
            CountingAck(acks.clone()),
        );

        assert_eq!(
            outcome,
            RetryOutcome::Republished {
                key: PublishKey::from_inbound("tenant-1001-product-1001"),
                attempts: 1
            }
        );
        assert_eq!(acks.load(Ordering::SeqCst), 1);
        let main = broker.records("renamed");
        assert_eq!(main.len(), 1);
        assert_eq!(serde_json::from_slice::<Renamed>(&main[0].payload).unwrap(), event());
        assert!(broker.records("renamed-fail").is_empty());
    }

    #[test]
    fn transient_failures_are_retried_until_success() {
        let (broker, consumer) = setup(RetryPolicy::immediate(3));
        broker.fail_next_send("renamed", BrokerError::Timeout("1".into()));
        broker.fail_next_send("renamed", BrokerError::Timeout("2".into()));
        let acks = Arc::new(AtomicU32::new(0));
        let payload = serde_json::to_vec(&event()).unwrap();

        let outcome = consumer.retry(&record(Some("k"), &payload), CountingAck(acks.clone()));

        assert_eq!(outcome.attempts(), 3);
        assert!(matches!(outcome, RetryOutcome::Republished { .. }));
        assert_eq!(acks.load(Ordering::SeqCst), 1);
        assert_eq!(broker.records("renamed").len(), 1);
    }

    #[test]
    fn exhausted_attempts_route_to_fail_and_acknowledge() {
        let (broker, consumer) = setup(RetryPolicy::immediate(2));
        broker.fail_next_send("renamed", BrokerError::Timeout("1".into()));
        broker.fail_next_send("renamed", BrokerError::Timeout("2".into()));
        let acks = Arc::new(AtomicU32::new(0));
        let payload = serde_json::to_vec(&event()).unwrap();

        let outcome = consumer.retry(&record(Some("k"), &payload), CountingAck(acks.clone()));

        assert_eq!(outcome.attempts(), 2);
        assert_eq!(acks.load(Ordering::SeqCst), 1);
        assert!(broker.records("renamed").is_empty());
        let failed = broker.records("renamed-fail");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].key, "k");
        assert_eq!(
            failed[0].header(FAILURE_REASON_HEADER),
            Some("Retry exhausted: timed out: 2")
        );
    }

    #[test]
    fn terminal_error_skips_remaining_attempts() {
        let (broker, consumer) = setup(RetryPolicy::immediate(5));
        broker.fail_next_send("renamed", BrokerError::Authorization("denied".into()));
        let acks = Arc::new(AtomicU32::new(0));
        let payload = serde_json::to_vec(&event()).unwrap();

        let outcome = consumer.retry(&record(Some("k"), &payload), CountingAck(acks.clone()));

        assert_eq!(outcome.attempts(), 1);
        assert_eq!(broker.attempted_topics(), vec!["renamed", "renamed-fail"]);
        assert_eq!(acks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn blank_inbound_key_is_rebuilt_from_payload() {
        let (broker, consumer) = setup(RetryPolicy::immediate(1));
        let payload = serde_json::to_vec(&event()).unwrap();

        consumer.retry(&record(Some(" "), &payload), CountingAck::default());

        assert_eq!(broker.records("renamed")[0].key, "tenant-1001-product-1001");
    }

    #[test]
    fn undecodable_payload_goes_straight_to_fail_topic() {
        let (broker, consumer) = setup(RetryPolicy::immediate(3));
        let acks = Arc::new(AtomicU32::new(0));

        let outcome = consumer.retry(&record(None, b"{not json"), CountingAck(acks.clone()));

        assert_eq!(outcome.attempts(), 0);
        assert_eq!(acks.load(Ordering::SeqCst), 1);
        assert!(broker.records("renamed").is_empty());
        let failed = broker.records("renamed-fail");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].payload, b"{not json".to_vec());
        assert!(failed[0].key.starts_with("unknown-"));
        assert_eq!(failed[0].header(ORIGIN_OFFSET_HEADER), Some("7"));
    }

    #[test]
    fn partially_valid_payload_salvages_key_fields() {
        let (broker, consumer) = setup(RetryPolicy::immediate(3));
        let payload = br#"{"id":"product-9","tenantId":"tenant-9","newName":42}"#;

        consumer.retry(&record(None, payload), CountingAck::default());

        assert_eq!(broker.records("renamed-fail")[0].key, "tenant-9-product-9");
    }

    #[test]
    fn recover_acknowledges_even_when_fail_topic_is_down() {
        let (broker, consumer) = setup(RetryPolicy::immediate(3));
        broker.fail_next_send("renamed-fail", BrokerError::Connection("down".into()));
        let acks = Arc::new(AtomicU32::new(0));
        let payload = serde_json::to_vec(&event()).unwrap();

        let outcome = consumer.recover(
            RecoveryCause::Exhausted(BrokerError::Timeout("exhausted".into())),
            &record(Some("k"), &payload),
            CountingAck(acks.clone()),
        );

        assert!(matches!(outcome, RetryOutcome::Recovered { .. }));
        assert_eq!(acks.load(Ordering::SeqCst), 1);
        assert!(broker.records("renamed-fail").is_empty());
    }

    #[test]
    fn recover_with_undecodable_payload_routes_to_fail_and_acknowledges_once() {
        let (broker, consumer) = setup(RetryPolicy::immediate(3));
        let acks = Arc::new(AtomicU32::new(0));

        consumer.recover(
            RecoveryCause::Undecodable("garbage".into()),
            &record(Some("tenant-2002-product-2002"), b"garbage"),
            CountingAck(acks.clone()),
        );

        assert_eq!(acks.load(Ordering::SeqCst), 1);
        let failed = broker.records("renamed-fail");
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].key, "tenant-2002-product-2002");
    }

    #[test]
    fn exponential_backoff_calculates_correctly() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_after_attempt(0), Duration::ZERO);
        assert_eq!(policy.delay_after_attempt(1), Duration::from_millis(300));
        assert_eq!(policy.delay_after_attempt(2), Duration::from_millis(600));
        assert_eq!(policy.delay_after_attempt(3), Duration::from_millis(1200));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy {
            max_delay: Duration::from_millis(1000),
            ..RetryPolicy::exponential(10, Duration::from_millis(300), 2.0)
        };

        assert_eq!(policy.delay_after_attempt(3), Duration::from_millis(1000));
        assert_eq!(policy.delay_after_attempt(9), Duration::from_millis(1000));
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = RetryPolicy::immediate(3);

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));

        // A zero budget still allows the first attempt.
        assert!(!RetryPolicy::immediate(0).should_retry(1));
    }
}
