//! In-memory broker for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::broker::{
    Acknowledgment, BrokerError, BrokerProducer, DeliveryCallback, DeliveryReceipt,
    InboundRecord, OutboundRecord, RecordSource,
};

#[derive(Debug)]
pub enum InMemoryBrokerError {
    /// Internal lock poisoning.
    Poisoned,
}

impl core::fmt::Display for InMemoryBrokerError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            InMemoryBrokerError::Poisoned => f.write_str("in-memory broker lock poisoned"),
        }
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, Vec<OutboundRecord>>,
    /// Errors to return from the next sends, per topic.
    faults: HashMap<String, VecDeque<BrokerError>>,
    /// Errors to report through the delivery callback of the next accepted sends.
    delivery_faults: HashMap<String, VecDeque<BrokerError>>,
    /// Every send attempt in order, successful or not.
    attempts: Vec<String>,
    /// Committed offset (next offset to read) per (topic, group).
    committed: HashMap<(String, String), i64>,
}

/// In-memory broker with topic logs, fault injection and manual commits.
///
/// - No IO
/// - Single partition (0) per topic
/// - Delivery callbacks run inline, after the record is stored (or dropped by an
///   injected delivery fault)
#[derive(Debug, Default)]
pub struct InMemoryBroker {
    state: Mutex<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next send to `topic` fail synchronously with `error`.
    ///
    /// Calls queue up: three calls fail the next three sends.
    pub fn fail_next_send(&self, topic: impl Into<String>, error: BrokerError) {
        if let Ok(mut state) = self.state.lock() {
            state.faults.entry(topic.into()).or_default().push_back(error);
        }
    }

    /// Accept the next send to `topic`, then report `error` through its delivery
    /// callback instead of storing the record.
    pub fn fail_next_delivery(&self, topic: impl Into<String>, error: BrokerError) {
        if let Ok(mut state) = self.state.lock() {
            state
                .delivery_faults
                .entry(topic.into())
                .or_default()
                .push_back(error);
        }
    }

    /// Records stored on `topic`, in offset order.
    pub fn records(&self, topic: &str) -> Vec<OutboundRecord> {
        self.state
            .lock()
            .map(|s| s.topics.get(topic).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Topics of every send attempt, in call order (including failed ones).
    pub fn attempted_topics(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.attempts.clone())
            .unwrap_or_default()
    }

    /// Append a record directly (bypasses fault injection), e.g. to seed a retry topic.
    pub fn append(&self, record: OutboundRecord) -> Result<i64, InMemoryBrokerError> {
        let mut state = self.state.lock().map_err(|_| InMemoryBrokerError::Poisoned)?;
        let log = state.topics.entry(record.topic.clone()).or_default();
        log.push(record);
        Ok(log.len() as i64 - 1)
    }

    /// Next offset a consumer group would read on `topic`, if it has committed.
    pub fn committed_offset(&self, topic: &str, group: &str) -> Option<i64> {
        self.state
            .lock()
            .ok()?
            .committed
            .get(&(topic.to_string(), group.to_string()))
            .copied()
    }

    /// Subscribe a consumer group to `topic`, starting from its committed offset.
    pub fn source(self: &Arc<Self>, topic: impl Into<String>, group: impl Into<String>) -> InMemorySource {
        let topic = topic.into();
        let group = group.into();
        let position = self.committed_offset(&topic, &group).unwrap_or(0);
        InMemorySource {
            broker: Arc::clone(self),
            topic,
            group,
            position,
        }
    }

    fn commit(&self, topic: &str, group: &str, offset: i64) {
        if let Ok(mut state) = self.state.lock() {
            let next = offset + 1;
            let slot = state
                .committed
                .entry((topic.to_string(), group.to_string()))
                .or_insert(next);
            *slot = (*slot).max(next);
        }
    }

    fn read_at(&self, topic: &str, offset: i64) -> Option<OutboundRecord> {
        let state = self.state.lock().ok()?;
        let index = usize::try_from(offset).ok()?;
        state.topics.get(topic)?.get(index).cloned()
    }
}

impl BrokerProducer for InMemoryBroker {
    fn send(&self, record: OutboundRecord, on_delivery: DeliveryCallback) -> Result<(), BrokerError> {
        let delivery = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| BrokerError::Retriable("in-memory broker lock poisoned".to_string()))?;

            state.attempts.push(record.topic.clone());

            if let Some(err) = state
                .faults
                .get_mut(&record.topic)
                .and_then(|queue| queue.pop_front())
            {
                return Err(err);
            }

            if let Some(err) = state
                .delivery_faults
                .get_mut(&record.topic)
                .and_then(|queue| queue.pop_front())
            {
                Err(err)
            } else {
                let topic = record.topic.clone();
                let log = state.topics.entry(topic.clone()).or_default();
                log.push(record);
                Ok(DeliveryReceipt {
                    topic,
                    partition: 0,
                    offset: log.len() as i64 - 1,
                })
            }
        };

        // Outside the lock: callbacks must not be able to deadlock the broker.
        on_delivery(delivery);
        Ok(())
    }
}

/// Consumer-group view of one in-memory topic.
#[derive(Debug)]
pub struct InMemorySource {
    broker: Arc<InMemoryBroker>,
    topic: String,
    group: String,
    position: i64,
}

/// Commits one in-memory record for a consumer group.
#[derive(Debug)]
pub struct InMemoryAck {
    broker: Arc<InMemoryBroker>,
    topic: String,
    group: String,
    offset: i64,
}

impl Acknowledgment for InMemoryAck {
    fn acknowledge(&mut self) {
        self.broker.commit(&self.topic, &self.group, self.offset);
    }
}

impl RecordSource for InMemorySource {
    type Ack = InMemoryAck;
    type Error = InMemoryBrokerError;

    fn poll(&mut self, timeout: Duration) -> Result<Option<(InboundRecord, Self::Ack)>, Self::Error> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(record) = self.broker.read_at(&self.topic, self.position) {
                let offset = self.position;
                self.position += 1;

                let inbound = InboundRecord {
                    topic: self.topic.clone(),
                    partition: 0,
                    offset,
                    key: Some(record.key),
                    payload: Some(record.payload),
                };
                let ack = InMemoryAck {
                    broker: Arc::clone(&self.broker),
                    topic: self.topic.clone(),
                    group: self.group.clone(),
                    offset,
                };
                return Ok(Some((inbound, ack)));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(5)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> DeliveryCallback {
        Box::new(|_| {})
    }

    #[test]
    fn send_stores_record_and_reports_offset() {
        let broker = InMemoryBroker::new();
        let (tx, rx) = std::sync::mpsc::channel();

        broker
            .send(
                OutboundRecord::new("t", "k", b"1".to_vec()),
                Box::new(move |r| {
                    let _ = tx.send(r);
                }),
            )
            .unwrap();

        let receipt = rx.recv().unwrap().unwrap();
        assert_eq!(receipt.topic, "t");
        assert_eq!(receipt.offset, 0);
        assert_eq!(broker.records("t").len(), 1);
    }

    #[test]
    fn injected_faults_are_consumed_in_order() {
        let broker = InMemoryBroker::new();
        broker.fail_next_send("t", BrokerError::Timeout("first".into()));

        let first = broker.send(OutboundRecord::new("t", "k", vec![]), noop());
        let second = broker.send(OutboundRecord::new("t", "k", vec![]), noop());

        assert!(matches!(first, Err(BrokerError::Timeout(_))));
        assert!(second.is_ok());
        assert_eq!(broker.attempted_topics(), vec!["t", "t"]);
        assert_eq!(broker.records("t").len(), 1);
    }

    #[test]
    fn delivery_fault_accepts_the_send_but_drops_the_record() {
        let broker = InMemoryBroker::new();
        broker.fail_next_delivery("t", BrokerError::Rejected("message too large".into()));
        let (tx, rx) = std::sync::mpsc::channel();

        let accepted = broker.send(
            OutboundRecord::new("t", "k", b"1".to_vec()),
            Box::new(move |r| {
                let _ = tx.send(r);
            }),
        );

        assert!(accepted.is_ok());
        assert!(matches!(rx.recv().unwrap(), Err(BrokerError::Rejected(_))));
        assert!(broker.records("t").is_empty());

        broker.send(OutboundRecord::new("t", "k", b"2".to_vec()), noop()).unwrap();
        assert_eq!(broker.records("t").len(), 1);
    }

    #[test]
    fn source_reads_in_order_and_commits_on_ack() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.append(OutboundRecord::new("r", "k1", b"a".to_vec())).unwrap();
        broker.append(OutboundRecord::new("r", "k2", b"b".to_vec())).unwrap();

        let mut source = broker.source("r", "g");
        let (first, mut ack) = source.poll(Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(first.key(), Some("k1"));
        assert_eq!(broker.committed_offset("r", "g"), None);

        ack.acknowledge();
        assert_eq!(broker.committed_offset("r", "g"), Some(1));

        let (second, _ack) = source.poll(Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(second.payload(), b"b");
        assert!(source.poll(Duration::from_millis(10)).unwrap().is_none());
    }

    #[test]
    fn new_source_resumes_from_committed_offset() {
        let broker = Arc::new(InMemoryBroker::new());
        broker.append(OutboundRecord::new("r", "k1", b"a".to_vec())).unwrap();
        broker.append(OutboundRecord::new("r", "k2", b"b".to_vec())).unwrap();

        let mut source = broker.source("r", "g");
        let (_, mut ack) = source.poll(Duration::ZERO).unwrap().unwrap();
        ack.acknowledge();

        let mut resumed = broker.source("r", "g");
        let (record, _) = resumed.poll(Duration::ZERO).unwrap().unwrap();
        assert_eq!(record.offset, 1);
    }
}
