use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;

use catalog_core::DomainError;
use catalog_events::{BrokerError, InMemoryBroker, InMemorySource};
use catalog_infra::RelayConfig;
use catalog_products::{Category, ProductSnapshot, ProductUpserted, Unit};
use catalog_relay::{Relay, RelayError};

const GROUP: &str = "relay-test";

fn config(overrides: &[(&str, &str)]) -> RelayConfig {
    let mut vars: HashMap<String, String> = HashMap::from([
        ("CATALOG_TENANT_ID".to_string(), "tenant-42".to_string()),
        ("CATALOG_CONSUMER_GROUP".to_string(), GROUP.to_string()),
        ("CATALOG_RETRY_INITIAL_DELAY_MS".to_string(), "1".to_string()),
        ("CATALOG_RETRY_MAX_DELAY_MS".to_string(), "5".to_string()),
    ]);
    for (k, v) in overrides {
        vars.insert(k.to_string(), v.to_string());
    }
    RelayConfig::from_lookup(|var| vars.get(var).cloned()).expect("valid test configuration")
}

fn start(
    config: &RelayConfig,
    broker: &Arc<InMemoryBroker>,
) -> Result<Relay<Arc<InMemoryBroker>>, RelayError> {
    let sources = Arc::clone(broker);
    Relay::start(config, Arc::clone(broker), move |topic| -> Result<InMemorySource, BrokerError> {
        Ok(sources.source(topic, GROUP))
    })
}

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if condition() {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("condition not reached in time");
}

fn snapshot() -> ProductSnapshot {
    ProductSnapshot {
        id: "product-1".to_string(),
        name: "Kettle".to_string(),
        article_number: "K-1".to_string(),
        category: Category::Household,
        unit: Unit::Piece,
        price: 24.5,
        description: None,
    }
}

#[test]
fn relay_spawns_one_worker_per_retry_topic() {
    let broker = Arc::new(InMemoryBroker::new());
    let relay = start(&config(&[]), &broker).unwrap();

    assert_eq!(
        relay.worker_names(),
        vec!["retry:product-upsert-retry", "retry:product-delete-retry"]
    );
    relay.shutdown();
}

#[test]
fn emitted_event_recovers_through_the_retry_worker() {
    let broker = Arc::new(InMemoryBroker::new());
    let relay = start(&config(&[]), &broker).unwrap();
    broker.fail_next_send("product-upsert", BrokerError::QueueFull("local queue full".into()));

    let key = relay
        .emitter()
        .product_saved(&snapshot(), false, Utc::now())
        .unwrap();
    assert_eq!(key.as_str(), "tenant-42-product-1");

    wait_until(|| broker.committed_offset("product-upsert-retry", GROUP) == Some(1));
    relay.shutdown();

    let main = broker.records("product-upsert");
    assert_eq!(main.len(), 1);
    let event: ProductUpserted = serde_json::from_slice(&main[0].payload).unwrap();
    assert_eq!(event.tenant_id.as_str(), "tenant-42");
    assert!(broker.records("product-upsert-fail").is_empty());
}

#[test]
fn configured_topic_names_are_used() {
    let broker = Arc::new(InMemoryBroker::new());
    let relay = start(
        &config(&[
            ("CATALOG_TOPIC_DELETE", "catalog.product.deleted"),
            ("CATALOG_TOPIC_DELETE_FAIL", "catalog.product.deleted.dlq"),
        ]),
        &broker,
    )
    .unwrap();
    broker.fail_next_send(
        "catalog.product.deleted",
        BrokerError::Rejected("MESSAGE_SIZE_TOO_LARGE".into()),
    );

    relay.emitter().product_deleted("product-1", Utc::now()).unwrap();
    relay.shutdown();

    assert_eq!(broker.records("catalog.product.deleted.dlq").len(), 1);
}

#[test]
fn blank_ids_are_reported_to_the_caller() {
    let broker = Arc::new(InMemoryBroker::new());
    let relay = start(&config(&[]), &broker).unwrap();

    let err = relay.emitter().product_deleted("", Utc::now()).unwrap_err();
    relay.shutdown();

    assert!(matches!(err, DomainError::Validation(_)));
    assert!(broker.attempted_topics().is_empty());
}

#[test]
fn source_failures_abort_startup() {
    let broker = Arc::new(InMemoryBroker::new());
    let result = Relay::start(&config(&[]), Arc::clone(&broker), |_topic| {
        Err::<InMemorySource, _>(BrokerError::Connection("connection refused".into()))
    });

    assert!(matches!(result, Err(RelayError::Broker(BrokerError::Connection(_)))));
}
