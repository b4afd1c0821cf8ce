use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::Utc;
use catalog_core::{EntityId, TenantId};
use catalog_events::{
    ActionKind, BrokerError, BrokerProducer, DeliveryCallback, DeliveryReceipt, EventPublisher,
    InMemoryBroker, OutboundRecord, key,
};
use catalog_products::{Category, ProductUpserted, ProductTopics, Unit, upsert_channels};
use std::sync::Arc;

/// Producer that accepts every record and reports delivery immediately, so the
/// benchmark measures the publisher itself rather than broker bookkeeping.
#[derive(Debug, Default)]
struct NullProducer;

impl BrokerProducer for NullProducer {
    fn send(&self, record: OutboundRecord, on_delivery: DeliveryCallback) -> Result<(), BrokerError> {
        on_delivery(Ok(DeliveryReceipt {
            topic: record.topic,
            partition: 0,
            offset: 0,
        }));
        Ok(())
    }
}

fn event(i: usize) -> ProductUpserted {
    ProductUpserted {
        id: EntityId::new(format!("product-{i}")).unwrap(),
        name: "Benchmark product".to_string(),
        article_number: format!("BP-{i}"),
        category: Category::Electronics,
        unit: Unit::Piece,
        price: 19.99,
        description: Some("A product used to measure publish overhead".to_string()),
        timestamp: Utc::now(),
        product_action: ActionKind::Created,
        tenant_id: TenantId::new("tenant-bench").unwrap(),
    }
}

fn bench_key_resolution(c: &mut Criterion) {
    c.bench_function("key_resolve", |b| {
        b.iter(|| key::resolve(black_box(Some("tenant-bench")), black_box(Some("product-42"))))
    });
}

fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish");
    let topics = ProductTopics::default();

    for &batch in &[1usize, 100, 1_000] {
        let events: Vec<_> = (0..batch).map(event).collect();
        let keys: Vec<_> = events
            .iter()
            .map(|e| key::resolve_event(e).unwrap())
            .collect();
        group.throughput(Throughput::Elements(batch as u64));

        let publisher = EventPublisher::new(NullProducer, upsert_channels(&topics));
        group.bench_with_input(BenchmarkId::new("null_producer", batch), &batch, |b, _| {
            b.iter(|| {
                for (key, event) in keys.iter().zip(&events) {
                    publisher.publish(black_box(key), black_box(event));
                }
            })
        });

        group.bench_with_input(BenchmarkId::new("in_memory_broker", batch), &batch, |b, _| {
            b.iter_with_setup(
                || EventPublisher::new(Arc::new(InMemoryBroker::new()), upsert_channels(&topics)),
                |publisher| {
                    for (key, event) in keys.iter().zip(&events) {
                        publisher.publish(key, event);
                    }
                },
            )
        });
    }

    group.finish();
}

fn bench_transient_reroute(c: &mut Criterion) {
    let topics = ProductTopics::default();
    let event = event(0);
    let key = key::resolve_event(&event).unwrap();

    c.bench_function("publish_transient_reroute", |b| {
        b.iter_with_setup(
            || {
                let broker = Arc::new(InMemoryBroker::new());
                broker.fail_next_send(
                    topics.upsert.as_str(),
                    BrokerError::Timeout("bench".to_string()),
                );
                EventPublisher::new(broker, upsert_channels(&topics))
            },
            |publisher| publisher.publish(&key, &event),
        )
    });
}

criterion_group!(benches, bench_key_resolution, bench_publish, bench_transient_reroute);
criterion_main!(benches);
