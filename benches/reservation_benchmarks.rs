use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::time::Duration;
use uuid::Uuid;

use stateset_saga::events::outbox::topic_for;
use stateset_saga::events::{EventData, EventEnvelope, OrderItemPayload};
use stateset_saga::saga::payment_simulator;

// The deterministic payment decision is on the hot path of every
// inventory.reserved consumption; it should stay cheap even as the
// decline modulus grows.
fn payment_decision_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("payment_decision");

    for modulus in [7_i64, 13, 97].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(modulus), modulus, |b, &modulus| {
            let total = dec!(129.99);
            b.iter(|| payment_simulator::decide(black_box(total), black_box(modulus)));
        });
    }

    group.finish();
}

// OrderSubmit's dedupe-then-sum pass over a submit request's item lines.
fn dedupe_then_sum_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("dedupe_then_sum");

    for size in [5, 25, 100].iter() {
        let ids: Vec<Uuid> = (0..*size / 3).map(|_| Uuid::new_v4()).collect();
        let lines: Vec<(Uuid, i32)> = (0..*size)
            .map(|i| (ids[i % ids.len()], 1))
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(size), &lines, |b, lines| {
            b.iter(|| {
                let mut quantities: HashMap<Uuid, i32> = HashMap::new();
                for (product_id, quantity) in lines {
                    *quantities.entry(*product_id).or_insert(0) += quantity;
                }
                black_box(quantities)
            });
        });
    }

    group.finish();
}

// Outbox envelopes are serialized to JSON once per enqueue and once per
// relay publish; both round trips matter for relay throughput.
fn outbox_envelope_roundtrip_benchmark(c: &mut Criterion) {
    let envelope = EventEnvelope::new(EventData::OrdersCreated {
        order_id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        items: vec![
            OrderItemPayload { product_id: Uuid::new_v4(), quantity: 2 },
            OrderItemPayload { product_id: Uuid::new_v4(), quantity: 1 },
        ],
        total: Decimal::new(19999, 2),
        currency: "USD".to_string(),
    });

    c.bench_function("outbox_envelope_serialize", |b| {
        b.iter(|| black_box(serde_json::to_string(&envelope).unwrap()));
    });

    let serialized = serde_json::to_string(&envelope).unwrap();
    c.bench_function("outbox_envelope_deserialize", |b| {
        b.iter(|| {
            let decoded: EventEnvelope = serde_json::from_str(&serialized).unwrap();
            black_box(decoded)
        });
    });

    c.bench_function("outbox_topic_for", |b| {
        b.iter(|| black_box(topic_for(black_box(&envelope.data))));
    });
}

fn order_id_generation_benchmark(c: &mut Criterion) {
    c.bench_function("order_id_v4_generation", |b| {
        b.iter(|| black_box(Uuid::new_v4()));
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .measurement_time(Duration::from_secs(10))
        .sample_size(100);
    targets =
        payment_decision_benchmark,
        dedupe_then_sum_benchmark,
        outbox_envelope_roundtrip_benchmark,
        order_id_generation_benchmark
}

criterion_main!(benches);
