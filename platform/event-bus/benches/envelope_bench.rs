use criterion::{black_box, criterion_group, criterion_main, Criterion};
use event_bus::{decode_payload, encode_payload, DomainEvent, EventEnvelope, InMemoryBus};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParcelScanned {
    parcel_id: String,
    depot: String,
    weight_grams: u32,
}

impl DomainEvent for ParcelScanned {
    const EVENT_TYPE: &'static str = "ParcelScanned";
}

fn random_key(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn sample_envelope() -> EventEnvelope<ParcelScanned> {
    EventEnvelope::new(
        "bench",
        ParcelScanned {
            parcel_id: random_key(12),
            depot: "AMS-1".to_string(),
            weight_grams: rand::thread_rng().gen_range(100..30_000),
        },
    )
    .with_correlation_id(Some(random_key(16)))
}

fn bench_encode(c: &mut Criterion) {
    let envelope = sample_envelope();
    c.bench_function("encode_envelope", |b| {
        b.iter(|| encode_payload(black_box(&envelope)))
    });
}

fn bench_decode(c: &mut Criterion) {
    let payload = encode_payload(&sample_envelope()).expect("encode");
    c.bench_function("decode_envelope", |b| {
        b.iter(|| decode_payload::<EventEnvelope<ParcelScanned>>(black_box(payload.as_bytes())))
    });

    let pascal = payload.replace("\"parcelId\"", "\"ParcelId\"");
    c.bench_function("decode_envelope_pascal_case", |b| {
        b.iter(|| decode_payload::<EventEnvelope<ParcelScanned>>(black_box(pascal.as_bytes())))
    });
}

fn bench_partitioner(c: &mut Criterion) {
    let bus = InMemoryBus::with_partitions(12);
    let keys: Vec<String> = (0..1024).map(|_| random_key(24)).collect();
    c.bench_function("partition_for_1024_keys", |b| {
        b.iter(|| {
            keys.iter()
                .map(|key| bus.partition_for(black_box(key)))
                .sum::<i32>()
        })
    });
}

criterion_group!(benches, bench_encode, bench_decode, bench_partitioner);
criterion_main!(benches);
