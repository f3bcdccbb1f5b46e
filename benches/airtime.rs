use criterion::{black_box, criterion_group, criterion_main, Criterion};

use lora_linktest::protocol::airtime::{airtime_ms, packet_timeout};
use lora_linktest::protocol::{Message, MessageCodec};
use lora_linktest::{ProtocolConfig, RadioConfig, TestDefinition};

fn bench_airtime(c: &mut Criterion) {
    let config = RadioConfig {
        spreading_factor: 12,
        coding_rate_denom: 8,
        ..RadioConfig::BASE
    };
    let protocol = ProtocolConfig::default();

    c.bench_function("airtime_sf12_20b", |b| {
        b.iter(|| airtime_ms(black_box(&config), black_box(20)))
    });
    c.bench_function("packet_timeout_sf12_255b", |b| {
        b.iter(|| packet_timeout(black_box(&config), black_box(255), &protocol))
    });
}

fn bench_codec(c: &mut Criterion) {
    let definition = TestDefinition::new("bench", 3, 100, 60, RadioConfig::BASE).unwrap();
    let mut codec = MessageCodec::new();

    c.bench_function("encode_definition", |b| {
        b.iter(|| {
            let message = Message::definition(black_box(&definition)).unwrap();
            codec.encode_message(message).unwrap()
        })
    });
}

criterion_group!(benches, bench_airtime, bench_codec);
criterion_main!(benches);
