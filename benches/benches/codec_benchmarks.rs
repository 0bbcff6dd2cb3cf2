use std::{collections::BTreeMap, hint::black_box};

use bytes::BytesMut;
use chanbus::{
    broker::resp::{decode, encode, Frame},
    complex_keys, EnvelopeCodec, Message,
};
use criterion::{criterion_group, criterion_main, Criterion};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PriceUpdate {
    symbol: String,
    price: i64,
}

impl Message for PriceUpdate {
    const TAG: &'static str = "PriceUpdate";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Book {
    #[serde(with = "complex_keys")]
    levels: BTreeMap<(u8, i64), u32>,
    note: Option<String>,
}

impl Message for Book {
    const TAG: &'static str = "Book";
}

fn codec() -> EnvelopeCodec {
    let codec = EnvelopeCodec::new();
    codec.register::<PriceUpdate>().unwrap();
    codec.register::<Book>().unwrap();
    codec
}

fn bench_envelope_small(c: &mut Criterion) {
    let codec = codec();
    let msg = PriceUpdate {
        symbol: "X".into(),
        price: 10,
    };
    let text = codec.encode(&msg).unwrap();

    c.bench_function("envelope encode small", |b| {
        b.iter(|| black_box(codec.encode(black_box(&msg)).unwrap()))
    });
    c.bench_function("envelope decode small", |b| {
        b.iter(|| black_box(codec.decode(black_box(&text)).unwrap()))
    });
}

fn bench_envelope_complex_keys(c: &mut Criterion) {
    let codec = codec();
    let book = Book {
        levels: (0..100).map(|i| ((i % 2, i as i64), i as u32)).collect(),
        note: None,
    };
    let text = codec.encode(&book).unwrap();

    c.bench_function("envelope decode 100 levels", |b| {
        b.iter(|| black_box(codec.decode(black_box(&text)).unwrap()))
    });
}

fn bench_resp_push(c: &mut Criterion) {
    let push = Frame::command([
        "message",
        "ticks",
        r#"{"type":"PriceUpdate","data":{"symbol":"X","price":10}}"#,
    ]);
    let mut wire = BytesMut::new();
    encode(&push, &mut wire).unwrap();

    c.bench_function("resp decode push", |b| {
        b.iter(|| black_box(decode(black_box(&wire)).unwrap()))
    });
}

criterion_group!(
    benches,
    bench_envelope_small,
    bench_envelope_complex_keys,
    bench_resp_push
);
criterion_main!(benches);
