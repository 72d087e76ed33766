//! Envelope codec throughput benchmark.
//!
//! Measures encode/decode and decode+resolve latency across body sizes
//! using Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pylon_core::envelope::{codec, Envelope, ObjectKind, MIME_TEXT};
use pylon_core::io::MemoryBlobStore;
use pylon_core::payload::PayloadResolver;
use pylon_core::LineageId;
use std::sync::Arc;

const BODY_SIZES: &[usize] = &[0, 64, 1024, 65536, 1024 * 1024];

fn envelope(size: usize) -> Envelope {
    Envelope::raw_content(MIME_TEXT, "x".repeat(size.max(1))).with_lineage_id(LineageId::new())
}

fn bench_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode");
    for &size in BODY_SIZES {
        let env = envelope(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &env, |b, e| {
            b.iter(|| codec::encode(black_box(e)).unwrap());
        });
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    for &size in BODY_SIZES {
        let wire = codec::encode(&envelope(size)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &wire, |b, w| {
            b.iter(|| codec::decode(black_box(w)).unwrap());
        });
    }
    group.finish();
}

fn bench_decode_and_resolve(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("decode_and_resolve");
    for &size in BODY_SIZES {
        let blobs = Arc::new(MemoryBlobStore::new());
        rt.block_on(blobs.insert("memory://blob/bench", "y".repeat(size)));
        let resolver = PayloadResolver::new(blobs);
        let wire = codec::encode(&Envelope::external(
            ObjectKind::RawContent,
            MIME_TEXT,
            "memory://blob/bench",
        ))
        .unwrap();

        group.bench_with_input(BenchmarkId::from_parameter(size), &wire, |b, w| {
            b.iter(|| rt.block_on(resolver.decode_and_resolve(black_box(w))).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode, bench_decode_and_resolve);
criterion_main!(benches);
