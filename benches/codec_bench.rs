//! Benchmarks for masking and the frame codec
//!
//! Run with: cargo bench

use bytes::{Bytes, BytesMut};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use boardws::frame::{OpCode, encode_frame, read_frame, write_frame};
use boardws::mask::apply_mask;
use boardws::payload::BinaryParts;

/// Benchmark mask application
fn bench_mask(c: &mut Criterion) {
    let mut group = c.benchmark_group("mask");

    for size in [64, 256, 1024, 4096, 16384, 65536] {
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("apply_mask", size), &size, |b, &size| {
            let mut data = vec![0x42u8; size];
            let mask = [0x37, 0xfa, 0x21, 0x3d];

            b.iter(|| {
                apply_mask(black_box(&mut data), black_box(mask));
            });
        });
    }

    group.finish();
}

/// Benchmark reading unmasked server frames
fn bench_read(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let mut group = c.benchmark_group("read_frame");

    for size in [8, 125, 1024, 65536] {
        let payload: Vec<u8> = (0..size).map(|i| (i % 256) as u8).collect();
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, OpCode::Binary, &payload, true, None);
        let frame_data = buf.freeze();
        group.throughput(Throughput::Bytes(frame_data.len() as u64));

        group.bench_with_input(BenchmarkId::new("unmasked", size), &frame_data, |b, data| {
            b.to_async(&rt).iter(|| async {
                let mut reader = &data[..];
                read_frame(&mut reader, usize::MAX).await.unwrap()
            });
        });
    }

    group.finish();
}

/// Benchmark streaming masked writes of multi-part frames
fn bench_write(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();
    let mut group = c.benchmark_group("write_frame");

    for size in [125, 4096, 65536, 1024 * 1024] {
        let payload = Bytes::from(vec![0x5au8; size]);
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("multi_part", size), &payload, |b, payload| {
            b.to_async(&rt).iter(|| async {
                let mut parts = BinaryParts::default();
                parts.push_byte(1);
                parts.push_text("thread:");
                parts.push_bytes(payload.clone());

                let mut out = Vec::with_capacity(payload.len() + 32);
                let mut chunk = BytesMut::with_capacity(16 * 1024);
                write_frame(
                    &mut out,
                    parts.into_frame(),
                    [0x37, 0xfa, 0x21, 0x3d],
                    &mut chunk,
                    16 * 1024,
                )
                .await
                .unwrap();
                black_box(out)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_mask, bench_read, bench_write);
criterion_main!(benches);
