// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ring buffer roundtrip benchmark.
//!
//! Measures write_frame/read_frame/release latency for several payload
//! sizes with reader and writer in the same process. The ring is sized so
//! each iteration wraps regularly, keeping the wrap path inside the
//! measurement.

#![allow(clippy::uninlined_format_args)]

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box as bb;
use std::time::Duration;
use zerobuffer::{BufferConfig, Reader, Writer};

fn unique_name(tag: &str) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    format!("zb_bench_{tag}_{}_{ts}", std::process::id())
}

fn bench_roundtrip_by_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("roundtrip_by_size");

    for size in [64usize, 1024, 4096, 65536] {
        let name = unique_name(&format!("rt{size}"));
        let mut reader =
            Reader::create(&name, BufferConfig::new(4096, 8 * 1024 * 1024)).expect("reader");
        let mut writer = Writer::connect(&name).expect("writer");
        let payload = vec![0xABu8; size];

        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                writer.write_frame(bb(&payload)).expect("write");
                let frame = reader
                    .read_frame(Duration::from_secs(1))
                    .expect("read")
                    .expect("frame");
                bb(frame.size());
            });
        });
    }

    group.finish();
}

fn bench_zero_copy_write(c: &mut Criterion) {
    let name = unique_name("zc");
    let mut reader =
        Reader::create(&name, BufferConfig::new(4096, 8 * 1024 * 1024)).expect("reader");
    let mut writer = Writer::connect(&name).expect("writer");

    c.bench_function("zero_copy_4k", |b| {
        b.iter(|| {
            let buf = writer.get_frame_buffer(4096).expect("reserve");
            buf[0] = 0x46;
            writer.commit_frame().expect("commit");
            let frame = reader
                .read_frame(Duration::from_secs(1))
                .expect("read")
                .expect("frame");
            bb(frame.data()[0]);
        });
    });
}

criterion_group!(benches, bench_roundtrip_by_size, bench_zero_copy_write);
criterion_main!(benches);
