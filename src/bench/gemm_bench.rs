//! Criterion benchmarks for the hot GEMM entry points.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use qmatmul::{detect_flags, f32_to_bf16, gemm_bf16, gemm_f32, gemm_q8_q4};

fn bench_gemm_f32(c: &mut Criterion) {
    let flags = detect_flags();
    let mut group = c.benchmark_group("gemm_f32");

    for size in [256usize, 512, 1024] {
        let (m, n, k) = (size, size, size);
        let a: Vec<f32> = (0..m * k).map(|i| (i % 100) as f32).collect();
        let b: Vec<f32> = (0..n * k).map(|i| (i % 100) as f32).collect();
        let mut r = vec![0.0f32; m * n];

        group.throughput(Throughput::Elements((2 * m * n * k) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |bench, _| {
            bench.iter(|| gemm_f32(flags, &a, 0, &b, 0, &mut r, 0, m, 0, n, k, k, k, n));
        });
    }
    group.finish();
}

fn bench_gemm_q8_q4(c: &mut Criterion) {
    let flags = detect_flags();
    let mut group = c.benchmark_group("gemm_q8_q4");

    for size in [256usize, 512, 1024] {
        let (m, n, k) = (size, size, size);
        let a: Vec<i8> = (0..m * k).map(|i| (i % 29) as i8 - 14).collect();
        let af: Vec<f32> = (0..m * (k / 32)).map(|i| (i % 7) as f32 * 0.25 + 0.5).collect();
        let b: Vec<u8> = (0..n * k / 2).map(|i| ((i * 7 + 3) % 256) as u8).collect();
        let bf: Vec<f32> = (0..n * (k / 32)).map(|i| (i % 5) as f32 * 0.25 + 0.5).collect();
        let mut r = vec![0.0f32; m * n];

        group.throughput(Throughput::Elements((2 * m * n * k) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |bench, _| {
            bench.iter(|| {
                gemm_q8_q4(
                    flags,
                    &af,
                    &a,
                    0,
                    &bf,
                    &b,
                    0,
                    &mut r,
                    0,
                    m,
                    0,
                    n,
                    k,
                    k,
                    k / 32,
                    k / 2,
                    k / 32,
                    n,
                )
            });
        });
    }
    group.finish();
}

fn bench_gemm_bf16(c: &mut Criterion) {
    let flags = detect_flags();
    let mut group = c.benchmark_group("gemm_bf16");

    for size in [256usize, 512, 1024] {
        let (m, n, k) = (size, size, size);
        let a: Vec<u16> = (0..m * k).map(|i| f32_to_bf16((i % 100) as f32)).collect();
        let b: Vec<u16> = (0..n * k).map(|i| f32_to_bf16((i % 100) as f32)).collect();
        let mut r = vec![0.0f32; m * n];

        group.throughput(Throughput::Elements((2 * m * n * k) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |bench, _| {
            bench.iter(|| gemm_bf16(flags, &a, 0, &b, 0, None, &mut r, 0, m, 0, n, k, k, k, n));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_gemm_f32, bench_gemm_q8_q4, bench_gemm_bf16);
criterion_main!(benches);
