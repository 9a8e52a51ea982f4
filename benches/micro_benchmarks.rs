//! # Micro Benchmarks
//!
//! Fine-grained benchmarks for individual shaping operations.
//!
//! Run with: `cargo bench --bench micro_benchmarks`

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use shaper::{
    current_time_ms, current_time_ns, current_time_us, AdaptiveConfig, BucketConfig,
    DatagramSocket, ShaperBuilder, TokenBucket,
};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Socket stand-in that discards every datagram.
struct NullSocket;

impl DatagramSocket for NullSocket {
    fn send_to(&self, buf: &[u8], _addr: SocketAddr) -> io::Result<usize> {
        Ok(buf.len())
    }
}

/// Benchmark time functions
fn bench_time_functions(c: &mut Criterion) {
    let mut group = c.benchmark_group("time_functions");

    group.bench_function("current_time_ms", |b| {
        b.iter(|| black_box(current_time_ms()));
    });

    group.bench_function("current_time_us", |b| {
        b.iter(|| black_box(current_time_us()));
    });

    group.bench_function("current_time_ns", |b| {
        b.iter(|| black_box(current_time_ns()));
    });

    group.bench_function("std_instant_now", |b| {
        b.iter(|| black_box(std::time::Instant::now()));
    });

    group.finish();
}

/// Benchmark available() with different fill levels
fn bench_available(c: &mut Criterion) {
    let mut group = c.benchmark_group("available");

    group.bench_function("full_bucket", |b| {
        let bucket = TokenBucket::new(1e6, 1.0).unwrap();
        b.iter(|| black_box(bucket.available()));
    });

    group.bench_function("empty_bucket", |b| {
        // 1 B/s refill keeps it empty for the whole run.
        let bucket = TokenBucket::new(1.0, 100.0).unwrap();
        let _ = bucket.try_consume(100.0);
        b.iter(|| black_box(bucket.available()));
    });

    group.bench_function("half_full_bucket", |b| {
        let bucket = TokenBucket::new(1.0, 100.0).unwrap();
        let _ = bucket.try_consume(50.0);
        b.iter(|| black_box(bucket.available()));
    });

    group.finish();
}

/// Benchmark wait_hint
fn bench_wait_hint(c: &mut Criterion) {
    let mut group = c.benchmark_group("wait_hint");

    group.bench_function("satisfiable", |b| {
        let bucket = TokenBucket::new(1e6, 1.0).unwrap();
        b.iter(|| black_box(bucket.wait_hint(1000.0)));
    });

    group.bench_function("needs_wait", |b| {
        let bucket = TokenBucket::new(1.0, 1000.0).unwrap();
        let _ = bucket.try_consume(1000.0);
        b.iter(|| black_box(bucket.wait_hint(500.0)));
    });

    group.finish();
}

/// Benchmark idle checks
fn bench_is_idle(c: &mut Criterion) {
    let mut group = c.benchmark_group("is_idle");

    group.bench_function("recently_active", |b| {
        let bucket = TokenBucket::new(1e6, 1.0).unwrap();
        let _ = bucket.try_consume(100.0);

        b.iter(|| black_box(bucket.is_idle(Duration::from_secs(1))));
    });

    group.bench_function("long_idle", |b| {
        let bucket = TokenBucket::new(1e6, 1.0).unwrap();

        b.iter(|| black_box(bucket.is_idle(Duration::ZERO)));
    });

    group.finish();
}

/// Benchmark metrics snapshots across activity patterns
fn bench_metrics_calculation(c: &mut Criterion) {
    let mut group = c.benchmark_group("metrics_calc");

    let scenarios = [
        ("no_activity", 0usize, 0usize),
        ("all_granted", 1000, 0),
        ("all_denied", 0, 1000),
        ("mixed_50_50", 500, 500),
    ];

    for (name, granted, denied) in scenarios {
        group.bench_function(name, |b| {
            // 1 B/s refill so the prepared state barely drifts.
            let bucket = TokenBucket::new(1.0, 10_000.0).unwrap();

            for _ in 0..granted {
                let _ = bucket.try_consume(10.0);
            }
            while bucket.try_consume(1000.0).unwrap() {}
            for _ in 0..denied {
                let _ = bucket.try_consume(1000.0);
            }

            b.iter(|| black_box(bucket.metrics()));
        });
    }

    group.finish();
}

/// Benchmark lock contention on one bucket
fn bench_lock_contention(c: &mut Criterion) {
    let mut group = c.benchmark_group("lock_contention");

    for (name, num_threads) in [("low_contention", 2), ("medium_contention", 8), ("high_contention", 32)] {
        group.bench_function(name, |b| {
            let bucket = Arc::new(TokenBucket::new(1e9, 1.0).unwrap());

            b.iter_custom(|iters| {
                let start = std::time::Instant::now();

                for _ in 0..iters {
                    let bucket_clone = bucket.clone();
                    let handles: Vec<_> = (0..num_threads)
                        .map(|_| {
                            let bucket = bucket_clone.clone();
                            thread::spawn(move || {
                                for _ in 0..10 {
                                    let _ = bucket.try_consume(100.0);
                                }
                            })
                        })
                        .collect();

                    for handle in handles {
                        handle.join().unwrap();
                    }
                }

                start.elapsed()
            });
        });
    }

    group.finish();
}

/// Benchmark configuration validation and conversions
fn bench_config_validation(c: &mut Criterion) {
    let mut group = c.benchmark_group("config_validation");

    group.bench_function("valid_config", |b| {
        b.iter(|| {
            let config = BucketConfig::new(256.0, 1.0);
            black_box(config.validate())
        });
    });

    group.bench_function("invalid_config", |b| {
        b.iter(|| {
            let config = BucketConfig::new(0.0, 1.0);
            black_box(config.validate())
        });
    });

    group.bench_function("adaptive_config", |b| {
        b.iter(|| {
            let config = AdaptiveConfig::new(0.5, 1.0);
            black_box(config.validate())
        });
    });

    group.bench_function("rate_conversion", |b| {
        let config = BucketConfig::new(256.0, 2.0);
        b.iter(|| black_box((config.rate_bytes_per_sec(), config.capacity_bytes())));
    });

    group.finish();
}

/// Benchmark builder pattern
fn bench_builder_pattern(c: &mut Criterion) {
    let mut group = c.benchmark_group("builder");

    group.bench_function("builder_wrap", |b| {
        b.iter(|| {
            let transport = ShaperBuilder::new()
                .rate_kbps(256.0)
                .burst_seconds(1.0)
                .try_wrap(NullSocket)
                .unwrap();
            black_box(transport)
        });
    });

    group.finish();
}

criterion_group!(
    micro_benches,
    bench_time_functions,
    bench_available,
    bench_wait_hint,
    bench_is_idle,
    bench_metrics_calculation,
    bench_lock_contention,
    bench_config_validation,
    bench_builder_pattern,
);

criterion_main!(micro_benches);
