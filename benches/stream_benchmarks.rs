use chrono::{DateTime, Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use trailtrack::database::CompressedRoute;
use trailtrack::processor::{LocationStreamProcessor, ProcessorConfig};
use trailtrack::session::TrackerSettings;
use trailtrack::simulation::{replay_track, MemoryStore, ReplayOptions};
use trailtrack::{geo, LocationSample, MemoryMirror, WorkoutType};

/// Throughput benchmarks for the per-sample hot path.
///
/// Tracks are synthetic runs with a little positional noise and an
/// occasional low-accuracy fix so that every gate is exercised.

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap()
}

fn create_track(points: usize) -> Vec<LocationSample> {
    (0..points)
        .map(|i| {
            let jitter = ((i * 7919) % 13) as f64 / 10.0 - 0.6;
            let north = 3.0 * i as f64 + jitter;
            let accuracy = if i % 17 == 0 { 65.0 } else { 6.0 };
            LocationSample::new(
                47.0 + north / 111_194.93,
                8.0,
                accuracy,
                start() + Duration::seconds(i as i64),
            )
        })
        .collect()
}

fn bench_haversine(c: &mut Criterion) {
    c.bench_function("haversine_m", |b| {
        b.iter(|| {
            geo::haversine_m(
                black_box(47.3769),
                black_box(8.5417),
                black_box(47.3771),
                black_box(8.5420),
            )
        })
    });
}

fn bench_stream_processing(c: &mut Criterion) {
    let mut group = c.benchmark_group("Stream Processing");

    for &size in &[100, 1_000, 10_000] {
        let track = create_track(size);

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("process", size), &track, |b, track| {
            b.iter(|| {
                let mut processor =
                    LocationStreamProcessor::new(WorkoutType::Running, ProcessorConfig::default());
                for sample in track {
                    processor.process(*sample);
                }
                black_box(processor.total_distance_m())
            });
        });
    }

    group.finish();
}

fn bench_full_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("Session Replay");
    group.sample_size(20);

    for &size in &[600, 3_600] {
        let track = create_track(size);
        let options = ReplayOptions::default();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("replay_track", size), &track, |b, track| {
            b.iter(|| {
                replay_track(
                    track,
                    &options,
                    TrackerSettings::default(),
                    Box::new(MemoryStore::new()),
                    Box::new(MemoryMirror::default()),
                )
            });
        });
    }

    group.finish();
}

fn bench_route_compression(c: &mut Criterion) {
    let route: Vec<_> = create_track(3_600).iter().map(|s| s.route_point()).collect();

    c.bench_function("compress_route_3600", |b| {
        b.iter(|| CompressedRoute::compress(black_box(&route)))
    });
}

criterion_group!(
    benches,
    bench_haversine,
    bench_stream_processing,
    bench_full_replay,
    bench_route_compression
);
criterion_main!(benches);
