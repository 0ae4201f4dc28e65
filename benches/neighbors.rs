use criterion::measurement::WallTime;
use criterion::{criterion_group, criterion_main, BenchmarkGroup, BenchmarkId, Criterion, Throughput};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::time::Duration;

use rn::synth::{gaussian_points, DEFAULT_MEAN, DEFAULT_STD_DEV};
use rn::{NeighborRows, Point};

const SIZES: &[usize] = &[250, 1000, 2000];
const RADIUS: f32 = 100.0;

fn cap(group: &mut BenchmarkGroup<'_, WallTime>) {
    group.warm_up_time(Duration::from_secs(2));
    group.measurement_time(Duration::from_secs(5));
    group.sample_size(10);
}

fn cloud(n: usize) -> Vec<Point> {
    let mut rng = ChaCha8Rng::seed_from_u64(n as u64);
    gaussian_points(n, DEFAULT_MEAN, DEFAULT_STD_DEV, &mut rng)
}

fn bench_reference(c: &mut Criterion) {
    let mut group = c.benchmark_group("reference");
    cap(&mut group);
    for &n in SIZES {
        let points = cloud(n);
        group.throughput(Throughput::Elements((n * n) as u64));

        group.bench_with_input(BenchmarkId::new("compute_neighbors", n), &points, |b, p| {
            b.iter(|| rn::reference::compute_neighbors(p, RADIUS));
        });

        let mut backend = rn::reference::ReferenceBackend::new();
        group.bench_with_input(BenchmarkId::new("backend_reuse", n), &points, |b, p| {
            b.iter(|| backend.compute(p, RADIUS).point_count());
        });

        let mut single = match rn::reference::ReferenceBackend::with_threads(1) {
            Ok(backend) => backend,
            Err(_) => continue,
        };
        group.bench_with_input(BenchmarkId::new("single_thread", n), &points, |b, p| {
            b.iter(|| single.compute(p, RADIUS).point_count());
        });
    }
    group.finish();
}

#[cfg(feature = "opencl")]
fn bench_opencl(c: &mut Criterion) {
    use rn::opencl::{
        AcceleratorConfig, FullyResidentBackend, OutputResidentBackend, TransientBackend,
    };

    let max = SIZES.iter().copied().max().unwrap_or(0);
    let config = AcceleratorConfig::default();

    let mut transient = TransientBackend::new(config.clone());
    let mut output = OutputResidentBackend::new(config.clone());
    let mut full = FullyResidentBackend::new(config);
    if transient.initialize(max).is_err()
        || output.initialize(max).is_err()
        || full.initialize(max).is_err()
    {
        return;
    }

    let mut group = c.benchmark_group("opencl");
    cap(&mut group);
    for &n in SIZES {
        let points = cloud(n);
        group.throughput(Throughput::Elements((n * n) as u64));

        group.bench_with_input(BenchmarkId::new("transient", n), &points, |b, p| {
            b.iter(|| transient.get_neighbors(p, RADIUS).unwrap().point_count());
        });
        group.bench_with_input(BenchmarkId::new("output_resident", n), &points, |b, p| {
            b.iter(|| output.get_neighbors(p, RADIUS).unwrap().point_count());
        });
        group.bench_with_input(BenchmarkId::new("fully_resident", n), &points, |b, p| {
            b.iter(|| full.get_neighbors(p, RADIUS).unwrap().point_count());
        });
    }
    group.finish();
}

#[cfg(not(feature = "opencl"))]
fn bench_opencl(_c: &mut Criterion) {}

criterion_group!(benches, bench_reference, bench_opencl);
criterion_main!(benches);
