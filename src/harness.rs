//! Cross-backend verification and latency benchmarking.
//!
//! Every backend implements [`NeighborQuery`]. [`verify`] runs them all on
//! one input and demands cell-for-cell equality with the first (the
//! reference). [`benchmark`] times repeated calls over a set of frames and
//! produces a [`BenchReport`] with per-call averages and speed-ups.

use crate::matrix::{NeighborRows, NeighborView};
use crate::point::Point;
use crate::synth::{self, PerturbConfig};
use crate::{NbError, NbResult};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use std::borrow::Cow;
use std::fmt;
use std::time::{Duration, Instant};

/// A backend the harness can drive.
pub trait NeighborQuery {
    /// Short label used in reports and mismatch errors.
    fn label(&self) -> &str;

    /// One-time setup for inputs of up to `max_points` points.
    /// Calling it again is a no-op.
    fn prepare(&mut self, max_points: usize) -> NbResult<()>;

    /// Compute the neighbor matrix of `points`.
    ///
    /// The view is valid until the next call on the same backend.
    fn query(&mut self, points: &[Point], radius: f32) -> NbResult<NeighborView<'_>>;
}

/// Index of the first cell where `actual` differs from `expected`.
pub fn first_mismatch(expected: &[i32], actual: &[i32]) -> Option<usize> {
    expected
        .iter()
        .zip(actual)
        .position(|(e, a)| e != a)
        .or_else(|| (expected.len() != actual.len()).then(|| expected.len().min(actual.len())))
}

/// Require `actual` to equal `expected` exactly, including row order and
/// sentinel placement.
pub fn compare<E, A>(label: &str, expected: &E, actual: &A) -> NbResult<()>
where
    E: NeighborRows + ?Sized,
    A: NeighborRows + ?Sized,
{
    let (e, a) = (expected.cells(), actual.cells());
    if e.len() != a.len() {
        return Err(NbError::ShapeMismatch {
            backend: label.to_string(),
            expected: e.len(),
            actual: a.len(),
        });
    }
    match first_mismatch(e, a) {
        None => Ok(()),
        Some(index) => Err(NbError::Mismatch {
            backend: label.to_string(),
            index,
            expected: e[index],
            actual: a[index],
        }),
    }
}

/// Run every backend over `points` and compare each against the first.
///
/// The first backend's result must also satisfy the neighbor-matrix
/// invariants. Stops at the first disagreement.
pub fn verify(points: &[Point], radius: f32, backends: &mut [&mut dyn NeighborQuery]) -> NbResult<()> {
    let Some((reference, others)) = backends.split_first_mut() else {
        return Ok(());
    };
    let reference_label = reference.label().to_string();
    let expected = reference.query(points, radius)?;
    expected
        .check_invariants()
        .map_err(|violation| NbError::Invariant {
            backend: reference_label,
            violation,
        })?;

    for backend in others.iter_mut() {
        let label = backend.label().to_string();
        let actual = backend.query(points, radius)?;
        compare(&label, &expected, &actual)?;
        log::debug!("{label}: {} cells match", actual.cells().len());
    }
    Ok(())
}

/// Benchmark settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchConfig {
    /// Passes over the frame set.
    pub iterations: usize,
    /// Run each backend once on the first frame before timing.
    pub warmup: bool,
    /// Perturb every frame before each pass; all backends see the same
    /// perturbed copy.
    pub perturb: Option<PerturbConfig>,
    /// Seed for the perturbation RNG.
    pub seed: u64,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            iterations: 1,
            warmup: true,
            perturb: None,
            seed: 0,
        }
    }
}

/// Accumulated wall-clock time of one backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendTiming {
    pub label: String,
    pub total: Duration,
    pub calls: usize,
}

impl BackendTiming {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            total: Duration::ZERO,
            calls: 0,
        }
    }

    pub fn record(&mut self, elapsed: Duration) {
        self.total += elapsed;
        self.calls += 1;
    }

    /// Mean time per call; zero before any call.
    pub fn average(&self) -> Duration {
        match u32::try_from(self.calls) {
            Ok(0) => Duration::ZERO,
            Ok(calls) => self.total / calls,
            Err(_) => Duration::from_secs_f64(self.total.as_secs_f64() / self.calls as f64),
        }
    }

    pub fn average_ms(&self) -> f64 {
        self.average().as_secs_f64() * 1_000.0
    }
}

/// Result of [`benchmark`].
#[derive(Debug, Clone, PartialEq)]
pub struct BenchReport {
    pub frames: usize,
    pub iterations: usize,
    /// One entry per backend, in the order they were passed. The first is
    /// the baseline for speed-ups.
    pub timings: Vec<BackendTiming>,
}

impl BenchReport {
    /// `baseline average / backend average` for every backend after the
    /// first. `None` when either average is zero.
    pub fn speedups(&self) -> Vec<(&str, Option<f64>)> {
        let Some((base, rest)) = self.timings.split_first() else {
            return Vec::new();
        };
        let base_s = base.average().as_secs_f64();
        rest.iter()
            .map(|t| {
                let s = t.average().as_secs_f64();
                let ratio = (base_s > 0.0 && s > 0.0).then(|| base_s / s);
                (t.label.as_str(), ratio)
            })
            .collect()
    }

    pub fn timing(&self, label: &str) -> Option<&BackendTiming> {
        self.timings.iter().find(|t| t.label == label)
    }
}

impl fmt::Display for BenchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "# of frames {} ({} iteration{})",
            self.frames,
            self.iterations,
            if self.iterations == 1 { "" } else { "s" }
        )?;
        let width = self.timings.iter().map(|t| t.label.len()).max().unwrap_or(0);
        for t in &self.timings {
            writeln!(f, "{:<width$}  {:>10.3} ms/call", t.label, t.average_ms())?;
        }
        writeln!(f, "=========================")?;
        let base = self.timings.first().map(|t| t.label.as_str()).unwrap_or("");
        for (label, ratio) in self.speedups() {
            match ratio {
                Some(r) => writeln!(f, "{label} is {r:.2}x faster than {base}")?,
                None => writeln!(f, "{label}: no timing")?,
            }
        }
        Ok(())
    }
}

/// Time every backend over `frames` for `config.iterations` passes.
///
/// Within a pass each frame (perturbed if configured) is handed to every
/// backend in turn; the timed span covers the query and the release of its
/// result view.
pub fn benchmark(
    frames: &[Vec<Point>],
    radius: f32,
    backends: &mut [&mut dyn NeighborQuery],
    config: &BenchConfig,
) -> NbResult<BenchReport> {
    let mut timings: Vec<BackendTiming> =
        backends.iter().map(|b| BackendTiming::new(b.label())).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

    if config.warmup {
        if let Some(first) = frames.first() {
            for backend in backends.iter_mut() {
                backend.query(first, radius)?;
            }
        }
    }

    for iteration in 0..config.iterations {
        for frame in frames {
            let input: Cow<'_, [Point]> = match &config.perturb {
                Some(p) => Cow::Owned(synth::perturb(frame, p, &mut rng)),
                None => Cow::Borrowed(frame.as_slice()),
            };
            for (backend, timing) in backends.iter_mut().zip(timings.iter_mut()) {
                let start = Instant::now();
                let view = backend.query(&input, radius)?;
                drop(view);
                timing.record(start.elapsed());
            }
        }
        log::debug!("benchmark pass {}/{} done", iteration + 1, config.iterations);
    }

    Ok(BenchReport {
        frames: frames.len(),
        iterations: config.iterations,
        timings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{NeighborMatrix, SENTINEL};
    use crate::reference::{compute_neighbors, ReferenceBackend};

    /// Backend returning a fixed matrix, optionally corrupting one cell.
    struct Fixed {
        label: &'static str,
        corrupt: Option<(usize, i32)>,
        last: NeighborMatrix,
        calls: usize,
    }

    impl Fixed {
        fn new(label: &'static str, corrupt: Option<(usize, i32)>) -> Self {
            Self {
                label,
                corrupt,
                last: NeighborMatrix::default(),
                calls: 0,
            }
        }
    }

    impl NeighborQuery for Fixed {
        fn label(&self) -> &str {
            self.label
        }

        fn prepare(&mut self, _max_points: usize) -> NbResult<()> {
            Ok(())
        }

        fn query(&mut self, points: &[Point], radius: f32) -> NbResult<NeighborView<'_>> {
            self.calls += 1;
            self.last = compute_neighbors(points, radius);
            if let Some((index, value)) = self.corrupt {
                self.last.cells_mut()[index] = value;
            }
            Ok(self.last.view())
        }
    }

    fn points() -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0, 0.0),
            Point::new(1.0, 0.0, 0.0),
            Point::new(10.0, 0.0, 0.0),
            Point::new(1.0, 1.0, 0.0),
        ]
    }

    #[test]
    fn test_first_mismatch() {
        assert_eq!(first_mismatch(&[1, 2, 3], &[1, 2, 3]), None);
        assert_eq!(first_mismatch(&[1, 2, 3], &[1, 5, 3]), Some(1));
        assert_eq!(first_mismatch(&[1, 2], &[1, 2, 3]), Some(2));
        assert_eq!(first_mismatch(&[], &[]), None);
    }

    #[test]
    fn test_verify_agreeing_backends() {
        let mut reference = ReferenceBackend::new();
        let mut other = Fixed::new("other", None);
        verify(&points(), 2.0, &mut [&mut reference, &mut other]).unwrap();
        assert_eq!(other.calls, 1);
    }

    #[test]
    fn test_verify_reports_first_mismatch() {
        let mut reference = ReferenceBackend::new();
        // Row 2 should be all sentinels; claim point 0 instead.
        let mut bad = Fixed::new("bad", Some((8, 0)));
        let err = verify(&points(), 2.0, &mut [&mut reference, &mut bad]).unwrap_err();
        assert_eq!(
            err,
            NbError::Mismatch {
                backend: "bad".to_string(),
                index: 8,
                expected: SENTINEL,
                actual: 0,
            }
        );
    }

    #[test]
    fn test_verify_rejects_broken_reference() {
        // Row 0 lists itself.
        let mut broken = Fixed::new("broken", Some((0, 0)));
        let mut reference = ReferenceBackend::new();
        let err = verify(&points(), 2.0, &mut [&mut broken, &mut reference]).unwrap_err();
        assert!(matches!(err, NbError::Invariant { .. }), "{err:?}");
    }

    #[test]
    fn test_verify_no_backends() {
        verify(&points(), 2.0, &mut []).unwrap();
    }

    #[test]
    fn test_compare_shape_mismatch() {
        let a = NeighborMatrix::filled(2);
        let b = NeighborMatrix::filled(3);
        assert!(matches!(
            compare("b", &a, &b),
            Err(NbError::ShapeMismatch {
                expected: 4,
                actual: 9,
                ..
            })
        ));
    }

    #[test]
    fn test_benchmark_counts_calls() {
        let frames = vec![points(), points()];
        let mut reference = ReferenceBackend::new();
        let mut other = Fixed::new("other", None);
        let config = BenchConfig {
            iterations: 3,
            warmup: true,
            ..BenchConfig::default()
        };
        let report = benchmark(&frames, 2.0, &mut [&mut reference, &mut other], &config).unwrap();
        assert_eq!(report.frames, 2);
        assert_eq!(report.timings.len(), 2);
        assert!(report.timings.iter().all(|t| t.calls == 6));
        // One warm-up call on top of the timed ones.
        assert_eq!(other.calls, 7);
        assert_eq!(report.speedups().len(), 1);
        assert!(report.timing("CPU").is_some());
    }

    #[test]
    fn test_benchmark_with_perturbation() {
        let base: Vec<Point> = (0..50).map(|i| Point::new(i as f32, 0.0, 0.0)).collect();
        let mut reference = ReferenceBackend::new();
        let config = BenchConfig {
            iterations: 2,
            warmup: false,
            perturb: Some(PerturbConfig {
                min_keep: 10,
                jitter: 2,
            }),
            seed: 42,
        };
        let report = benchmark(&[base], 5.0, &mut [&mut reference], &config).unwrap();
        assert_eq!(report.timings[0].calls, 2);
        assert!(report.speedups().is_empty());
    }

    #[test]
    fn test_timing_average() {
        let mut t = BackendTiming::new("x");
        assert_eq!(t.average(), Duration::ZERO);
        t.record(Duration::from_millis(10));
        t.record(Duration::from_millis(30));
        assert_eq!(t.average(), Duration::from_millis(20));
        assert!((t.average_ms() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_report_speedups_and_display() {
        let report = BenchReport {
            frames: 4,
            iterations: 1,
            timings: vec![
                BackendTiming {
                    label: "CPU".to_string(),
                    total: Duration::from_millis(40),
                    calls: 4,
                },
                BackendTiming {
                    label: "GPU Copy".to_string(),
                    total: Duration::from_millis(10),
                    calls: 4,
                },
                BackendTiming::new("GPU Idle"),
            ],
        };
        let speedups = report.speedups();
        assert_eq!(speedups[0].0, "GPU Copy");
        assert!((speedups[0].1.unwrap() - 4.0).abs() < 1e-9);
        assert_eq!(speedups[1], ("GPU Idle", None));

        let text = report.to_string();
        assert!(text.contains("# of frames 4 (1 iteration)"));
        assert!(text.contains("GPU Copy is 4.00x faster than CPU"));
        assert!(text.contains("GPU Idle: no timing"));
    }
}
