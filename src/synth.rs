//! Synthetic point clouds and frame perturbation for benchmarks.

use crate::point::Point;

use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Mean of the synthetic clouds used by the benchmark driver.
pub const DEFAULT_MEAN: f32 = 0.0;

/// Per-axis standard deviation of the synthetic clouds.
pub const DEFAULT_STD_DEV: f32 = 100.0;

/// `n` points with each coordinate drawn independently from
/// `Normal(mean, std_dev)`.
///
/// A non-finite or negative `std_dev` is treated as zero.
pub fn gaussian_points<R: Rng + ?Sized>(
    n: usize,
    mean: f32,
    std_dev: f32,
    rng: &mut R,
) -> Vec<Point> {
    let std_dev = if std_dev.is_finite() && std_dev > 0.0 {
        std_dev
    } else {
        0.0
    };
    // Normal::new only fails for non-finite std_dev, excluded above.
    let Ok(normal) = Normal::new(mean, std_dev) else {
        return vec![Point::new(mean, mean, mean); n];
    };
    (0..n)
        .map(|_| {
            Point::new(
                normal.sample(rng),
                normal.sample(rng),
                normal.sample(rng),
            )
        })
        .collect()
}

/// How a base frame is disturbed between benchmark iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerturbConfig {
    /// Smallest number of points kept. The kept count is drawn from
    /// `min_keep..len`; frames no larger than `min_keep` are kept whole.
    pub min_keep: usize,
    /// Each coordinate moves by an integer drawn from `-jitter..jitter`.
    /// Zero disables jitter.
    pub jitter: i32,
}

impl Default for PerturbConfig {
    fn default() -> Self {
        Self {
            min_keep: 800,
            jitter: 10,
        }
    }
}

/// Shuffle `points`, keep a random-length prefix, and jitter every
/// coordinate by a small integer.
pub fn perturb<R: Rng + ?Sized>(points: &[Point], config: &PerturbConfig, rng: &mut R) -> Vec<Point> {
    let mut out = points.to_vec();
    out.shuffle(rng);
    if out.len() > config.min_keep {
        let keep = rng.gen_range(config.min_keep..out.len());
        out.truncate(keep);
    }
    if config.jitter > 0 {
        let j = config.jitter;
        for p in &mut out {
            p.x += rng.gen_range(-j..j) as f32;
            p.y += rng.gen_range(-j..j) as f32;
            p.z += rng.gen_range(-j..j) as f32;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_gaussian_points_count_and_spread() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let pts = gaussian_points(5000, 0.0, 100.0, &mut rng);
        assert_eq!(pts.len(), 5000);
        let mean_x = pts.iter().map(|p| p.x as f64).sum::<f64>() / pts.len() as f64;
        assert!(mean_x.abs() < 10.0, "mean {mean_x}");
        assert!(pts.iter().any(|p| p.x.abs() > 100.0));
    }

    #[test]
    fn test_gaussian_points_deterministic_per_seed() {
        let a = gaussian_points(10, 0.0, 1.0, &mut ChaCha8Rng::seed_from_u64(9));
        let b = gaussian_points(10, 0.0, 1.0, &mut ChaCha8Rng::seed_from_u64(9));
        assert_eq!(a, b);
    }

    #[test]
    fn test_gaussian_points_degenerate_std_dev() {
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let pts = gaussian_points(4, 5.0, f32::NAN, &mut rng);
        assert!(pts.iter().all(|p| *p == Point::new(5.0, 5.0, 5.0)));
    }

    #[test]
    fn test_perturb_keeps_between_min_and_len() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let base = gaussian_points(100, 0.0, 10.0, &mut rng);
        let config = PerturbConfig {
            min_keep: 60,
            jitter: 0,
        };
        for _ in 0..20 {
            let out = perturb(&base, &config, &mut rng);
            assert!(out.len() >= 60 && out.len() < 100, "len {}", out.len());
            // Without jitter every kept point comes from the base frame.
            assert!(out.iter().all(|p| base.contains(p)));
        }
    }

    #[test]
    fn test_perturb_small_frame_kept_whole() {
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let base = vec![Point::default(); 10];
        let out = perturb(&base, &PerturbConfig::default(), &mut rng);
        assert_eq!(out.len(), 10);
    }

    #[test]
    fn test_perturb_jitter_is_bounded_integer_offset() {
        let mut rng = ChaCha8Rng::seed_from_u64(6);
        let base = vec![Point::new(0.5, 0.5, 0.5); 50];
        let config = PerturbConfig {
            min_keep: 50,
            jitter: 3,
        };
        let out = perturb(&base, &config, &mut rng);
        for p in out {
            for c in [p.x, p.y, p.z] {
                let offset = c - 0.5;
                assert_eq!(offset.fract(), 0.0);
                assert!((-3.0..3.0).contains(&offset), "offset {offset}");
            }
        }
    }
}
