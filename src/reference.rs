//! Reference backend: brute-force neighbor rows on the host, in parallel.
//!
//! Each row is owned by exactly one rayon task, so no two tasks write the
//! same cells and no locking is needed. The call returns only after every
//! row is written.
//!
//! The predicate is the one compiled into `kernels/neighbors.cl`, with all
//! arithmetic in `f32` and the same evaluation order, so the accelerator
//! backends can be compared cell for cell:
//!
//! 1. skip `j == i`;
//! 2. reject when any per-axis `|Δ| >= radius`;
//! 3. accept when `Δx² + Δy² + Δz² < radius²`.
//!
//! A radius `<= 0` (or NaN) accepts nothing: every row is all sentinels.

use crate::harness::NeighborQuery;
use crate::matrix::{NeighborMatrix, NeighborView, SENTINEL};
use crate::point::Point;
use crate::{NbError, NbResult};

use rayon::prelude::*;

/// Compute the neighbor matrix of `points` for `radius`.
pub fn compute_neighbors(points: &[Point], radius: f32) -> NeighborMatrix {
    let mut matrix = NeighborMatrix::filled(points.len());
    compute_neighbors_into(points, radius, matrix.cells_mut());
    matrix
}

/// Compute the neighbor matrix into a caller-provided `N×N` buffer.
///
/// Every cell of `out` is written.
///
/// # Panics
///
/// Panics if `out.len() != points.len()²`.
pub fn compute_neighbors_into(points: &[Point], radius: f32, out: &mut [i32]) {
    let n = points.len();
    assert_eq!(out.len(), n * n, "output must hold N×N cells");
    if n == 0 {
        return;
    }
    out.par_chunks_mut(n)
        .enumerate()
        .for_each(|(i, row)| fill_row(points, i, radius, row));
}

/// Write row `i`: accepted indices in scan order, then sentinels.
#[inline]
fn fill_row(points: &[Point], i: usize, radius: f32, row: &mut [i32]) {
    let radius_sq = radius * radius;
    let p = points[i];
    let mut found = 0;
    for (j, q) in points.iter().enumerate() {
        if j == i {
            continue;
        }
        let dx = (q.x - p.x).abs();
        let dy = (q.y - p.y).abs();
        let dz = (q.z - p.z).abs();
        if dx < radius && dy < radius && dz < radius {
            let dist_sq = dx * dx + dy * dy + dz * dz;
            if dist_sq < radius_sq {
                row[found] = j as i32;
                found += 1;
            }
        }
    }
    row[found..].fill(SENTINEL);
}

/// The reference backend as a reusable object.
///
/// Runs on a dedicated rayon pool when built with [`with_threads`], on
/// the global pool otherwise. The last result is kept so its allocation
/// is reused by the next call.
///
/// [`with_threads`]: ReferenceBackend::with_threads
#[derive(Default)]
pub struct ReferenceBackend {
    pool: Option<rayon::ThreadPool>,
    last: NeighborMatrix,
}

impl ReferenceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a dedicated pool of `threads` workers. `0` selects the global pool.
    pub fn with_threads(threads: usize) -> NbResult<Self> {
        if threads == 0 {
            return Ok(Self::new());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("rn-ref-{i}"))
            .build()
            .map_err(|e| NbError::InvalidConfig(format!("thread pool: {e}")))?;
        Ok(Self {
            pool: Some(pool),
            last: NeighborMatrix::default(),
        })
    }

    /// Number of worker threads rows are spread over.
    pub fn threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    /// Compute into the backend's buffer and borrow the result.
    pub fn compute(&mut self, points: &[Point], radius: f32) -> &NeighborMatrix {
        self.last.reshape(points.len());
        let out = self.last.cells_mut();
        match &self.pool {
            Some(pool) => pool.install(|| compute_neighbors_into(points, radius, out)),
            None => compute_neighbors_into(points, radius, out),
        }
        &self.last
    }
}

impl NeighborQuery for ReferenceBackend {
    fn label(&self) -> &str {
        "CPU"
    }

    fn prepare(&mut self, _max_points: usize) -> NbResult<()> {
        Ok(())
    }

    fn query(&mut self, points: &[Point], radius: f32) -> NbResult<NeighborView<'_>> {
        Ok(self.compute(points, radius).view())
    }
}
