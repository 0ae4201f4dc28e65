//! Fully-resident backend: persistent input and output buffers.

use super::*;

struct FullyResidentState {
    ctx: AcceleratorContext,
    points: PinnedBuffer<Point>,
    output: PinnedBuffer<cl_int>,
    max_points: usize,
    /// Points written by the last `stage_points`.
    staged: usize,
}

/// Zero-copy strategy: both the point array and the neighbor matrix live
/// in persistent, page-aligned buffers bound to the kernel once. A call
/// maps the point buffer, overwrites its prefix in place, unmaps it, runs
/// the kernel, and maps the output. Nothing is allocated per call.
///
/// Queries with fewer points than the capacity use only the prefix of
/// both buffers; queries with more are rejected.
pub struct FullyResidentBackend {
    config: AcceleratorConfig,
    state: Option<FullyResidentState>,
}

impl FullyResidentBackend {
    pub fn new(config: AcceleratorConfig) -> Self {
        Self {
            config,
            state: None,
        }
    }

    /// Build the context and allocate the point buffer (`max_points`) and
    /// the output buffer (`max_points²`). A no-op when already initialized.
    pub fn initialize(&mut self, max_points: usize) -> NbResult<()> {
        if self.state.is_some() {
            return Ok(());
        }
        kernel_count(max_points)?;
        let cells = cell_count(max_points)?;

        let ctx = AcceleratorContext::build(&self.config)?;
        let points = PinnedBuffer::<Point>::new(&ctx.context, max_points)?;
        let output = PinnedBuffer::<cl_int>::new(&ctx.context, cells)?;
        // SAFETY: slots 0 and 1 are the kernel's output and point arrays;
        // both buffers live in the same state as the kernel.
        unsafe {
            ctx.bind_buffer(ARG_NEIGHBORS, output.buffer())?;
            ctx.bind_buffer(ARG_POINTS, points.buffer())?;
        }

        log::debug!(
            "fully-resident backend on '{}': {max_points} points max",
            ctx.device_name()
        );
        self.state = Some(FullyResidentState {
            ctx,
            points,
            output,
            max_points,
            staged: 0,
        });
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.state.is_some()
    }

    pub fn context(&self) -> Option<&AcceleratorContext> {
        self.state.as_ref().map(|s| &s.ctx)
    }

    /// Capacity fixed at initialization, or `None` before it.
    pub fn max_points(&self) -> Option<usize> {
        self.state.as_ref().map(|s| s.max_points)
    }

    /// Map the first `n` slots of the persistent point buffer for writing.
    ///
    /// Fill the guard, drop it, then call [`query_staged`] with the same
    /// `n` to run without any host-side copy.
    ///
    /// [`query_staged`]: Self::query_staged
    pub fn stage_points(&mut self, n: usize) -> NbResult<MappedWrite<'_, Point>> {
        let state = self.state.as_mut().ok_or(NbError::NotInitialized)?;
        check_capacity(n, state.max_points)?;
        let staged = state.points.map_write(&state.ctx.queue, n)?;
        state.staged = n;
        Ok(staged)
    }

    /// Run the kernel over the first `n` staged points.
    ///
    /// `n` may be smaller than the last staged count, which queries a
    /// prefix. A larger `n` fails with [`NbError::NotStaged`].
    pub fn query_staged(&mut self, n: usize, radius: f32) -> NbResult<NeighborView<'_>> {
        let state = self.state.as_mut().ok_or(NbError::NotInitialized)?;
        check_capacity(n, state.max_points)?;
        if n > state.staged {
            return Err(NbError::NotStaged {
                requested: n,
                staged: state.staged,
            });
        }
        if n == 0 {
            return Ok(NeighborView::empty());
        }
        state.ctx.set_scalars(kernel_count(n)?, radius)?;
        state.ctx.run(n)?;

        let cells = state.output.map_read(&state.ctx.queue, n * n)?;
        Ok(NeighborView::mapped(n, cells))
    }

    /// Copy `points` into the persistent buffer and compute their
    /// neighbor matrix.
    pub fn get_neighbors(&mut self, points: &[Point], radius: f32) -> NbResult<NeighborView<'_>> {
        {
            let mut staged = self.stage_points(points.len())?;
            for (slot, p) in staged.iter_mut().zip(points) {
                *slot = *p;
            }
        }
        self.query_staged(points.len(), radius)
    }
}

impl NeighborQuery for FullyResidentBackend {
    fn label(&self) -> &str {
        "GPU Full Shared"
    }

    fn prepare(&mut self, max_points: usize) -> NbResult<()> {
        self.initialize(max_points)
    }

    fn query(&mut self, points: &[Point], radius: f32) -> NbResult<NeighborView<'_>> {
        self.get_neighbors(points, radius)
    }
}
