//! Output-resident backend: persistent output buffer, transient input.

use super::*;

struct OutputResidentState {
    ctx: AcceleratorContext,
    output: PinnedBuffer<cl_int>,
    max_points: usize,
}

/// Keeps the neighbor matrix in one persistent, page-aligned buffer bound
/// to the kernel once at initialization. Points are still uploaded into
/// a fresh buffer on every call.
///
/// Every call returns a view of the same buffer. The view borrows the
/// backend mutably and keeps the region mapped, so a result cannot be
/// read after the next call has started overwriting it.
pub struct OutputResidentBackend {
    config: AcceleratorConfig,
    state: Option<OutputResidentState>,
}

impl OutputResidentBackend {
    pub fn new(config: AcceleratorConfig) -> Self {
        Self {
            config,
            state: None,
        }
    }

    /// Build the context and allocate the output buffer for
    /// `max_points²` cells. A no-op when already initialized.
    pub fn initialize(&mut self, max_points: usize) -> NbResult<()> {
        if self.state.is_some() {
            return Ok(());
        }
        kernel_count(max_points)?;
        let cells = cell_count(max_points)?;

        let ctx = AcceleratorContext::build(&self.config)?;
        let output = PinnedBuffer::<cl_int>::new(&ctx.context, cells)?;
        // SAFETY: slot 0 is the kernel's `int*` output; `output` lives in
        // the same state as the kernel.
        unsafe { ctx.bind_buffer(ARG_NEIGHBORS, output.buffer())? };

        log::debug!(
            "output-resident backend on '{}': {max_points} points max",
            ctx.device_name()
        );
        self.state = Some(OutputResidentState {
            ctx,
            output,
            max_points,
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

    /// Compute the neighbor matrix of `points` into the persistent buffer.
    ///
    /// Fails with [`NbError::CapacityExceeded`] for more points than the
    /// buffer was initialized for.
    pub fn get_neighbors(&mut self, points: &[Point], radius: f32) -> NbResult<NeighborView<'_>> {
        let state = self.state.as_mut().ok_or(NbError::NotInitialized)?;
        let n = points.len();
        check_capacity(n, state.max_points)?;
        if n == 0 {
            return Ok(NeighborView::empty());
        }
        let count = kernel_count(n)?;

        // SAFETY: COPY_HOST_PTR reads `n` points during creation only.
        let input_buf = unsafe {
            Buffer::<Point>::create(
                &state.ctx.context,
                CL_MEM_READ_ONLY | CL_MEM_COPY_HOST_PTR,
                n,
                points.as_ptr().cast_mut().cast::<c_void>(),
            )
            .map_err(cl_err("clCreateBuffer"))?
        };
        // SAFETY: slot 1 is the kernel's point array; `input_buf` outlives
        // the run, which completes before `run` returns.
        unsafe { state.ctx.bind_buffer(ARG_POINTS, &input_buf)? };
        state.ctx.set_scalars(count, radius)?;
        state.ctx.run(n)?;

        let cells = state.output.map_read(&state.ctx.queue, n * n)?;
        Ok(NeighborView::mapped(n, cells))
    }
}

impl NeighborQuery for OutputResidentBackend {
    fn label(&self) -> &str {
        "GPU Read Shared"
    }

    fn prepare(&mut self, max_points: usize) -> NbResult<()> {
        self.initialize(max_points)
    }

    fn query(&mut self, points: &[Point], radius: f32) -> NbResult<NeighborView<'_>> {
        self.get_neighbors(points, radius)
    }
}
