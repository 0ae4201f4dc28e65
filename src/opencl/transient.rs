//! Transient backend: fresh input and output buffers on every call.

use super::*;

/// Copies points to the device and the neighbor matrix back on every
/// call. No device memory survives between calls; this is the baseline
/// the resident strategies are measured against.
pub struct TransientBackend {
    config: AcceleratorConfig,
    ctx: Option<AcceleratorContext>,
    max_points: usize,
    last: NeighborMatrix,
}

impl TransientBackend {
    pub fn new(config: AcceleratorConfig) -> Self {
        Self {
            config,
            ctx: None,
            max_points: 0,
            last: NeighborMatrix::default(),
        }
    }

    /// Build the accelerator context. A no-op when already initialized.
    ///
    /// `max_points` is recorded for reporting only: buffers are sized per
    /// call, so larger inputs are accepted.
    pub fn initialize(&mut self, max_points: usize) -> NbResult<()> {
        if self.ctx.is_some() {
            return Ok(());
        }
        let ctx = AcceleratorContext::build(&self.config)?;
        log::debug!("transient backend on '{}'", ctx.device_name());
        self.ctx = Some(ctx);
        self.max_points = max_points;
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.ctx.is_some()
    }

    pub fn context(&self) -> Option<&AcceleratorContext> {
        self.ctx.as_ref()
    }

    pub fn max_points(&self) -> usize {
        self.max_points
    }

    /// Compute the neighbor matrix of `points`.
    ///
    /// Allocates an output buffer seeded from a sentinel-filled host
    /// array and an input buffer copied from `points`, runs the kernel,
    /// reads the output back with a blocking read, and drains the queue.
    pub fn get_neighbors(&mut self, points: &[Point], radius: f32) -> NbResult<NeighborMatrix> {
        let ctx = self.ctx.as_ref().ok_or(NbError::NotInitialized)?;
        let n = points.len();
        if n == 0 {
            return Ok(NeighborMatrix::filled(0));
        }
        let count = kernel_count(n)?;
        let cells = cell_count(n)?;

        let mut host = vec![SENTINEL; cells];

        // SAFETY: COPY_HOST_PTR reads `cells` ints from `host` during
        // creation only.
        let output_buf = unsafe {
            Buffer::<cl_int>::create(
                &ctx.context,
                CL_MEM_WRITE_ONLY | CL_MEM_COPY_HOST_PTR,
                cells,
                host.as_mut_ptr().cast::<c_void>(),
            )
            .map_err(cl_err("clCreateBuffer"))?
        };
        // SAFETY: as above, `n` points; the device never writes them.
        let input_buf = unsafe {
            Buffer::<Point>::create(
                &ctx.context,
                CL_MEM_READ_ONLY | CL_MEM_COPY_HOST_PTR,
                n,
                points.as_ptr().cast_mut().cast::<c_void>(),
            )
            .map_err(cl_err("clCreateBuffer"))?
        };

        // Argument order: neighbors, points, count, radius.
        let kernel_event = unsafe {
            ExecuteKernel::new(&ctx.kernel)
                .set_arg(&output_buf)
                .set_arg(&input_buf)
                .set_arg(&count)
                .set_arg(&radius)
                .set_global_work_size(n)
                .enqueue_nd_range(&ctx.queue)
                .map_err(cl_err("clEnqueueNDRangeKernel"))?
        };

        let read_event = unsafe {
            ctx.queue
                .enqueue_read_buffer(&output_buf, CL_BLOCKING, 0, &mut host, &[])
                .map_err(cl_err("clEnqueueReadBuffer"))?
        };
        ctx.finish()?;
        ctx.profile_event("transient: kernel", &kernel_event);
        ctx.profile_event("transient: download neighbors", &read_event);

        Ok(NeighborMatrix::from_square(n, host))
    }
}

impl NeighborQuery for TransientBackend {
    fn label(&self) -> &str {
        "GPU Copy"
    }

    fn prepare(&mut self, max_points: usize) -> NbResult<()> {
        self.initialize(max_points)
    }

    fn query(&mut self, points: &[Point], radius: f32) -> NbResult<NeighborView<'_>> {
        self.last = self.get_neighbors(points, radius)?;
        Ok(self.last.view())
    }
}
