//! Device discovery, program build, and kernel binding.

use super::*;

/// OpenCL device, context, command queue, and the bound neighbor kernel.
///
/// Built once per backend and reused by every call. The queue is in-order,
/// so enqueued writes, kernel runs, and maps execute in submission order.
///
/// Note: `Debug` is implemented manually because the OpenCL handle
/// types from `opencl3` don't implement `Debug`.
pub struct AcceleratorContext {
    _device: Device,
    pub(crate) context: Context,
    pub(crate) queue: CommandQueue,
    pub(crate) kernel: Kernel,
    device_name: String,
    platform_name: String,
    profiling: bool,
}

impl std::fmt::Debug for AcceleratorContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceleratorContext")
            .field("platform_name", &self.platform_name)
            .field("device_name", &self.device_name)
            .finish_non_exhaustive()
    }
}

impl AcceleratorContext {
    /// Select the device, build the kernel, and check its signature.
    ///
    /// Picks the first platform whose name contains
    /// `config.platform_filter`, then the first device of
    /// `config.device_kind` on it. There is no fallback to other
    /// platforms or device types.
    pub fn build(config: &AcceleratorConfig) -> NbResult<Self> {
        let platforms = get_platforms().map_err(cl_err("clGetPlatformIDs"))?;
        let platform = platforms
            .into_iter()
            .find(|p| {
                p.name()
                    .map(|name| name.contains(config.platform_filter.as_str()))
                    .unwrap_or(false)
            })
            .ok_or_else(|| NbError::NoPlatform {
                filter: config.platform_filter.clone(),
            })?;
        let platform_name = platform.name().unwrap_or_default().trim().to_string();

        // clGetDeviceIDs reports CL_DEVICE_NOT_FOUND as an error.
        let device_id = platform
            .get_devices(config.device_kind.cl_type())
            .unwrap_or_default()
            .first()
            .copied()
            .ok_or_else(|| NbError::NoDevice {
                platform: platform_name.clone(),
            })?;
        let device = Device::new(device_id);
        let device_name = device.name().unwrap_or_default().trim().to_string();

        let context = Context::from_device(&device).map_err(cl_err("clCreateContext"))?;

        // The OpenCL 1.2 API: the 2.0 create_default_with_properties is
        // missing on older runtimes.
        let queue_props = if config.profiling {
            CL_QUEUE_PROFILING_ENABLE
        } else {
            0
        };
        #[allow(deprecated)]
        let queue = CommandQueue::create_default(&context, queue_props)
            .map_err(cl_err("clCreateCommandQueue"))?;

        let source = config.kernel_source.load()?;
        let program =
            Program::create_and_build_from_source(&context, &source, &config.build_options)
                .map_err(NbError::KernelBuild)?;
        let kernel =
            Kernel::create(&program, &config.kernel_name).map_err(cl_err("clCreateKernel"))?;

        let args = kernel.num_args().map_err(cl_err("clGetKernelInfo"))?;
        if args != KERNEL_ARG_COUNT {
            return Err(NbError::KernelSignature {
                name: config.kernel_name.clone(),
                args,
            });
        }

        log::debug!(
            "accelerator ready: platform '{platform_name}', device '{device_name}', kernel '{}'",
            config.kernel_name
        );

        Ok(Self {
            _device: device,
            context,
            queue,
            kernel,
            device_name,
            platform_name,
            profiling: config.profiling,
        })
    }

    /// Return the name of the selected compute device.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Return the name of the platform the device belongs to.
    pub fn platform_name(&self) -> &str {
        &self.platform_name
    }

    /// Bind a device buffer to one of the kernel's buffer slots.
    ///
    /// # Safety
    ///
    /// `buffer` must hold the element type the kernel expects in `index`
    /// and must stay alive until every kernel run using this binding has
    /// completed.
    pub(crate) unsafe fn bind_buffer<T>(&self, index: cl_uint, buffer: &Buffer<T>) -> NbResult<()> {
        self.kernel
            .set_arg(index, buffer)
            .map_err(cl_err("clSetKernelArg"))
    }

    /// Set the point count and radius arguments.
    pub(crate) fn set_scalars(&self, count: cl_int, radius: cl_float) -> NbResult<()> {
        // SAFETY: both slots are declared as 32-bit scalars in the kernel.
        unsafe {
            self.kernel
                .set_arg(ARG_COUNT, &count)
                .map_err(cl_err("clSetKernelArg"))?;
            self.kernel
                .set_arg(ARG_RADIUS, &radius)
                .map_err(cl_err("clSetKernelArg"))?;
        }
        Ok(())
    }

    /// Enqueue one kernel run over `work_items` rows with the current
    /// bindings and block until the queue drains.
    pub(crate) fn run(&self, work_items: usize) -> NbResult<()> {
        let global = [work_items];
        // SAFETY: all four arguments were bound by the caller; `global`
        // outlives the call.
        let event = unsafe {
            self.queue
                .enqueue_nd_range_kernel(
                    self.kernel.get(),
                    1,
                    ptr::null(),
                    global.as_ptr(),
                    ptr::null(),
                    &[],
                )
                .map_err(cl_err("clEnqueueNDRangeKernel"))?
        };
        self.finish()?;
        self.profile_event("neighbors kernel", &event);
        Ok(())
    }

    /// Block until every enqueued command has completed.
    pub(crate) fn finish(&self) -> NbResult<()> {
        self.queue.finish().map_err(cl_err("clFinish"))
    }

    /// Extract elapsed time in milliseconds from a completed OpenCL event.
    ///
    /// Requires the queue to have been created with profiling enabled.
    pub fn event_elapsed_ms(event: &Event) -> Option<f64> {
        let start = event.profiling_command_start().ok()?;
        let end = event.profiling_command_end().ok()?;
        Some((end - start) as f64 / 1_000_000.0)
    }

    /// Log timing for a completed event when profiling is enabled.
    pub(crate) fn profile_event(&self, label: &str, event: &Event) {
        if self.profiling {
            if let Some(ms) = Self::event_elapsed_ms(event) {
                log::debug!("[rn-gpu] {label}: {ms:.3} ms");
            }
        }
    }
}
