//! OpenCL accelerator backends.
//!
//! Three backends run the same kernel (`kernels/neighbors.cl`) and differ
//! only in how host and device memory are managed across calls:
//!
//! | Backend                   | Input buffer          | Output buffer         |
//! |---------------------------|-----------------------|-----------------------|
//! | [`TransientBackend`]      | created per call      | created per call      |
//! | [`OutputResidentBackend`] | created per call      | persistent, mapped    |
//! | [`FullyResidentBackend`]  | persistent, mapped    | persistent, mapped    |
//!
//! ```text
//! ┌──────────────┐  map/write  ┌──────────────────┐  map/read  ┌─────────────┐
//! │  Host (CPU)  │────────────▶│  OpenCL Device   │───────────▶│  Host (CPU) │
//! │  points      │             │  one work-item   │            │  neighbor   │
//! │              │             │  per row         │            │  view       │
//! └──────────────┘             └──────────────────┘            └─────────────┘
//! ```
//!
//! Persistent buffers are page-aligned host allocations wrapped with
//! `CL_MEM_USE_HOST_PTR` ([`PinnedBuffer`]). They are only touched through
//! [`MappedRead`] / [`MappedWrite`] guards, which unmap when dropped.
//!
//! Each backend owns its [`AcceleratorContext`] (one in-order command
//! queue, one kernel with its own argument bindings). All methods take
//! `&mut self`: one call in flight per backend.
//!
//! # Feature Gate
//!
//! This module is only available when compiled with the `opencl` feature:
//! ```bash
//! cargo build --features opencl
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! # #[cfg(feature = "opencl")]
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! use rn::opencl::{AcceleratorConfig, FullyResidentBackend};
//! use rn::{NeighborRows, Point};
//!
//! let mut backend = FullyResidentBackend::new(AcceleratorConfig::default());
//! backend.initialize(2000)?;
//!
//! let points = vec![Point::new(0.0, 0.0, 0.0), Point::new(1.0, 0.0, 0.0)];
//! let view = backend.get_neighbors(&points, 2.0)?;
//! assert_eq!(view.neighbors(0).collect::<Vec<_>>(), vec![1]);
//! # Ok(())
//! # }
//! ```

use crate::harness::NeighborQuery;
use crate::matrix::{NeighborMatrix, NeighborView, SENTINEL};
use crate::point::Point;
use crate::{NbError, NbResult};

use opencl3::command_queue::{CommandQueue, CL_QUEUE_PROFILING_ENABLE};
use opencl3::context::Context;
use opencl3::device::{
    Device, CL_DEVICE_TYPE_ACCELERATOR, CL_DEVICE_TYPE_ALL, CL_DEVICE_TYPE_CPU,
    CL_DEVICE_TYPE_GPU,
};
use opencl3::error_codes::ClError;
use opencl3::event::Event;
use opencl3::kernel::{ExecuteKernel, Kernel};
use opencl3::memory::{
    Buffer, ClMem, CL_MAP_READ, CL_MAP_WRITE, CL_MEM_COPY_HOST_PTR, CL_MEM_READ_ONLY,
    CL_MEM_READ_WRITE, CL_MEM_USE_HOST_PTR, CL_MEM_WRITE_ONLY,
};
use opencl3::platform::get_platforms;
use opencl3::program::Program;
use opencl3::types::{
    cl_device_type, cl_float, cl_int, cl_map_flags, cl_mem, cl_uint, CL_BLOCKING,
};

use std::borrow::Cow;
use std::ffi::c_void;
use std::path::PathBuf;
use std::ptr;

/// Embedded kernel source, used unless a file is configured.
const NEIGHBORS_KERNEL_SOURCE: &str = include_str!("../../kernels/neighbors.cl");

/// Relative path of the kernel artifact shipped with the crate.
pub const DEFAULT_KERNEL_PATH: &str = "kernels/neighbors.cl";

/// Entry point name in the kernel artifact.
pub const KERNEL_NAME: &str = "Compute";

/// The kernel takes exactly four arguments, in this order.
const KERNEL_ARG_COUNT: cl_uint = 4;
const ARG_NEIGHBORS: cl_uint = 0;
const ARG_POINTS: cl_uint = 1;
const ARG_COUNT: cl_uint = 2;
const ARG_RADIUS: cl_uint = 3;

/// Which device class to pick on the selected platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceKind {
    #[default]
    Gpu,
    Cpu,
    Accelerator,
    /// First device of any type.
    All,
}

impl DeviceKind {
    fn cl_type(self) -> cl_device_type {
        match self {
            Self::Gpu => CL_DEVICE_TYPE_GPU,
            Self::Cpu => CL_DEVICE_TYPE_CPU,
            Self::Accelerator => CL_DEVICE_TYPE_ACCELERATOR,
            Self::All => CL_DEVICE_TYPE_ALL,
        }
    }
}

/// Where the kernel program comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum KernelSource {
    /// The copy of `kernels/neighbors.cl` compiled into the crate.
    #[default]
    Embedded,
    /// Read the artifact from disk at initialization.
    File(PathBuf),
}

impl KernelSource {
    fn load(&self) -> NbResult<Cow<'static, str>> {
        match self {
            Self::Embedded => Ok(Cow::Borrowed(NEIGHBORS_KERNEL_SOURCE)),
            Self::File(path) => std::fs::read_to_string(path)
                .map(Cow::Owned)
                .map_err(|_| NbError::KernelSource { path: path.clone() }),
        }
    }
}

/// Device selection and kernel build settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceleratorConfig {
    /// Substring the platform name must contain. Empty matches any platform.
    pub platform_filter: String,
    pub device_kind: DeviceKind,
    pub kernel_source: KernelSource,
    pub kernel_name: String,
    pub build_options: String,
    /// Create the queue with `CL_QUEUE_PROFILING_ENABLE` and log
    /// per-command device timings at debug level.
    pub profiling: bool,
}

impl Default for AcceleratorConfig {
    fn default() -> Self {
        Self {
            platform_filter: String::new(),
            device_kind: DeviceKind::Gpu,
            kernel_source: KernelSource::Embedded,
            kernel_name: KERNEL_NAME.to_string(),
            build_options: "-Werror".to_string(),
            profiling: false,
        }
    }
}

/// Information about a discovered OpenCL device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Human-readable device name (e.g. "Intel(R) UHD Graphics 630").
    pub name: String,
    pub vendor: String,
    /// Whether this is a GPU device (vs CPU or accelerator).
    pub is_gpu: bool,
    pub max_work_group_size: usize,
    /// Global memory size in bytes.
    pub global_mem_size: u64,
}

/// A platform and its devices.
#[derive(Debug, Clone)]
pub struct PlatformInfo {
    pub name: String,
    pub vendor: String,
    pub version: String,
    pub devices: Vec<DeviceInfo>,
}

/// Probe all OpenCL platforms and devices without building anything.
///
/// Returns an empty vec if no OpenCL runtime is installed (never errors).
pub fn probe_platforms() -> Vec<PlatformInfo> {
    let Ok(platforms) = get_platforms() else {
        return Vec::new();
    };

    platforms
        .iter()
        .map(|platform| {
            let devices = platform
                .get_devices(CL_DEVICE_TYPE_ALL)
                .unwrap_or_default()
                .into_iter()
                .map(|id| {
                    let dev = Device::new(id);
                    let dev_type: cl_device_type = dev.dev_type().unwrap_or(0);
                    DeviceInfo {
                        name: dev.name().unwrap_or_default().trim().to_string(),
                        vendor: dev.vendor().unwrap_or_default().trim().to_string(),
                        is_gpu: (dev_type & CL_DEVICE_TYPE_GPU) != 0,
                        max_work_group_size: dev.max_work_group_size().unwrap_or(1),
                        global_mem_size: dev.global_mem_size().unwrap_or(0),
                    }
                })
                .collect();
            PlatformInfo {
                name: platform.name().unwrap_or_default().trim().to_string(),
                vendor: platform.vendor().unwrap_or_default().trim().to_string(),
                version: platform.version().unwrap_or_default().trim().to_string(),
                devices,
            }
        })
        .collect()
}

/// Map an OpenCL error code into [`NbError::OpenCl`] tagged with the call.
fn cl_err(op: &'static str) -> impl FnOnce(ClError) -> NbError {
    move |e| NbError::OpenCl { op, code: e.0 }
}

/// Point count as the kernel's `int count` argument.
fn kernel_count(n: usize) -> NbResult<cl_int> {
    cl_int::try_from(n).map_err(|_| NbError::TooManyPoints(n))
}

/// Number of cells in an `n×n` neighbor matrix.
fn cell_count(n: usize) -> NbResult<usize> {
    n.checked_mul(n).ok_or(NbError::TooManyPoints(n))
}

fn check_capacity(requested: usize, capacity: usize) -> NbResult<()> {
    if requested > capacity {
        return Err(NbError::CapacityExceeded {
            requested,
            capacity,
        });
    }
    Ok(())
}

mod context;
mod fully_resident;
mod output_resident;
mod pinned;
mod transient;

pub use context::AcceleratorContext;
pub use fully_resident::FullyResidentBackend;
pub use output_resident::OutputResidentBackend;
pub use pinned::{page_rounded_len, MappedRead, MappedWrite, PinnedBuffer, PAGE_SIZE};
pub use transient::TransientBackend;
