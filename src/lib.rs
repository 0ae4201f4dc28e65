//! Brute-force radius-neighbor queries over 3-D point sets.
//!
//! For every point `i` the engine lists each `j != i` whose Euclidean
//! distance to `i` is strictly below a radius. Four backends compute the
//! same [`NeighborMatrix`]:
//!
//! - [`reference`]: rayon data-parallel rows in host memory.
//! - `opencl::TransientBackend`: fresh device buffers on every call.
//! - `opencl::OutputResidentBackend`: persistent, page-aligned output buffer.
//! - `opencl::FullyResidentBackend`: persistent input and output buffers,
//!   updated in place through scoped map/unmap.
//!
//! The [`harness`] module proves the backends agree cell for cell and
//! times repeated calls.

pub mod harness;
pub mod matrix;
pub mod point;
pub mod reference;
pub mod synth;

#[cfg(feature = "opencl")]
pub mod opencl;

pub use matrix::{NeighborMatrix, NeighborRows, NeighborView, RowViolation, SENTINEL};
pub use point::Point;

use std::path::PathBuf;

/// Error types for neighbor-query operations.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum NbError {
    /// A file could not be read.
    Io {
        path: PathBuf,
        kind: std::io::ErrorKind,
    },
    /// A point file line could not be parsed.
    Parse { line: usize, message: String },
    /// No OpenCL platform name contains the configured filter.
    NoPlatform { filter: String },
    /// The selected platform has no device of the requested kind.
    NoDevice { platform: String },
    /// The kernel source artifact could not be loaded.
    KernelSource { path: PathBuf },
    /// The kernel program failed to compile; carries the build log.
    KernelBuild(String),
    /// The kernel entry point does not have the expected argument list.
    KernelSignature { name: String, args: u32 },
    /// An OpenCL API call failed.
    OpenCl { op: &'static str, code: i32 },
    /// A query was issued before `initialize`.
    NotInitialized,
    /// More points than the persistent buffers were sized for.
    CapacityExceeded { requested: usize, capacity: usize },
    /// A staged query asked for more points than were staged.
    NotStaged { requested: usize, staged: usize },
    /// The point count does not fit the kernel's 32-bit index space.
    TooManyPoints(usize),
    /// Two backends disagree on one neighbor cell.
    Mismatch {
        backend: String,
        index: usize,
        expected: i32,
        actual: i32,
    },
    /// Two backends returned matrices of different sizes.
    ShapeMismatch {
        backend: String,
        expected: usize,
        actual: usize,
    },
    /// A backend produced a row that breaks a neighbor-matrix invariant.
    Invariant {
        backend: String,
        violation: RowViolation,
    },
    /// A configuration value is out of range.
    InvalidConfig(String),
}

impl std::fmt::Display for NbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, kind } => write!(f, "{}: {kind}", path.display()),
            Self::Parse { line, message } => write!(f, "line {line}: {message}"),
            Self::NoPlatform { filter } => {
                write!(f, "no OpenCL platform name contains '{filter}'")
            }
            Self::NoDevice { platform } => {
                write!(f, "platform '{platform}' has no device of the requested type")
            }
            Self::KernelSource { path } => {
                write!(f, "kernel source not found: {}", path.display())
            }
            Self::KernelBuild(log) => write!(f, "kernel build failed:\n{log}"),
            Self::KernelSignature { name, args } => {
                write!(f, "kernel '{name}' takes {args} arguments, expected 4")
            }
            Self::OpenCl { op, code } => write!(f, "{op} failed with OpenCL error {code}"),
            Self::NotInitialized => write!(f, "backend used before initialize"),
            Self::CapacityExceeded {
                requested,
                capacity,
            } => write!(
                f,
                "{requested} points exceed the initialized capacity of {capacity}"
            ),
            Self::NotStaged { requested, staged } => {
                write!(f, "query of {requested} points but only {staged} staged")
            }
            Self::TooManyPoints(n) => write!(f, "{n} points exceed the kernel index range"),
            Self::Mismatch {
                backend,
                index,
                expected,
                actual,
            } => write!(
                f,
                "{backend}: expected {expected}, got {actual} at flattened index {index}"
            ),
            Self::ShapeMismatch {
                backend,
                expected,
                actual,
            } => write!(f, "{backend}: expected {expected} cells, got {actual}"),
            Self::Invariant { backend, violation } => write!(f, "{backend}: {violation}"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for NbError {}

pub type NbResult<T> = Result<T, NbError>;
