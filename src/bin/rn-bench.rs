//! rn-bench: verify and time the radius-neighbor backends.
//!
//!   rn-bench --points-dir Points          → load Points/*.csv as frames
//!   rn-bench --synthetic 2000 --frames 8  → generate Gaussian clouds
//!   rn-bench --list-devices               → show OpenCL platforms and exit
//!
//! Every backend is first checked cell for cell against the CPU reference,
//! then timed over the frames. Any error aborts with a non-zero exit.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use rn::harness::{self, BenchConfig, NeighborQuery};
use rn::point::load_frames;
use rn::reference::ReferenceBackend;
use rn::synth::{self, PerturbConfig};
use rn::{NbError, NbResult, Point};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliDevice {
    Gpu,
    Cpu,
    Accelerator,
    All,
}

#[cfg(feature = "opencl")]
impl From<CliDevice> for rn::opencl::DeviceKind {
    fn from(value: CliDevice) -> Self {
        match value {
            CliDevice::Gpu => Self::Gpu,
            CliDevice::Cpu => Self::Cpu,
            CliDevice::Accelerator => Self::Accelerator,
            CliDevice::All => Self::All,
        }
    }
}

/// Radius-neighbor backend verifier and benchmark
#[derive(Parser, Debug)]
#[command(name = "rn-bench", version, about)]
#[cfg_attr(not(feature = "opencl"), allow(dead_code))]
struct Cli {
    /// Directory of point files, one frame per file
    #[arg(long, value_name = "DIR")]
    points_dir: Option<PathBuf>,

    /// Extension of point files in --points-dir
    #[arg(long, default_value = "csv")]
    ext: String,

    /// Field delimiter in point files
    #[arg(long, default_value_t = ',')]
    delimiter: char,

    /// Generate N Gaussian points per frame instead of loading files
    #[arg(long, value_name = "N", conflicts_with = "points_dir")]
    synthetic: Option<usize>,

    /// Number of synthetic frames
    #[arg(long, default_value_t = 4)]
    frames: usize,

    /// Seed for synthetic frames and perturbation
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Neighbor radius
    #[arg(long, default_value_t = 100.0)]
    radius: f32,

    /// Capacity of the persistent accelerator buffers
    #[arg(long, default_value_t = 2000)]
    max_points: usize,

    /// Timed passes over the frame set
    #[arg(long, default_value_t = 10)]
    iterations: usize,

    /// Per-axis integer jitter applied to each perturbed frame
    #[arg(long, default_value_t = 10)]
    jitter: i32,

    /// Fewest points kept when subsetting a perturbed frame
    #[arg(long, default_value_t = 800)]
    min_keep: usize,

    /// Time the frames as loaded, without subsetting or jitter
    #[arg(long)]
    no_perturb: bool,

    /// Reference backend threads (0 = rayon default)
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Substring the OpenCL platform name must contain (empty = any)
    #[arg(long, default_value = "")]
    platform: String,

    /// OpenCL device type
    #[arg(long, value_enum, default_value_t = CliDevice::Gpu)]
    device: CliDevice,

    /// Load the kernel from this file instead of the built-in copy
    #[arg(long, value_name = "PATH")]
    kernel: Option<PathBuf>,

    /// Log device-side timings of every command
    #[arg(long)]
    profile: bool,

    /// Skip the cross-backend equality check
    #[arg(long)]
    skip_verify: bool,

    /// List OpenCL platforms and devices, then exit
    #[arg(long)]
    list_devices: bool,

    /// Verbose output (debug logging)
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> NbResult<()> {
    if cli.list_devices {
        list_devices();
        return Ok(());
    }
    if cli.iterations == 0 {
        return Err(NbError::InvalidConfig("--iterations must be at least 1".into()));
    }

    let frames = load_input(cli)?;
    let largest = frames.iter().map(Vec::len).max().unwrap_or(0);
    let capacity = cli.max_points.max(largest);
    if capacity > cli.max_points {
        log::warn!(
            "largest frame has {largest} points; raising --max-points from {} to {capacity}",
            cli.max_points
        );
    }
    log::info!(
        "{} frame(s), largest {largest} points, radius {}",
        frames.len(),
        cli.radius
    );

    let mut reference = ReferenceBackend::with_threads(cli.threads)?;
    #[cfg(feature = "opencl")]
    let (mut transient, mut output, mut full) = {
        use rn::opencl::{
            AcceleratorConfig, FullyResidentBackend, KernelSource, OutputResidentBackend,
            TransientBackend,
        };
        let config = AcceleratorConfig {
            platform_filter: cli.platform.clone(),
            device_kind: cli.device.into(),
            kernel_source: cli
                .kernel
                .clone()
                .map_or(KernelSource::Embedded, KernelSource::File),
            profiling: cli.profile,
            ..AcceleratorConfig::default()
        };
        (
            TransientBackend::new(config.clone()),
            OutputResidentBackend::new(config.clone()),
            FullyResidentBackend::new(config),
        )
    };
    #[cfg(not(feature = "opencl"))]
    log::warn!("built without the `opencl` feature; only the CPU reference runs");

    let mut backends: Vec<&mut dyn NeighborQuery> = Vec::new();
    backends.push(&mut reference);
    #[cfg(feature = "opencl")]
    {
        backends.push(&mut transient);
        backends.push(&mut output);
        backends.push(&mut full);
    }

    for backend in backends.iter_mut() {
        backend.prepare(capacity)?;
    }

    if cli.skip_verify {
        log::info!("skipping verification");
    } else {
        for (i, frame) in frames.iter().enumerate() {
            harness::verify(frame, cli.radius, &mut backends)?;
            log::debug!("frame {i}: all backends agree");
        }
        log::info!("verification passed on {} frame(s)", frames.len());
    }

    let config = BenchConfig {
        iterations: cli.iterations,
        warmup: true,
        perturb: (!cli.no_perturb).then_some(PerturbConfig {
            min_keep: cli.min_keep,
            jitter: cli.jitter,
        }),
        seed: cli.seed,
    };
    let report = harness::benchmark(&frames, cli.radius, &mut backends, &config)?;
    print!("{report}");
    Ok(())
}

fn load_input(cli: &Cli) -> NbResult<Vec<Vec<Point>>> {
    if let Some(dir) = &cli.points_dir {
        let frames = load_frames(dir, &cli.ext, cli.delimiter)?;
        if frames.is_empty() {
            return Err(NbError::InvalidConfig(format!(
                "no .{} files in {}",
                cli.ext,
                dir.display()
            )));
        }
        return Ok(frames);
    }

    let n = cli.synthetic.unwrap_or(cli.max_points);
    if cli.frames == 0 {
        return Err(NbError::InvalidConfig("--frames must be at least 1".into()));
    }
    let mut rng = ChaCha8Rng::seed_from_u64(cli.seed);
    Ok((0..cli.frames)
        .map(|_| synth::gaussian_points(n, synth::DEFAULT_MEAN, synth::DEFAULT_STD_DEV, &mut rng))
        .collect())
}

#[cfg(feature = "opencl")]
fn list_devices() {
    let platforms = rn::opencl::probe_platforms();
    if platforms.is_empty() {
        println!("No OpenCL platforms found.");
        return;
    }
    for platform in platforms {
        println!(
            "{} ({}, {})",
            platform.name, platform.vendor, platform.version
        );
        for device in &platform.devices {
            println!(
                "  {:<40} {:<4} {:>6} MiB  max work-group {}",
                device.name,
                if device.is_gpu { "GPU" } else { "" },
                device.global_mem_size / (1024 * 1024),
                device.max_work_group_size
            );
        }
    }
}

#[cfg(not(feature = "opencl"))]
fn list_devices() {
    println!("Built without the `opencl` feature; no devices to list.");
}
