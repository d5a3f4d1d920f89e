// SPDX-License-Identifier: GPL-3.0-only

use clap::{Parser, Subcommand, ValueEnum};
use histeq::{DeviceClass, RunConfig, ScanMode};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "histeq")]
#[command(about = "Histogram equalization on the GPU")]
#[command(version = histeq::constants::app_info::version())]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List compute adapters with their platform and device indices
    Devices,

    /// Equalize an image
    Equalize {
        /// Source image
        input: PathBuf,

        /// Destination image (format from extension)
        output: PathBuf,

        /// Configuration file (default: ~/.config/histeq/config.json if present)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Platform index (from 'histeq devices')
        #[arg(short, long)]
        platform: Option<usize>,

        /// Device index within the platform
        #[arg(short, long)]
        device: Option<usize>,

        /// Device class: any, gpu, discrete, integrated, cpu, virtual
        #[arg(long, value_parser = parse_device_class)]
        device_type: Option<DeviceClass>,

        /// Number of histogram bins (default: one per value)
        #[arg(short, long)]
        bins: Option<u32>,

        /// Equalize each color channel instead of converting to grayscale
        #[arg(short, long)]
        color: bool,

        /// Process at 16 bits per sample
        #[arg(long)]
        high_precision: bool,

        /// Work-group size (capped at 256 and by the device)
        #[arg(long)]
        group_size: Option<u32>,

        /// Prefix-sum variants to run
        #[arg(long, value_enum)]
        scan: Option<ScanArg>,

        /// WGSL file replacing the built-in kernels
        #[arg(long)]
        kernel: Option<PathBuf>,

        /// Write histograms, lookup tables and timings as JSON
        #[arg(long)]
        report: Option<PathBuf>,

        /// Check every channel against the serial host implementation
        #[arg(long)]
        verify: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ScanArg {
    /// Work-efficient scan only
    WorkEfficient,
    /// Both scans, cross-checked
    Both,
}

impl From<ScanArg> for ScanMode {
    fn from(arg: ScanArg) -> Self {
        match arg {
            ScanArg::WorkEfficient => ScanMode::WorkEfficient,
            ScanArg::Both => ScanMode::Both,
        }
    }
}

fn parse_device_class(name: &str) -> Result<DeviceClass, String> {
    DeviceClass::from_name(name).ok_or_else(|| {
        let names: Vec<&str> = DeviceClass::ALL.iter().map(|c| c.display_name()).collect();
        format!("unknown device type '{}' (expected {})", name, names.join(", "))
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    // Set RUST_LOG environment variable to control log level
    // Examples: RUST_LOG=debug, RUST_LOG=histeq=debug, RUST_LOG=info
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices => cli::list_devices(),
        Commands::Equalize {
            input,
            output,
            config,
            platform,
            device,
            device_type,
            bins,
            color,
            high_precision,
            group_size,
            scan,
            kernel,
            report,
            verify,
        } => {
            let mut run = RunConfig::load_or_default(config.as_deref())?;
            if platform.is_some() {
                run.device.platform = platform;
            }
            if device.is_some() {
                run.device.device = device;
            }
            if let Some(class) = device_type {
                run.device.class = class;
            }
            if bins.is_some() {
                run.bins = bins;
            }
            run.color |= color;
            run.high_precision |= high_precision;
            if group_size.is_some() {
                run.group_size = group_size;
            }
            if let Some(scan) = scan {
                run.scan_mode = scan.into();
            }
            if kernel.is_some() {
                run.kernel_path = kernel;
            }

            cli::equalize_image(&input, &output, &run, report.as_deref(), verify)
        }
    }
}
