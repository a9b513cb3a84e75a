//! npuforge command-line frontend.
//!
//! Thin wrapper over `npuforge-core`: converts checkpoints to NPU binaries,
//! prepares calibration datasets, and inspects the working directories. All
//! decision logic lives in the core library.

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use npuforge_core::{
    ConversionRequest, DeviceProfile, ForgeApi, Geometry, QuantFallback,
};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "npuforge")]
#[command(about = "Convert model checkpoints to NPU device binaries")]
struct Args {
    /// Working directory holding uploads/, output/ and calibration_data/
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a checkpoint or graph into an accelerator binary
    Convert {
        /// Input checkpoint (.pt/.pth) or intermediate graph (.onnx/.torchscript)
        input: PathBuf,

        /// Model family identifier (see `families`)
        #[arg(short, long)]
        family: String,

        /// Target device profile
        #[arg(long, default_value = "rk3576")]
        device: String,

        /// Build in reduced precision instead of int8 quantization
        #[arg(long)]
        fp: bool,

        /// Fail when calibration data is missing instead of falling back
        /// to reduced precision
        #[arg(long)]
        strict: bool,

        /// Input height override
        #[arg(long)]
        height: Option<u32>,

        /// Input width override
        #[arg(long)]
        width: Option<u32>,

        /// Explicit output path (derived from the input when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Build a calibration dataset for a model family
    Calibrate {
        /// Directory of calibration images (any supported layout)
        dataset: PathBuf,

        /// Model family identifier
        #[arg(short, long)]
        family: String,

        /// Maximum number of images to extract
        #[arg(long)]
        max_images: Option<usize>,
    },

    /// Show calibration readiness per family
    Status,

    /// Classify the layout of a dataset directory
    Detect {
        /// Directory to inspect
        path: PathBuf,
    },

    /// List supported model families
    Families,

    /// List emitted artifacts, newest first
    Outputs,

    /// Deploy toolchain scripts and set up the Python environment
    Setup,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let api = ForgeApi::new(&args.root)?;

    match args.command {
        Command::Convert {
            input,
            family,
            device,
            fp,
            strict,
            height,
            width,
            output,
        } => {
            let Some(device) = DeviceProfile::from_str(&device) else {
                let supported = DeviceProfile::all()
                    .iter()
                    .map(|p| p.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                bail!("unsupported device profile '{device}' (supported: {supported})");
            };

            let mut request = ConversionRequest::new(family, input, device);
            request.quantize = !fp;
            if strict {
                request.fallback = QuantFallback::Strict;
            }
            if let (Some(height), Some(width)) = (height, width) {
                request.geometry = Some(Geometry::new(height, width));
            }
            request.output_path = output;

            let outcome = api.convert(request).await;
            println!("{}", outcome.message);
            if !outcome.success {
                std::process::exit(1);
            }
        }

        Command::Calibrate {
            dataset,
            family,
            max_images,
        } => {
            let build = api.prepare_calibration(&dataset, &family, max_images)?;
            println!("{}", build.message);
        }

        Command::Status => {
            for info in ForgeApi::families() {
                let status = api.calibration_status(info.id)?;
                let state = if status.ready { "ready" } else { "missing" };
                println!(
                    "{:<12} {:<10} {:>4} samples  ({})",
                    info.id,
                    state,
                    status.count,
                    status.images_dir.display()
                );
            }
        }

        Command::Detect { path } => {
            let fmt = api.detect_dataset(&path);
            println!("{:?}: {}", fmt.kind, fmt.description);
        }

        Command::Families => {
            for info in ForgeApi::families() {
                let exts = info
                    .accepted_exts
                    .iter()
                    .map(|e| format!(".{e}"))
                    .collect::<Vec<_>>()
                    .join("/");
                println!(
                    "{:<12} {:<24} {:<14} default {}  {}",
                    info.id, info.name, exts, info.default_geometry, info.hint
                );
            }
        }

        Command::Outputs => {
            let artifacts = api.list_outputs()?;
            if artifacts.is_empty() {
                println!("no artifacts yet");
            }
            for artifact in artifacts {
                println!(
                    "{:<48} {:>8.2} MB  {}",
                    artifact.filename,
                    artifact.size_bytes as f64 / 1024.0 / 1024.0,
                    artifact.modified.format("%Y-%m-%d %H:%M:%S")
                );
            }
        }

        Command::Setup => {
            api.ensure_environment().await?;
            println!("toolchain environment ready");
        }
    }

    Ok(())
}
