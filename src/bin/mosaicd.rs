//! mosaicd - multi-camera composite capture daemon
//!
//! This daemon:
//! 1. Loads the camera layout (MOSAIC_CONFIG or --config)
//! 2. Opens every camera and negotiates its MJPG format, or exits with
//!    status 3 naming the camera that has no matching format
//! 3. Captures all cameras concurrently, composites, writes one JPEG per cycle
//! 4. On SIGINT/SIGTERM/SIGHUP or after --cycles, stops every camera and exits

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mosaic_capture::{exit_codes, CycleDriver, FileSink, MosaicConfig, SessionError};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Capture stills from several cameras and composite them onto one canvas"
)]
struct Args {
    /// Path to the JSON or TOML layout file.
    #[arg(long, env = "MOSAIC_CONFIG")]
    config: PathBuf,

    /// Number of cycles to run (default: until interrupted).
    #[arg(long)]
    cycles: Option<u64>,

    /// Directory composites are written to.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// File name prefix for composites.
    #[arg(long)]
    prefix: Option<String>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Err(err) = run(args) {
        log::error!("{:#}", err);
        std::process::exit(exit_codes::for_error(&err));
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = MosaicConfig::load_from(&args.config)?;
    if let Some(cycles) = args.cycles {
        config.run.cycles = Some(cycles);
    }
    if let Some(dir) = args.output_dir {
        config.run.output_dir = dir;
    }
    if let Some(prefix) = args.prefix {
        config.run.file_prefix = prefix;
    }

    // Installed before any camera is opened so an early signal still leads to
    // a clean stop of everything that did open.
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .context("install signal handler")?;

    let mut driver = match CycleDriver::open_all(&config) {
        Ok(driver) => driver,
        Err(err) => {
            if let SessionError::NoMatchingFormat { config, available } = &err {
                let camera =
                    serde_json::to_string(config).unwrap_or_else(|_| format!("{:?}", config));
                log::error!("Failed to find matching format for camera {}", camera);
                let offered: Vec<String> = available.iter().map(|f| f.to_string()).collect();
                log::error!("device offers: {}", offered.join(", "));
            }
            return Err(err).context("open cameras");
        }
    };

    log::info!(
        "mosaicd running: {}x{} canvas, {} cameras, writing to {}",
        config.canvas.width,
        config.canvas.height,
        config.cameras.len(),
        config.run.output_dir.display()
    );
    match config.run.cycles {
        Some(cycles) => log::info!("running {} cycles", cycles),
        None => log::info!("running until interrupted (Ctrl-C)"),
    }

    let mut sink = FileSink::new(
        &config.run.output_dir,
        config.run.file_prefix.clone(),
        config.run.jpeg_quality,
    );
    let summary = driver.run(config.run.cycles, &shutdown, &mut sink);

    log::info!("stopping cameras...");
    let stop_errors = driver.shutdown();
    if !stop_errors.is_empty() {
        log::warn!("{} cameras reported errors while stopping", stop_errors.len());
    }
    log::info!(
        "mosaicd stopped after {} cycles ({} written, {} failed)",
        summary.attempted,
        summary.succeeded,
        summary.failed
    );
    Ok(())
}
