//! opencamd - live camera viewer with object detection
//!
//! This daemon:
//! 1. Enumerates cameras (prints them with `--list`)
//! 2. Downloads missing model files and loads the detector in the background
//! 3. Streams the selected camera, annotating frames once the model is ready
//! 4. Writes the latest frame to a JPEG snapshot for viewing
//! 5. Keeps running when the camera is missing or lost, reopening it on the
//!    configured reconnect interval, until Ctrl-C or `--ticks` frames

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[path = "../ui.rs"]
mod ui;

use opencam::{
    CameraBackend, CaptureSource, JpegSnapshotSurface, ModelLoader, OpencamConfig, Session,
    SessionSettings, SyntheticBackend, SyntheticDevice,
};

#[derive(Parser, Debug)]
#[command(name = "opencamd", about = "Live camera viewer with object detection")]
struct Args {
    /// List detected cameras and exit.
    #[arg(long)]
    list: bool,

    /// Camera index to stream (overrides config).
    #[arg(long)]
    camera: Option<u32>,

    /// Stop after this many ticks.
    #[arg(long)]
    ticks: Option<u64>,

    /// Never download missing model files.
    #[arg(long)]
    no_download: bool,

    /// Use built-in synthetic cameras instead of real devices.
    #[arg(long)]
    synthetic: bool,

    /// Snapshot path (overrides config).
    #[arg(long, value_name = "PATH")]
    snapshot: Option<PathBuf>,

    /// UI mode for stderr progress (auto|plain|pretty).
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let is_tty = std::io::stderr().is_terminal();
    let stdout_is_tty = std::io::stdout().is_terminal();
    let ui = ui::Ui::from_args(Some(&args.ui), is_tty, !stdout_is_tty);

    let mut cfg = OpencamConfig::load()?;
    if let Some(camera) = args.camera {
        cfg.camera_index = camera;
    }
    if let Some(path) = &args.snapshot {
        cfg.snapshot.path = path.clone();
    }
    if args.no_download {
        cfg.model.allow_download = false;
    }

    if args.synthetic {
        let backend = SyntheticBackend::new(vec![
            SyntheticDevice::new(0, 640, 480),
            SyntheticDevice::new(1, 1280, 720).honoring_request(),
        ]);
        return run(backend, &cfg, &args, &ui);
    }
    run_hardware(&cfg, &args, &ui)
}

#[cfg(feature = "ingest-v4l2")]
fn run_hardware(cfg: &OpencamConfig, args: &Args, ui: &ui::Ui) -> Result<()> {
    run(opencam::V4l2Backend::new(), cfg, args, ui)
}

#[cfg(not(feature = "ingest-v4l2"))]
fn run_hardware(_cfg: &OpencamConfig, _args: &Args, _ui: &ui::Ui) -> Result<()> {
    Err(anyhow::anyhow!(
        "no camera backend in this build; rebuild with --features ingest-v4l2 or pass --synthetic"
    ))
}

fn run<B: CameraBackend>(backend: B, cfg: &OpencamConfig, args: &Args, ui: &ui::Ui) -> Result<()> {
    let mut source = CaptureSource::new(backend)
        .with_request(cfg.capture)
        .with_probe_limit(cfg.probe_limit);

    let enumerated = {
        let _stage = ui.stage("Detect cameras");
        source.enumerate()
    };
    if args.list {
        for camera in &enumerated? {
            println!("{}\t{}", camera.index, camera.label);
        }
        return Ok(());
    }
    let cameras = enumerated.unwrap_or_else(|err| {
        log::error!("camera enumeration failed: {:#}", err);
        Vec::new()
    });

    let index = if cameras.iter().any(|c| c.index == cfg.camera_index) {
        cfg.camera_index
    } else if let Some(first) = cameras.first() {
        log::warn!(
            "camera {} was not detected, using camera {} instead",
            cfg.camera_index,
            first.index
        );
        first.index
    } else {
        log::warn!("no cameras detected; waiting for camera {}", cfg.camera_index);
        cfg.camera_index
    };

    let loader = ModelLoader::spawn(
        cfg.model_files(),
        cfg.model.allow_download,
        Some(cfg.input_size()),
    );
    let mut downloads = ui.downloads();
    let surface = JpegSnapshotSurface::new(&cfg.snapshot.path, cfg.snapshot.every);
    log::info!("writing snapshots to {}", surface.path().display());

    let mut session = Session::new(source, surface, SessionSettings::from(cfg))
        .with_loader(loader)
        .with_progress_sink(move |progress| downloads.update(progress));

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("install Ctrl-C handler")?;

    match session.start(index) {
        Ok(()) => log::info!("streaming camera {} (Ctrl-C to stop)", index),
        Err(_) if cfg.reconnect.is_some() => {
            log::info!("camera {} unavailable, retrying (Ctrl-C to stop)", index)
        }
        Err(_) => log::warn!("camera {} unavailable and reconnect is disabled", index),
    }
    session.run(&running, args.ticks);
    session.shutdown();
    Ok(())
}
