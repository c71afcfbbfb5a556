//! detector - publish per-frame person detections from a video into the shared region
//!
//! This binary:
//! 1. Loads configuration (file + DETECTOR_* environment overrides)
//! 2. Opens the video source and the inference backend
//! 3. Creates or attaches to the shared detection region
//! 4. Streams every frame through inference, filtering, suppression and encoding
//! 5. Marks the region complete and detaches, leaving it for consumers
//!
//! Exit status: 0 on completion (including Ctrl-C), 2 if the source cannot be opened,
//! 3 if the shared region cannot be created or mapped, 1 for anything else.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use detection_relay::{
    build_backend, DetectorConfig, FileConfig, FileSource, ShmPublisher, StreamController,
    StreamError, DETECTION_CAPACITY,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Video file to process (or stub://<name>?frames=N for a synthetic clip).
    video: String,
    /// Configuration file (JSON, or TOML when the extension is .toml).
    #[arg(long, env = "DETECTOR_CONFIG")]
    config: Option<PathBuf>,
    /// Shared region path (overrides configuration).
    #[arg(long)]
    region: Option<PathBuf>,
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{:#}", e);
            match e.downcast_ref::<StreamError>() {
                Some(stream_err) => ExitCode::from(stream_err.exit_code()),
                None => ExitCode::FAILURE,
            }
        }
    }
}

fn run(args: Args) -> Result<()> {
    let mut cfg = DetectorConfig::load(args.config.as_deref())?;
    if let Some(region) = args.region {
        cfg.region.path = region;
    }

    let backend = build_backend(&cfg.inference).context("load inference backend")?;
    let source =
        FileSource::open(FileConfig::new(&args.video)).map_err(StreamError::source_unavailable)?;
    let publisher = ShmPublisher::open(&cfg.region.path, DETECTION_CAPACITY)?;

    let interrupt = Arc::new(AtomicBool::new(false));
    let handler_flag = interrupt.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("install Ctrl-C handler")?;

    log::info!(
        "detector running: conf>{} nms>{} target_class={} region={}",
        cfg.filter.conf_threshold,
        cfg.filter.nms_threshold,
        cfg.filter.target_class,
        cfg.region.path.display()
    );

    let mut controller =
        StreamController::new(source, backend, publisher, cfg.filter, cfg.stream.clone())
            .with_interrupt(interrupt);
    let report = controller.run()?;

    if report.interrupted {
        log::warn!(
            "stopped early by interrupt at frame {}",
            report.frames_decoded
        );
    }
    if report.frame_limit_reached {
        log::warn!("frame number limit reached; remaining frames were not processed");
    }
    log::info!(
        "done: {} frames, {} detections published, {} frames skipped",
        report.frames_decoded,
        report.detections_published,
        report.frames_skipped()
    );
    Ok(())
}
