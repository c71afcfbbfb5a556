//! detection_region - consumer-side tool for the shared detection region
//!
//! - `watch`: poll the region and print every fresh frame until the producer completes
//! - `inspect`: print one consistent snapshot
//! - `annotate`: decode the producer's video in lockstep and write frames with boxes drawn
//! - `remove`: deallocate the region (the producer never does this)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use detection_relay::annotate::Annotator;
use detection_relay::config::default_region_path;
use detection_relay::{remove_region, FileConfig, FileSource, RegionReader, RegionSnapshot};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Shared region path.
    #[arg(long, env = "DETECTOR_REGION_PATH")]
    region: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print each new frame until the stream completes.
    Watch {
        /// Polling interval in milliseconds.
        #[arg(long, default_value_t = 10)]
        interval_ms: u64,
        /// Emit one JSON object per frame.
        #[arg(long)]
        json: bool,
        /// Wait for the region to appear instead of failing.
        #[arg(long)]
        wait: bool,
    },
    /// Follow the producer over the same video and write annotated frames.
    Annotate {
        /// The video the producer is processing.
        video: String,
        /// Directory for frame_NNNNNN.png output.
        #[arg(long, default_value = "annotated")]
        output: PathBuf,
        /// Polling interval in milliseconds while waiting for the producer.
        #[arg(long, default_value_t = 10)]
        interval_ms: u64,
        /// Wait for the region to appear instead of failing.
        #[arg(long)]
        wait: bool,
    },
    /// Print the current record once.
    Inspect {
        #[arg(long)]
        json: bool,
    },
    /// Remove the region's backing object.
    Remove,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let region = cli.region.unwrap_or_else(default_region_path);

    match cli.command {
        Command::Watch {
            interval_ms,
            json,
            wait,
        } => watch(region, Duration::from_millis(interval_ms), json, wait),
        Command::Annotate {
            video,
            output,
            interval_ms,
            wait,
        } => annotate(region, video, output, Duration::from_millis(interval_ms), wait),
        Command::Inspect { json } => {
            let mut reader = RegionReader::open(&region)?;
            let snapshot = reader.snapshot()?;
            print_snapshot(&snapshot, json)
        }
        Command::Remove => {
            if remove_region(&region)? {
                println!("removed {}", region.display());
            } else {
                println!("{} does not exist", region.display());
            }
            Ok(())
        }
    }
}

fn install_stop_flag() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let handler_flag = stop.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    })
    .context("install Ctrl-C handler")?;
    Ok(stop)
}

fn attach(region: &Path, interval: Duration, wait: bool, stop: &AtomicBool) -> Result<RegionReader> {
    loop {
        match RegionReader::open(region) {
            Ok(reader) => return Ok(reader),
            Err(e) if wait && !stop.load(Ordering::SeqCst) => {
                log::debug!("waiting for region: {}", e);
                std::thread::sleep(interval);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn annotate(
    region: PathBuf,
    video: String,
    output: PathBuf,
    interval: Duration,
    wait: bool,
) -> Result<()> {
    let stop = install_stop_flag()?;
    let reader = attach(&region, interval, wait, &stop)?;
    let source = FileSource::open(FileConfig::new(&video))?;
    let mut annotator = Annotator::new(source, reader, &output, interval)?.with_stop(stop);
    let report = annotator.run()?;
    if report.stopped {
        log::warn!("stopped early after {} frames", report.frames_written);
    }
    println!(
        "wrote {} frames to {} ({} annotated, {} boxes)",
        report.frames_written,
        output.display(),
        report.frames_annotated,
        report.detections_drawn
    );
    Ok(())
}

fn watch(region: PathBuf, interval: Duration, json: bool, wait: bool) -> Result<()> {
    let stop = install_stop_flag()?;
    let mut reader = attach(&region, interval, wait, &stop)?;
    log::info!("watching {}", reader.path().display());

    let mut last_frame = 0i32;
    let mut missed = 0u64;
    while !stop.load(Ordering::SeqCst) {
        let Some(snapshot) = reader.poll_fresh()? else {
            std::thread::sleep(interval);
            continue;
        };

        if snapshot.frame_number < last_frame {
            log::info!("producer restarted at frame {}", snapshot.frame_number);
        } else if last_frame > 0 && snapshot.frame_number > last_frame + 1 {
            missed += (snapshot.frame_number - last_frame - 1) as u64;
        }
        last_frame = snapshot.frame_number;
        print_snapshot(&snapshot, json)?;

        if snapshot.processing_complete {
            log::info!(
                "producer finished at frame {} ({} frames not observed, {} torn reads retried)",
                snapshot.frame_number,
                missed,
                reader.torn_reads()
            );
            break;
        }
    }
    Ok(())
}

fn print_snapshot(snapshot: &RegionSnapshot, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(snapshot)?);
        return Ok(());
    }
    println!(
        "frame {}: {} detections{}{}",
        snapshot.frame_number,
        snapshot.num_detections(),
        if snapshot.truncated { " (truncated)" } else { "" },
        if snapshot.processing_complete {
            " [complete]"
        } else {
            ""
        }
    );
    for det in &snapshot.detections {
        println!(
            "  x={:.0} y={:.0} w={:.0} h={:.0} conf={:.2}",
            det.bbox.x, det.bbox.y, det.bbox.width, det.bbox.height, det.confidence
        );
    }
    Ok(())
}
