//! Frame-synchronised overlay of published detections.
//!
//! A consumer decoding the same video as the producer walks its own frames in order. For each
//! frame it waits until the region has caught up (`frame_number >= current`, or the stream is
//! complete). Boxes are drawn only when the record is exactly the current frame; a record that
//! already moved past it leaves the frame as decoded.

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::StreamResult;
use crate::frame::{Frame, RGB_CHANNELS};
use crate::ingest::FrameSource;
use crate::postprocess::{BoundingBox, Detection};
use crate::shm::{RegionReader, RegionSnapshot};

pub const BOX_COLOR: [u8; 3] = [0, 255, 0];
pub const BOX_THICKNESS: u32 = 2;

/// Where the region stood once the consumer stopped waiting for a frame.
#[derive(Debug)]
pub enum FrameSync {
    /// The record holds exactly the requested frame.
    Matched(RegionSnapshot),
    /// The producer moved past the frame, or completed before reaching it.
    Unmatched(RegionSnapshot),
    /// The stop flag was raised while waiting.
    Stopped,
}

/// Poll until the region reaches `current_frame` or completes.
pub fn sync_to_frame(
    reader: &mut RegionReader,
    current_frame: i32,
    poll_interval: Duration,
    stop: &AtomicBool,
) -> StreamResult<FrameSync> {
    loop {
        if stop.load(Ordering::SeqCst) {
            return Ok(FrameSync::Stopped);
        }
        let snapshot = reader.snapshot()?;
        if snapshot.frame_number < current_frame && !snapshot.processing_complete {
            std::thread::sleep(poll_interval);
            continue;
        }
        if snapshot.frame_number == current_frame {
            return Ok(FrameSync::Matched(snapshot));
        }
        return Ok(FrameSync::Unmatched(snapshot));
    }
}

/// The producer is done and has published nothing beyond `current_frame`.
pub fn stream_finished(snapshot: &RegionSnapshot, current_frame: i32) -> bool {
    snapshot.processing_complete && current_frame >= snapshot.frame_number
}

/// Outline `bbox` in place, clipped to the frame.
pub fn draw_rect(frame: &mut Frame, bbox: &BoundingBox, color: [u8; 3], thickness: u32) {
    let (width, height) = (i64::from(frame.width), i64::from(frame.height));
    if width == 0 || height == 0 || thickness == 0 {
        return;
    }
    let x0 = bbox.x.floor() as i64;
    let y0 = bbox.y.floor() as i64;
    let x1 = (bbox.x + bbox.width).ceil() as i64 - 1;
    let y1 = (bbox.y + bbox.height).ceil() as i64 - 1;
    if x1 < x0 || y1 < y0 {
        return;
    }

    let t = i64::from(thickness);
    let stride = frame.width as usize;
    let pixels = frame.pixels_mut();
    for y in y0.max(0)..=y1.min(height - 1) {
        for x in x0.max(0)..=x1.min(width - 1) {
            let on_edge = x < x0 + t || x > x1 - t || y < y0 + t || y > y1 - t;
            if on_edge {
                let at = (y as usize * stride + x as usize) * RGB_CHANNELS;
                pixels[at..at + RGB_CHANNELS].copy_from_slice(&color);
            }
        }
    }
}

/// Outline every detection; returns how many were drawn.
pub fn draw_detections(frame: &mut Frame, detections: &[Detection]) -> usize {
    for det in detections {
        draw_rect(frame, &det.bbox, BOX_COLOR, BOX_THICKNESS);
    }
    detections.len()
}

/// Encode a frame as an image file; the format follows the extension.
pub fn save_frame(frame: &Frame, path: &Path) -> Result<()> {
    let image = image::RgbImage::from_raw(frame.width, frame.height, frame.pixels().to_vec())
        .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", frame.width, frame.height))?;
    image
        .save(path)
        .with_context(|| format!("write {}", path.display()))
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AnnotateReport {
    pub frames_written: u64,
    pub frames_annotated: u64,
    pub detections_drawn: u64,
    pub stopped: bool,
}

/// Walks a frame source in lockstep with the region and writes each frame, annotated when the
/// region holds its detections, as `frame_NNNNNN.png` under the output directory.
pub struct Annotator<S> {
    source: S,
    reader: RegionReader,
    output_dir: PathBuf,
    poll_interval: Duration,
    stop: Arc<AtomicBool>,
}

impl<S: FrameSource> Annotator<S> {
    pub fn new(
        source: S,
        reader: RegionReader,
        output_dir: impl Into<PathBuf>,
        poll_interval: Duration,
    ) -> Result<Self> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("create {}", output_dir.display()))?;
        Ok(Self {
            source,
            reader,
            output_dir,
            poll_interval,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn with_stop(mut self, stop: Arc<AtomicBool>) -> Self {
        self.stop = stop;
        self
    }

    pub fn frame_path(&self, frame_number: i32) -> PathBuf {
        self.output_dir.join(format!("frame_{:06}.png", frame_number))
    }

    pub fn run(&mut self) -> Result<AnnotateReport> {
        let mut report = AnnotateReport::default();
        let mut current: i32 = 0;
        log::info!(
            "annotating {} into {}",
            self.source.describe(),
            self.output_dir.display()
        );

        while let Some(mut frame) = self.source.next_frame()? {
            current = current
                .checked_add(1)
                .ok_or_else(|| anyhow!("frame counter overflow"))?;

            match sync_to_frame(&mut self.reader, current, self.poll_interval, &self.stop)? {
                FrameSync::Stopped => {
                    report.stopped = true;
                    break;
                }
                FrameSync::Matched(snapshot) => {
                    let drawn = draw_detections(&mut frame, &snapshot.detections);
                    report.detections_drawn += drawn as u64;
                    report.frames_annotated += 1;
                    log::debug!("frame {}: {} boxes drawn", current, drawn);
                }
                FrameSync::Unmatched(snapshot) => {
                    log::debug!(
                        "frame {}: region holds frame {}, left unannotated",
                        current,
                        snapshot.frame_number
                    );
                }
            }

            save_frame(&frame, &self.frame_path(current))?;
            report.frames_written += 1;

            if stream_finished(&self.reader.snapshot()?, current) {
                log::info!("producer complete at frame {}", current);
                break;
            }
        }

        log::info!(
            "annotation done: {} frames written, {} annotated, {} boxes",
            report.frames_written,
            report.frames_annotated,
            report.detections_drawn
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{FileConfig, FileSource};
    use crate::postprocess::{FrameResult, DETECTION_CAPACITY};
    use crate::shm::ShmPublisher;
    use std::time::Instant;

    const POLL: Duration = Duration::from_millis(1);

    fn blank(width: u32, height: u32) -> Frame {
        Frame::new(vec![0; (width * height) as usize * RGB_CHANNELS], width, height, 1).unwrap()
    }

    fn pixel(frame: &Frame, x: u32, y: u32) -> [u8; 3] {
        let at = (y * frame.width + x) as usize * RGB_CHANNELS;
        frame.pixels()[at..at + RGB_CHANNELS].try_into().unwrap()
    }

    fn boxed(frame_number: u32, bbox: BoundingBox) -> FrameResult {
        FrameResult {
            frame_number,
            detections: vec![Detection {
                bbox,
                confidence: 0.9,
            }],
            truncated: false,
        }
    }

    fn region() -> (tempfile::TempDir, PathBuf, ShmPublisher, RegionReader) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region");
        let publisher = ShmPublisher::open(&path, DETECTION_CAPACITY).unwrap();
        let reader = RegionReader::open(&path).unwrap();
        (dir, path, publisher, reader)
    }

    #[test]
    fn rect_outline_leaves_interior_untouched() {
        let mut frame = blank(10, 10);
        draw_rect(&mut frame, &BoundingBox::new(2.0, 2.0, 4.0, 4.0), BOX_COLOR, 1);
        assert_eq!(pixel(&frame, 2, 2), BOX_COLOR);
        assert_eq!(pixel(&frame, 5, 5), BOX_COLOR);
        assert_eq!(pixel(&frame, 5, 3), BOX_COLOR);
        assert_eq!(pixel(&frame, 3, 3), [0, 0, 0]);
        assert_eq!(pixel(&frame, 6, 6), [0, 0, 0]);
        assert_eq!(pixel(&frame, 1, 1), [0, 0, 0]);
    }

    #[test]
    fn rect_is_clipped_to_frame() {
        let mut frame = blank(8, 8);
        draw_rect(&mut frame, &BoundingBox::new(-5.0, -5.0, 20.0, 20.0), BOX_COLOR, 2);
        assert_eq!(pixel(&frame, 0, 0), [0, 0, 0]);
        draw_rect(&mut frame, &BoundingBox::new(6.0, 6.0, 10.0, 10.0), BOX_COLOR, 1);
        assert_eq!(pixel(&frame, 6, 6), BOX_COLOR);
        draw_rect(&mut frame, &BoundingBox::new(100.0, 100.0, 5.0, 5.0), BOX_COLOR, 1);
    }

    #[test]
    fn sync_matches_current_frame_without_waiting() {
        let (_dir, _path, mut publisher, mut reader) = region();
        publisher
            .publish(&boxed(1, BoundingBox::new(1.0, 1.0, 2.0, 2.0)))
            .unwrap();
        let stop = AtomicBool::new(false);
        match sync_to_frame(&mut reader, 1, POLL, &stop).unwrap() {
            FrameSync::Matched(snapshot) => assert_eq!(snapshot.num_detections(), 1),
            other => panic!("expected a match, got {:?}", other),
        }
    }

    #[test]
    fn sync_skips_frame_the_producer_already_passed() {
        let (_dir, _path, mut publisher, mut reader) = region();
        publisher.publish(&boxed(3, BoundingBox::default())).unwrap();
        let stop = AtomicBool::new(false);
        assert!(matches!(
            sync_to_frame(&mut reader, 2, POLL, &stop).unwrap(),
            FrameSync::Unmatched(s) if s.frame_number == 3
        ));
    }

    #[test]
    fn sync_waits_for_a_lagging_producer() {
        let (_dir, _path, mut publisher, mut reader) = region();
        publisher.publish(&boxed(1, BoundingBox::default())).unwrap();
        let stop = AtomicBool::new(false);

        let synced = std::thread::scope(|scope| {
            let waiter = scope.spawn(|| sync_to_frame(&mut reader, 2, POLL, &stop).unwrap());
            std::thread::sleep(Duration::from_millis(30));
            publisher
                .publish(&boxed(2, BoundingBox::new(4.0, 4.0, 4.0, 4.0)))
                .unwrap();
            waiter.join().unwrap()
        });
        assert!(matches!(synced, FrameSync::Matched(s) if s.frame_number == 2));
    }

    #[test]
    fn sync_gives_up_once_the_stream_completed() {
        let (_dir, _path, mut publisher, mut reader) = region();
        publisher.publish(&boxed(1, BoundingBox::default())).unwrap();
        publisher.mark_complete().unwrap();
        let stop = AtomicBool::new(false);

        let FrameSync::Unmatched(snapshot) = sync_to_frame(&mut reader, 2, POLL, &stop).unwrap()
        else {
            panic!("expected no match after completion");
        };
        assert!(stream_finished(&snapshot, 2));
        assert!(!stream_finished(&snapshot, 0));
    }

    #[test]
    fn sync_honours_stop_flag() {
        let (_dir, _path, _publisher, mut reader) = region();
        let stop = AtomicBool::new(true);
        assert!(matches!(
            sync_to_frame(&mut reader, 1, POLL, &stop).unwrap(),
            FrameSync::Stopped
        ));
    }

    #[test]
    fn annotator_leaves_passed_frames_bare_and_stops_at_completion() {
        let (dir, _path, mut publisher, reader) = region();
        publisher
            .publish(&boxed(2, BoundingBox::new(10.0, 20.0, 30.0, 40.0)))
            .unwrap();
        publisher.mark_complete().unwrap();

        let source = FileSource::open(FileConfig::new("stub://clip?frames=4")).unwrap();
        let out = dir.path().join("out");
        let mut annotator = Annotator::new(source, reader, &out, POLL).unwrap();
        let report = annotator.run().unwrap();

        assert_eq!(report.frames_written, 2);
        assert_eq!(report.frames_annotated, 1);
        assert_eq!(report.detections_drawn, 1);
        assert!(annotator.frame_path(1).exists());
        assert!(!annotator.frame_path(3).exists());

        let written = image::open(annotator.frame_path(2)).unwrap().to_rgb8();
        assert_eq!(written.dimensions(), (640, 480));
        assert_eq!(written.get_pixel(10, 20).0, BOX_COLOR);
    }

    #[test]
    fn annotator_follows_producer_in_lockstep() {
        let (dir, _path, mut publisher, reader) = region();
        let source = FileSource::open(FileConfig::new("stub://clip?frames=3")).unwrap();
        let out = dir.path().join("out");
        let mut annotator = Annotator::new(source, reader, &out, POLL).unwrap();
        let written = |n: i32| out.join(format!("frame_{:06}.png", n));

        let report = std::thread::scope(|scope| {
            scope.spawn(|| {
                for n in 1..=3u32 {
                    let deadline = Instant::now() + Duration::from_secs(10);
                    while n > 1 && !written(n as i32 - 1).exists() {
                        assert!(Instant::now() < deadline, "consumer stalled");
                        std::thread::sleep(POLL);
                    }
                    publisher
                        .publish(&boxed(n, BoundingBox::new(5.0, 5.0, 20.0, 20.0)))
                        .unwrap();
                }
            });
            annotator.run().unwrap()
        });

        assert_eq!(report.frames_written, 3);
        assert_eq!(report.frames_annotated, 3);
        assert!(!report.stopped);
    }
}
