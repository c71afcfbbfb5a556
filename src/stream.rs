//! Per-frame detection loop.
//!
//! `StreamController` is the only component with loop control:
//! pull frame → infer → filter → suppress → encode → publish, until the source is exhausted or
//! the interrupt flag is raised. States advance `Initializing → Streaming → Completed → Closed`.
//!
//! Frame numbers follow decoded source frames (1, 2, 3, ...). A frame that fails inference or
//! publishing still consumes its number, so `frame_number` always maps 1:1 to the source
//! position and consumers see a gap where a frame was skipped.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::{FilterSettings, StreamSettings};
use crate::detect::InferenceBackend;
use crate::error::{StreamError, StreamResult};
use crate::frame::Frame;
use crate::ingest::FrameSource;
use crate::postprocess::{encode, filter_candidates, suppress, FrameResult, MAX_FRAME_NUMBER};

/// Destination of encoded frame results.
pub trait ResultSink {
    fn publish(&mut self, result: &FrameResult) -> StreamResult<()>;

    /// Final write after the last publish.
    fn mark_complete(&mut self) -> StreamResult<()>;

    /// Release this process's handle. Must be idempotent.
    fn close(&mut self) -> StreamResult<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamState {
    Initializing,
    Streaming,
    Completed,
    Closed,
}

/// Counters describing a finished run.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StreamReport {
    pub frames_decoded: u64,
    pub frames_published: u64,
    pub inference_failures: u64,
    pub publish_failures: u64,
    pub truncated_frames: u64,
    pub detections_published: u64,
    /// Frame number of the last record that reached the sink (0 if none).
    pub last_frame_number: u32,
    pub interrupted: bool,
    /// The source failed mid-stream; treated as end of stream.
    pub source_failed: bool,
    /// Frame numbers ran out before the source did; treated as end of stream.
    pub frame_limit_reached: bool,
}

impl StreamReport {
    pub fn frames_skipped(&self) -> u64 {
        self.inference_failures + self.publish_failures
    }
}

pub struct StreamController<S, B, P> {
    source: S,
    backend: B,
    sink: P,
    filter: FilterSettings,
    settings: StreamSettings,
    interrupt: Arc<AtomicBool>,
    frame_limit: u64,
    state: StreamState,
    report: StreamReport,
}

impl<S, B, P> StreamController<S, B, P>
where
    S: FrameSource,
    B: InferenceBackend,
    P: ResultSink,
{
    /// Both collaborators are already open; the controller starts in `Initializing`.
    pub fn new(
        source: S,
        backend: B,
        sink: P,
        filter: FilterSettings,
        settings: StreamSettings,
    ) -> Self {
        Self {
            source,
            backend,
            sink,
            filter,
            settings,
            interrupt: Arc::new(AtomicBool::new(false)),
            frame_limit: u64::from(MAX_FRAME_NUMBER),
            state: StreamState::Initializing,
            report: StreamReport::default(),
        }
    }

    /// Share an externally owned interrupt flag (e.g. one set by a signal handler).
    pub fn with_interrupt(mut self, interrupt: Arc<AtomicBool>) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn report(&self) -> &StreamReport {
        &self.report
    }

    pub fn sink(&self) -> &P {
        &self.sink
    }

    /// Run one frame through inference and post-processing.
    pub fn process_frame(&mut self, frame: &Frame, frame_number: u32) -> StreamResult<FrameResult> {
        let outputs = self
            .backend
            .infer(frame)
            .map_err(StreamError::inference)?;
        let candidates = filter_candidates(&outputs, frame.width, frame.height, &self.filter);
        let kept = suppress(candidates, self.filter.nms_threshold);
        Ok(encode(frame_number, kept))
    }

    /// Stream until the source is exhausted or interrupted, then complete and close the sink.
    ///
    /// Per-frame failures are logged, counted and skipped. Only completion or close failures
    /// are returned as errors, after both have been attempted.
    pub fn run(&mut self) -> StreamResult<StreamReport> {
        if self.state != StreamState::Initializing {
            return Err(StreamError::Resource(format!(
                "stream controller cannot run from state {:?}",
                self.state
            )));
        }
        self.state = StreamState::Streaming;
        log::info!("streaming from {}", self.source.describe());

        loop {
            if self.interrupt.load(Ordering::SeqCst) {
                log::info!(
                    "interrupted after {} frames, completing stream",
                    self.report.frames_decoded
                );
                self.report.interrupted = true;
                break;
            }

            if self.report.frames_decoded >= self.frame_limit {
                log::error!(
                    "frame number limit {} reached, ending stream",
                    self.frame_limit
                );
                self.report.frame_limit_reached = true;
                break;
            }

            let frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => {
                    log::error!(
                        "frame source failed after {} frames, ending stream: {:#}",
                        self.report.frames_decoded,
                        e
                    );
                    self.report.source_failed = true;
                    break;
                }
            };
            self.report.frames_decoded += 1;
            let Ok(frame_number) = u32::try_from(self.report.frames_decoded) else {
                self.report.frame_limit_reached = true;
                break;
            };

            self.stream_frame(&frame, frame_number);

            if self.settings.progress_every > 0
                && self.report.frames_decoded % self.settings.progress_every == 0
            {
                log::info!(
                    "progress: {} frames decoded, {} published, {} skipped",
                    self.report.frames_decoded,
                    self.report.frames_published,
                    self.report.frames_skipped()
                );
            }

            if !self.settings.frame_delay.is_zero() {
                std::thread::sleep(self.settings.frame_delay);
            }
        }

        self.state = StreamState::Completed;
        let completed = self.sink.mark_complete();
        self.state = StreamState::Closed;
        let closed = self.sink.close();
        completed?;
        closed?;

        log::info!(
            "stream closed: {} frames decoded, {} published, {} inference failures, {} publish failures, {} truncated",
            self.report.frames_decoded,
            self.report.frames_published,
            self.report.inference_failures,
            self.report.publish_failures,
            self.report.truncated_frames
        );
        Ok(self.report.clone())
    }

    fn stream_frame(&mut self, frame: &Frame, frame_number: u32) {
        let result = match self.process_frame(frame, frame_number) {
            Ok(result) => result,
            Err(e) => {
                log::warn!("frame {}: skipped: {}", frame_number, e);
                self.report.inference_failures += 1;
                return;
            }
        };

        if let Err(e) = self.sink.publish(&result) {
            log::warn!("frame {}: publish failed, skipped: {}", frame_number, e);
            self.report.publish_failures += 1;
            return;
        }

        self.report.frames_published += 1;
        self.report.detections_published += result.len() as u64;
        self.report.last_frame_number = frame_number;
        if result.truncated {
            self.report.truncated_frames += 1;
        }
        log::debug!(
            "frame {}: {} detections{}",
            frame_number,
            result.len(),
            if result.truncated { " (truncated)" } else { "" }
        );
    }
}
