//! Frame ingestion sources.
//!
//! A source produces a finite, ordered, non-restartable sequence of frames:
//! - Local video files (feature: ingest-file-ffmpeg)
//! - Synthetic `stub://` clips (testing, demos)
//!
//! End of stream is signaled by `Ok(None)`, never by an error.

pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;

pub use file::{FileConfig, FileSource, FileStats};

use anyhow::Result;

use crate::frame::Frame;

/// Source of decoded frames consumed by the stream controller.
pub trait FrameSource {
    /// Decode the next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Human-readable description for logs.
    fn describe(&self) -> String {
        "frame source".to_string()
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}
