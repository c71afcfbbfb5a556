//! Local file frame source.
//!
//! `FileSource` decodes frames from a local video file. Paths of the form
//! `stub://<name>[?frames=N]` select a deterministic synthetic clip instead, which is what tests
//! and demos run against when no decoder is compiled in.

use anyhow::{anyhow, Result};
use std::path::Path;

use super::FrameSource;
#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use crate::frame::{rgb_len, Frame};

const STUB_SCHEME: &str = "stub://";
const DEFAULT_STUB_FRAMES: u64 = 30;
const STUB_WIDTH: u32 = 640;
const STUB_HEIGHT: u32 = 480;

/// Configuration for a local file source.
#[derive(Clone, Debug)]
pub struct FileConfig {
    /// Local file path (e.g., "/data/clips/entrance.mp4") or a `stub://` clip.
    pub path: String,
}

impl FileConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
}

enum FileBackend {
    Synthetic(SyntheticFileSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    /// Open the source. Fails if the path is not local, does not exist, or cannot be decoded.
    pub fn open(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes): {}",
                config.path
            ));
        }
        if config.path.starts_with(STUB_SCHEME) {
            let source = SyntheticFileSource::new(config)?;
            log::info!(
                "FileSource: opened {} (synthetic, {} frames)",
                source.config.path,
                source.total_frames
            );
            return Ok(Self {
                backend: FileBackend::Synthetic(source),
            });
        }
        if !Path::new(&config.path).is_file() {
            return Err(anyhow!("video file not found: {}", config.path));
        }

        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            Ok(Self {
                backend: FileBackend::Ffmpeg(FfmpegFileSource::open(config)?),
            })
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            Err(anyhow!(
                "decoding {} requires the ingest-file-ffmpeg feature",
                config.path
            ))
        }
    }

    /// Get frame statistics.
    pub fn stats(&self) -> FileStats {
        match &self.backend {
            FileBackend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.stats(),
        }
    }
}

impl FrameSource for FileSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    fn describe(&self) -> String {
        let stats = self.stats();
        format!("{} ({} frames decoded)", stats.path, stats.frames_decoded)
    }
}

/// Statistics for a file source.
#[derive(Clone, Debug)]
pub struct FileStats {
    pub frames_decoded: u64,
    pub path: String,
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://) for tests
// ----------------------------------------------------------------------------

struct SyntheticFileSource {
    config: FileConfig,
    total_frames: u64,
    frame_count: u64,
}

impl SyntheticFileSource {
    fn new(config: FileConfig) -> Result<Self> {
        let total_frames = parse_stub_frames(&config.path)?;
        Ok(Self {
            config,
            total_frames,
            frame_count: 0,
        })
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.frame_count >= self.total_frames {
            return Ok(None);
        }
        self.frame_count += 1;
        let pixels = self.generate_synthetic_pixels()?;
        Frame::new(pixels, STUB_WIDTH, STUB_HEIGHT, self.frame_count).map(Some)
    }

    fn generate_synthetic_pixels(&self) -> Result<Vec<u8>> {
        let mut pixels = vec![0u8; rgb_len(STUB_WIDTH, STUB_HEIGHT)?];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count) % 256) as u8;
        }
        Ok(pixels)
    }

    fn stats(&self) -> FileStats {
        FileStats {
            frames_decoded: self.frame_count,
            path: self.config.path.clone(),
        }
    }
}

fn parse_stub_frames(path: &str) -> Result<u64> {
    let Some((_, query)) = path.split_once('?') else {
        return Ok(DEFAULT_STUB_FRAMES);
    };
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("frames=") {
            return value
                .parse()
                .map_err(|_| anyhow!("stub frame count must be an integer: {}", value));
        }
    }
    Ok(DEFAULT_STUB_FRAMES)
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if path.starts_with(STUB_SCHEME) {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_source_is_finite_and_ordered() {
        let mut source = FileSource::open(FileConfig::new("stub://clip?frames=3")).unwrap();
        let mut indices = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            assert_eq!((frame.width, frame.height), (STUB_WIDTH, STUB_HEIGHT));
            indices.push(frame.source_index);
        }
        assert_eq!(indices, vec![1, 2, 3]);
        assert!(source.next_frame().unwrap().is_none());
        assert_eq!(source.stats().frames_decoded, 3);
    }

    #[test]
    fn stub_defaults_frame_count() {
        assert_eq!(parse_stub_frames("stub://clip").unwrap(), DEFAULT_STUB_FRAMES);
        assert!(parse_stub_frames("stub://clip?frames=many").is_err());
    }

    #[test]
    fn rejects_remote_and_missing_paths() {
        assert!(FileSource::open(FileConfig::new("rtsp://camera/stream")).is_err());
        assert!(FileSource::open(FileConfig::new("")).is_err());
        assert!(FileSource::open(FileConfig::new("/definitely/not/here.mp4")).is_err());
    }
}
