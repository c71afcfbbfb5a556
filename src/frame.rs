//! Decoded video frames.
//!
//! Frames are packed RGB24 rasters in the source's original capture resolution. Box decoding
//! always uses these dimensions, never the model input size.

use anyhow::{anyhow, Result};

/// Bytes per pixel of the packed RGB24 layout every source produces.
pub const RGB_CHANNELS: usize = 3;

/// One decoded raster frame.
pub struct Frame {
    pixels: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// Position in the source, starting at 1.
    pub source_index: u64,
}

impl Frame {
    /// Build a frame, checking that the pixel buffer matches the dimensions.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, source_index: u64) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            source_index,
        })
    }

    /// Read-only pixel access for inference backends.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Mutable pixel access for overlays.
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Pixel content is deliberately left out of debug output.
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("source_index", &self.source_index)
            .finish()
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(RGB_CHANNELS))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_pixel_buffer() {
        assert!(Frame::new(vec![0u8; 10], 2, 2, 1).is_err());
        let frame = Frame::new(vec![0u8; 12], 2, 2, 1).unwrap();
        assert_eq!(frame.pixels().len(), 12);
        assert!(!frame.is_empty());
    }

    #[test]
    fn debug_output_omits_pixels() {
        let frame = Frame::new(vec![7u8; 3], 1, 1, 4).unwrap();
        let rendered = format!("{:?}", frame);
        assert!(rendered.contains("source_index: 4"));
        assert!(!rendered.contains("pixels"));
    }
}
