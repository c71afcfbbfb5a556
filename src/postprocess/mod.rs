//! Post-processing of raw network output.
//!
//! `filter` → `nms` → `encode`: raw rows become thresholded target-class candidates, duplicates
//! are suppressed, and the survivors are capped into a fixed-capacity `FrameResult`. All three
//! stages are pure functions.

pub mod encode;
pub mod filter;
pub mod nms;

pub use encode::encode;
pub use filter::filter_candidates;
pub use nms::{iou, suppress};

use serde::Serialize;

/// Maximum detections a published record can carry.
pub const DETECTION_CAPACITY: usize = 50;

/// Largest frame number the record's signed 32-bit field can carry.
pub const MAX_FRAME_NUMBER: u32 = i32::MAX as u32;

/// Axis-aligned rectangle in pixel coordinates (top-left origin).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width: width.max(0.0),
            height: height.max(0.0),
        }
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);
        (right - left).max(0.0) * (bottom - top).max(0.0)
    }
}

/// One recognized target-class instance in one frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    pub confidence: f32,
}

/// Full detection output for one frame, ready to publish.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameResult {
    /// Starts at 1; follows source frame order. Never above `MAX_FRAME_NUMBER`.
    pub frame_number: u32,
    /// At most `DETECTION_CAPACITY` entries, descending confidence.
    pub detections: Vec<Detection>,
    /// More candidates survived suppression than the record can hold.
    pub truncated: bool,
}

impl FrameResult {
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}
