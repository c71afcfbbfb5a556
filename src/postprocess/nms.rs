use std::cmp::Ordering;

use super::{BoundingBox, Detection};

/// Intersection-over-union of two rectangles. Zero when the union is empty.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let intersection = a.intersection_area(b);
    let union = a.area() + b.area() - intersection;
    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Greedy non-maximum suppression.
///
/// Candidates are stably sorted by descending confidence, so equal scores keep their input
/// order. The best remaining box is kept and every remaining box overlapping it by more than
/// `nms_threshold` IoU is discarded. The result is in descending confidence order.
pub fn suppress(mut candidates: Vec<Detection>, nms_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let n = candidates.len();
    let mut suppressed = vec![false; n];
    let mut kept = Vec::with_capacity(n);

    for i in 0..n {
        if suppressed[i] {
            continue;
        }
        kept.push(candidates[i]);
        for j in (i + 1)..n {
            if !suppressed[j] && iou(&candidates[i].bbox, &candidates[j].bbox) > nms_threshold {
                suppressed[j] = true;
            }
        }
    }

    kept
}
