use crate::config::FilterSettings;
use crate::detect::{RawOutputs, CLASS_SCORES_OFFSET};

use super::{BoundingBox, Detection};

/// Threshold raw rows for the target class and decode them to pixel rectangles.
///
/// The best class of a row is the arg-max of its class scores (first index wins ties). A row is
/// kept when that class is the target and its score is strictly above the threshold. Box fields
/// are normalized centers/sizes and are scaled by the original frame size. Output keeps row
/// order.
pub fn filter_candidates(
    outputs: &RawOutputs,
    frame_width: u32,
    frame_height: u32,
    settings: &FilterSettings,
) -> Vec<Detection> {
    let fw = frame_width as f32;
    let fh = frame_height as f32;

    outputs
        .rows()
        .filter_map(|row| {
            let (class_id, score) = best_class(row)?;
            if class_id != settings.target_class || score <= settings.conf_threshold {
                return None;
            }
            let (cx, cy, w, h) = (row[0] * fw, row[1] * fh, row[2] * fw, row[3] * fh);
            Some(Detection {
                bbox: BoundingBox::new(cx - w / 2.0, cy - h / 2.0, w, h),
                confidence: score,
            })
        })
        .collect()
}

fn best_class(row: &[f32]) -> Option<(usize, f32)> {
    let scores = row.get(CLASS_SCORES_OFFSET..)?;
    let mut best: Option<(usize, f32)> = None;
    for (class_id, &score) in scores.iter().enumerate() {
        if score.is_nan() {
            continue;
        }
        match best {
            Some((_, top)) if score <= top => {}
            _ => best = Some((class_id, score)),
        }
    }
    best
}
