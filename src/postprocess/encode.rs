use super::{Detection, FrameResult, DETECTION_CAPACITY};

/// Cap a suppressed candidate list into a publishable `FrameResult`.
///
/// Input is expected in descending confidence order, so keeping the prefix keeps the
/// strongest detections. When more than `DETECTION_CAPACITY` candidates survive, the lowest
/// confidence ones are dropped and `truncated` is set; consumers can rely on this policy.
pub fn encode(frame_number: u32, mut suppressed: Vec<Detection>) -> FrameResult {
    let truncated = suppressed.len() > DETECTION_CAPACITY;
    if truncated {
        log::debug!(
            "frame {}: {} detections exceed capacity {}, dropping the weakest",
            frame_number,
            suppressed.len(),
            DETECTION_CAPACITY
        );
        suppressed.truncate(DETECTION_CAPACITY);
    }
    FrameResult {
        frame_number,
        detections: suppressed,
        truncated,
    }
}
