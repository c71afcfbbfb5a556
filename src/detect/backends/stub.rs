use anyhow::Result;

use crate::detect::backend::InferenceBackend;
use crate::detect::outputs::{OutputTensor, RawOutputs};
use crate::frame::Frame;

const WALK_PERIOD: u64 = 60;

/// Stub backend for testing and demos. No model is loaded.
///
/// Each frame yields a small, deterministic two-class output layer: one target-class box that
/// walks across the frame, a weaker near-duplicate of it, a below-threshold box, and a box that
/// belongs to the other class. After post-processing exactly one detection survives.
pub struct StubBackend {
    frames_seen: u64,
}

impl StubBackend {
    pub fn new() -> Self {
        Self { frames_seen: 0 }
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn infer(&mut self, frame: &Frame) -> Result<RawOutputs> {
        self.frames_seen += 1;

        let phase = (frame.source_index % WALK_PERIOD) as f32 / WALK_PERIOD as f32;
        let cx = 0.1 + 0.8 * phase;
        let rows = vec![
            vec![cx, 0.5, 0.1, 0.3, 0.95, 0.9, 0.05],
            vec![cx + 0.005, 0.505, 0.1, 0.3, 0.9, 0.7, 0.1],
            vec![0.5, 0.15, 0.05, 0.1, 0.6, 0.3, 0.2],
            vec![0.85, 0.8, 0.2, 0.2, 0.9, 0.1, 0.95],
        ];
        Ok(RawOutputs::new(vec![OutputTensor::from_rows(&rows)?]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_backend_emits_one_layer_per_frame() {
        let mut backend = StubBackend::default();
        let frame = Frame::new(vec![0u8; 12], 2, 2, 1).unwrap();

        let outputs = backend.infer(&frame).unwrap();
        assert_eq!(outputs.tensors().len(), 1);
        assert_eq!(outputs.num_rows(), 4);
        assert_eq!(backend.frames_seen(), 1);
    }

    #[test]
    fn walker_moves_between_frames() {
        let mut backend = StubBackend::default();
        let first = Frame::new(vec![0u8; 12], 2, 2, 1).unwrap();
        let second = Frame::new(vec![0u8; 12], 2, 2, 2).unwrap();

        let a = backend.infer(&first).unwrap();
        let b = backend.infer(&second).unwrap();
        let cx_a = a.rows().next().unwrap()[0];
        let cx_b = b.rows().next().unwrap()[0];
        assert!(cx_b > cx_a);
    }
}
