use anyhow::Result;

use crate::detect::RawOutputs;
use crate::frame::Frame;

/// Inference backend trait.
///
/// `infer` is an opaque, potentially slow, synchronous call made once per frame. Any error it
/// returns costs only the current frame.
pub trait InferenceBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run the network on a frame and return its raw outputs.
    ///
    /// Implementations must treat the frame as read-only and must not retain it.
    fn infer(&mut self, frame: &Frame) -> Result<RawOutputs>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<B: InferenceBackend + ?Sized> InferenceBackend for Box<B> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn infer(&mut self, frame: &Frame) -> Result<RawOutputs> {
        (**self).infer(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
