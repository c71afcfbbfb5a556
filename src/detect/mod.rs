//! Inference backends.
//!
//! The network is an external collaborator: a backend takes a frame and returns the raw
//! per-row box encodings and class scores. Everything downstream of `RawOutputs` lives in
//! `crate::postprocess`.

mod backend;
mod backends;
mod outputs;

pub use backend::InferenceBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use outputs::{OutputTensor, RawOutputs, CLASS_SCORES_OFFSET};

use anyhow::{anyhow, Result};

use crate::config::{BackendKind, InferenceSettings};

/// Build the backend selected by configuration.
pub fn build_backend(settings: &InferenceSettings) -> Result<Box<dyn InferenceBackend>> {
    let mut backend: Box<dyn InferenceBackend> = match settings.backend {
        BackendKind::Stub => Box::new(StubBackend::new()),
        BackendKind::Tract => build_tract(settings)?,
    };
    backend.warm_up()?;
    log::info!("inference backend: {}", backend.name());
    Ok(backend)
}

#[cfg(feature = "backend-tract")]
fn build_tract(settings: &InferenceSettings) -> Result<Box<dyn InferenceBackend>> {
    let model_path = settings
        .model_path
        .as_ref()
        .ok_or_else(|| anyhow!("tract backend requires inference.model_path"))?;
    Ok(Box::new(TractBackend::new(
        model_path,
        settings.input_width,
        settings.input_height,
    )?))
}

#[cfg(not(feature = "backend-tract"))]
fn build_tract(_settings: &InferenceSettings) -> Result<Box<dyn InferenceBackend>> {
    Err(anyhow!("tract backend requires the backend-tract feature"))
}
