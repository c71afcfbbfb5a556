use thiserror::Error;

/// Failures surfaced by the detection stream.
///
/// Initialization failures (`SourceUnavailable`, `Resource` while opening the region) are fatal.
/// Once streaming, `Inference` and per-publish `Resource` failures only cost the current frame.
/// None of these ever travel through the shared region.
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("frame source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("shared region error: {0}")]
    Resource(String),

    #[error("inference failed: {0}")]
    Inference(String),
}

impl StreamError {
    /// Process exit status used by the `detector` binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            StreamError::SourceUnavailable(_) => 2,
            StreamError::Resource(_) => 3,
            StreamError::Inference(_) => 1,
        }
    }

    pub fn source_unavailable(err: anyhow::Error) -> Self {
        StreamError::SourceUnavailable(format!("{:#}", err))
    }

    pub fn inference(err: anyhow::Error) -> Self {
        StreamError::Inference(format!("{:#}", err))
    }
}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Resource(err.to_string())
    }
}

pub type StreamResult<T> = Result<T, StreamError>;
