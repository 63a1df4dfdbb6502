use std::path::PathBuf;
use thiserror::Error;

/// Why a model file could not be turned into an inference session.
#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("model file not found: {0}")]
    Missing(PathBuf),

    #[error("failed to load model {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("ONNX Runtime unavailable: {0}")]
    Runtime(String),

    #[error("built without ONNX Runtime support")]
    Unsupported,
}

impl ModelLoadError {
    /// Only a broken runtime stops a worker; every other load failure leaves
    /// the component disabled.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ModelLoadError::Runtime(_))
    }
}

/// Raw network output that does not line up with what the decoder expects.
#[derive(Debug, Error, PartialEq)]
pub enum ShapeError {
    #[error("{tensor} output has {actual} values, expected {expected}")]
    Mismatch { tensor: &'static str, expected: usize, actual: usize },

    #[error("model produced no {0} output")]
    MissingOutput(&'static str),

    #[error("{tensor} output length {len} is not a multiple of {row}")]
    Ragged { tensor: &'static str, len: usize, row: usize },
}

/// Per-job failure. The `Display` text is what gets persisted as the task's
/// error message.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("source file not found: {0}")]
    SourceMissing(PathBuf),

    #[error("failed to read {path}: {message}")]
    Unreadable { path: PathBuf, message: String },

    #[error("failed to decode image {path}: {message}")]
    Decode { path: PathBuf, message: String },

    #[error("failed to encode {what}: {message}")]
    Encode { what: &'static str, message: String },

    #[error("face detector not enabled")]
    DetectorDisabled,

    #[error("failed to store result: {0}")]
    Persistence(String),

    #[error("worker panicked while processing job")]
    Panicked,
}
