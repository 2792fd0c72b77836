use tinyq_core::{DType, TinyError};

use crate::format::FormatError;

/// Errors raised while staging, quantizing or running a plan.
#[derive(Debug, thiserror::Error)]
pub enum EdgeError {
    #[error("unknown value '{0}'")]
    UnknownValue(String),

    #[error("constant '{0}' not found")]
    MissingConstant(String),

    #[error("no feed for input '{0}'")]
    MissingFeed(String),

    #[error("feed '{name}' has shape {got:?}, expected {expected:?}")]
    FeedShape { name: String, expected: Vec<usize>, got: Vec<usize> },

    #[error("no quantization parameters for '{0}'")]
    MissingQuantParams(String),

    #[error("calibration dataset produced no samples")]
    EmptyCalibration,

    #[error("unsupported quantization option: {0}")]
    UnsupportedOption(String),

    #[error("tensor '{name}' stored as {dtype}, which this op cannot consume")]
    UnsupportedTensorDType { name: String, dtype: DType },

    #[error("staged constant '{name}' has dtype {dtype}, expected F32")]
    StagedDType { name: String, dtype: String },

    #[error("staging I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("safetensors error: {0}")]
    SafeTensors(#[from] safetensors::SafeTensorError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Core(#[from] TinyError),
}
