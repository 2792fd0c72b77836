use std::path::PathBuf;

use tinyq_core::TinyError;
use tinyq_onnx::OnnxError;

use crate::params::ConvParams;

#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse sweep file {path}: {source}")]
    Sweep {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("infeasible convolution parameters {0}")]
    Infeasible(ConvParams),

    #[error("fixture '{fixture}' takes {expected} inputs, got {got}")]
    InputCount { fixture: String, expected: usize, got: usize },

    #[error("fixture '{fixture}' produced shape {got:?}, expected {expected:?}")]
    OutputShape { fixture: String, expected: Vec<usize>, got: Vec<usize> },

    #[error(transparent)]
    Onnx(#[from] OnnxError),

    #[error(transparent)]
    Core(#[from] TinyError),
}
