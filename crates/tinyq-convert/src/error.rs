use std::path::PathBuf;

use tinyq_core::TinyError;
use tinyq_edge::{EdgeError, FormatError};
use tinyq_onnx::OnnxError;

#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("input path {0} does not exist")]
    MissingInput(PathBuf),

    #[error("input path {0} is neither a file nor a directory")]
    UnsupportedInput(PathBuf),

    #[error("matched {path} outside input directory {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("node '{node}': unsupported {op} ({reason})")]
    UnsupportedOp { op: String, node: String, reason: String },

    #[error("output '{name}' is declared as {declared:?} but the graph produces {inferred:?}")]
    OutputShape { name: String, declared: Vec<usize>, inferred: Vec<usize> },

    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("directory walk failed: {0}")]
    Glob(#[from] glob::GlobError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Onnx(#[from] OnnxError),

    #[error(transparent)]
    Edge(#[from] EdgeError),

    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Core(#[from] TinyError),
}
