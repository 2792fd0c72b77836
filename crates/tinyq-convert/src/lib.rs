//! # tinyq-convert
//!
//! Turns ONNX graphs into calibrated int8 `.tqf` artifacts.
//!
//! For each input file: extract the runtime inputs, rehost the graph as an
//! `ExecutionPlan`, stage it next to the input, reload it, calibrate on 100
//! standard-normal samples, write the artifact and remove the staging
//! directory.

pub mod error;
pub mod discover;
pub mod rehost;
pub mod convert;

pub use convert::{Conversion, ConvertConfig, ConvertReport, Converter};
pub use discover::{discover, Job};
pub use error::ConvertError;
pub use rehost::rehost;

pub type Result<T> = std::result::Result<T, ConvertError>;

/// Extension of files picked up from an input directory.
pub const ONNX_EXTENSION: &str = "onnx";
/// Extension of produced artifacts.
pub const TQF_EXTENSION: &str = "tqf";
