//! # tinyq-edge
//!
//! Everything between a parsed graph and a deployable int8 artifact.
//!
//! ## Pipeline
//! - `ExecutionPlan`: op list + f32 constants, executable in f32
//! - `staging`: plan directory (`plan.json` + `variables.safetensors`)
//! - `Quantizer`: calibrates activation ranges and lowers to int8
//! - `.tqf` format: single-file, 64-byte aligned int8 container
//! - `Session`: int8 reference runtime for `.tqf` models

pub mod error;
pub mod plan;
pub mod staging;
pub mod quantize;
pub mod format;
pub mod runtime;

pub use error::EdgeError;
pub use format::{FormatError, IoSpec, TensorEntry, TqfBuilder, TqfHeader, TqfModel};
pub use plan::{ExecutionPlan, PlanOp};
pub use quantize::{OpSet, Optimization, QuantParams, QuantizeOptions, Quantizer, RangeObserver};
pub use runtime::{QuantizedTensor, Session};

pub type Result<T> = std::result::Result<T, EdgeError>;
