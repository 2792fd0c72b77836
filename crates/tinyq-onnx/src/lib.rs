//! # tinyq-onnx
//!
//! The slice of the ONNX interchange format tinyq reads and writes.
//!
//! - `proto`: `prost` definitions of the `onnx.proto` messages in use
//! - `GraphBuilder`: assemble a single-graph model node by node
//! - `Export`: emit a layer as ONNX nodes plus initializers
//! - `OnnxModel`: load/save, runtime-input extraction, constant decoding

pub mod proto;
pub mod builder;
pub mod export;
pub mod model;
pub mod error;

pub use builder::GraphBuilder;
pub use export::Export;
pub use model::{GraphOutput, OnnxModel};
pub use error::OnnxError;

pub type Result<T> = std::result::Result<T, OnnxError>;

/// IR version written into every produced model.
pub const IR_VERSION: i64 = 8;
/// Default-domain opset written into every produced model.
pub const OPSET_VERSION: i64 = 13;
