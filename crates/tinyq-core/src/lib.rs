//! # tinyq-core
//!
//! Core tensor engine for tinyq.
//!
//! Provides the foundational `Tensor` type used by the fixture generator and
//! the converter:
//! - Dense, contiguous f32 storage shared through `Arc`
//! - Small-vector shapes with numpy-style broadcasting
//! - Reference kernels (elementwise, matmul, conv2d) used for evaluation
//!   and calibration
//! - `TensorSpec` for declaring named graph inputs

pub mod dtype;
pub mod shape;
pub mod spec;
pub mod tensor;
pub mod ops;
pub mod error;

pub use dtype::DType;
pub use shape::Shape;
pub use spec::TensorSpec;
pub use tensor::Tensor;
pub use error::TinyError;

pub type Result<T> = std::result::Result<T, TinyError>;
