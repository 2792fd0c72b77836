//! Tensor operations: elementwise arithmetic, matmul and convolution.
//!
//! All operations return new tensors (functional style).

pub mod arithmetic;
pub mod conv;

pub use conv::{conv2d, conv_output_dim, Conv2dGeometry};
