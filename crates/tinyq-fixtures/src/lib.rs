//! # tinyq-fixtures
//!
//! Deterministic ONNX graphs for exercising converters and int8 runtimes.
//!
//! - `add/add-{L}.onnx`: two `[1, L]` inputs summed
//! - `conv2d/conv2d-is.._ic.._oc.._ks.._s.._p...onnx`: one conv per feasible sweep tuple
//! - `simple-models/`: composite conv+add graphs and hand-weighted layers

pub mod error;
pub mod params;
pub mod models;
pub mod generator;

pub use error::FixtureError;
pub use generator::{FixtureGenerator, GenerationReport, GeneratorConfig};
pub use models::Fixture;
pub use params::{ConvParams, ConvSweep};

pub type Result<T> = std::result::Result<T, FixtureError>;

/// Vector lengths for the elementwise-add fixtures.
pub const DEFAULT_ALU_VECTOR_SIZES: [usize; 11] = [1, 4, 16, 25, 64, 256, 1024, 4096, 8192, 10000, 200007];
