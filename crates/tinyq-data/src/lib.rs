//! # tinyq-data
//!
//! Datasets that feed the quantizer's calibration pass.

pub mod calibration;

pub use calibration::{CalibrationDataset, CalibrationIter, CalibrationSample, RepresentativeDataset};

/// Samples drawn per conversion.
pub const DEFAULT_NUM_SAMPLES: usize = 100;
