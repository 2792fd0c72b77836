//! Convolution parameter tuples and the sweep that enumerates them.

use std::fmt;
use std::path::Path;

use itertools::iproduct;
use serde::{Deserialize, Serialize};
use tinyq_core::ops::conv_output_dim;

use crate::{FixtureError, Result};

/// Inputs wider than this are limited to `MAX_WIDE_CHANNELS` input channels.
const WIDE_INPUT: usize = 224;
const MAX_WIDE_CHANNELS: usize = 32;

/// One point of the convolution sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConvParams {
    pub input_size: usize,
    pub input_channels: usize,
    pub output_channels: usize,
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
}

impl ConvParams {
    pub fn new(
        input_size: usize,
        input_channels: usize,
        output_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
    ) -> Self {
        Self {
            input_size,
            input_channels,
            output_channels,
            kernel_size,
            stride,
            padding,
        }
    }

    /// Whether a fixture should be generated for this tuple.
    pub fn is_feasible(&self) -> bool {
        let positive = self.input_size > 0
            && self.input_channels > 0
            && self.output_channels > 0
            && self.kernel_size > 0
            && self.stride > 0;
        positive
            && self.padding <= self.kernel_size / 2
            && (self.input_size <= WIDE_INPUT || self.input_channels <= MAX_WIDE_CHANNELS)
            && self.input_size > self.kernel_size
    }

    /// `(input_size + 2·padding − kernel_size) / stride + 1`.
    pub fn output_dim(&self) -> Option<usize> {
        conv_output_dim(self.input_size, self.kernel_size, self.stride, self.padding)
    }

    pub fn input_shape(&self) -> [usize; 4] {
        [1, self.input_channels, self.input_size, self.input_size]
    }

    pub fn output_shape(&self) -> Option<[usize; 4]> {
        let o = self.output_dim()?;
        Some([1, self.output_channels, o, o])
    }

    pub fn file_name(&self) -> String {
        format!("conv2d-{self}.onnx")
    }
}

impl fmt::Display for ConvParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "is{}_ic{}_oc{}_ks{}_s{}_p{}",
            self.input_size, self.input_channels, self.output_channels, self.kernel_size, self.stride, self.padding
        )
    }
}

/// Lists whose cartesian product is the convolution sweep.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvSweep {
    pub input_sizes: Vec<usize>,
    pub input_channels: Vec<usize>,
    pub output_channels: Vec<usize>,
    pub kernel_sizes: Vec<usize>,
    pub strides: Vec<usize>,
    pub paddings: Vec<usize>,
}

impl Default for ConvSweep {
    fn default() -> Self {
        Self {
            input_sizes: vec![10, 224],
            input_channels: vec![1, 3, 32],
            output_channels: vec![32, 256],
            kernel_sizes: vec![3, 5, 11],
            strides: vec![1, 3],
            paddings: vec![0, 2],
        }
    }
}

impl ConvSweep {
    /// Read a sweep from JSON. Missing lists keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text).map_err(|source| FixtureError::Sweep {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Every tuple, feasible or not, in lexicographic list order.
    pub fn tuples(&self) -> impl Iterator<Item = ConvParams> + '_ {
        iproduct!(
            self.input_sizes.iter().copied(),
            self.input_channels.iter().copied(),
            self.output_channels.iter().copied(),
            self.kernel_sizes.iter().copied(),
            self.strides.iter().copied(),
            self.paddings.iter().copied()
        )
        .map(|(is, ic, oc, ks, s, p)| ConvParams::new(is, ic, oc, ks, s, p))
    }

    /// Number of tuples in the full product.
    pub fn len(&self) -> usize {
        self.input_sizes.len()
            * self.input_channels.len()
            * self.output_channels.len()
            * self.kernel_sizes.len()
            * self.strides.len()
            * self.paddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_file_name() {
        let p = ConvParams::new(10, 1, 32, 3, 1, 0);
        assert_eq!(p.file_name(), "conv2d-is10_ic1_oc32_ks3_s1_p0.onnx");
    }

    #[test]
    fn test_output_shapes() {
        assert_eq!(ConvParams::new(10, 1, 32, 3, 1, 0).output_shape(), Some([1, 32, 8, 8]));
        assert_eq!(ConvParams::new(224, 3, 256, 5, 3, 2).output_shape(), Some([1, 256, 75, 75]));
    }

    #[test]
    fn test_feasibility() {
        // padding above kernel/2
        assert!(!ConvParams::new(10, 1, 32, 3, 1, 2).is_feasible());
        // input no larger than kernel
        assert!(!ConvParams::new(10, 1, 32, 11, 1, 0).is_feasible());
        // wide input with too many channels
        assert!(!ConvParams::new(256, 64, 32, 3, 1, 0).is_feasible());
        assert!(ConvParams::new(256, 32, 32, 3, 1, 0).is_feasible());
        assert!(ConvParams::new(224, 32, 256, 11, 3, 2).is_feasible());
        assert!(!ConvParams::new(10, 1, 32, 3, 0, 0).is_feasible());
    }

    #[test]
    fn test_default_sweep() {
        let sweep = ConvSweep::default();
        assert_eq!(sweep.len(), 144);
        assert_eq!(sweep.tuples().count(), 144);
        // ks=3 with p=2 drops 24 tuples, is=10 with ks=11 drops another 24
        let feasible = sweep.tuples().filter(ConvParams::is_feasible).count();
        assert_eq!(feasible, 96);
        assert_eq!(sweep.tuples().next(), Some(ConvParams::new(10, 1, 32, 3, 1, 0)));
    }

    #[test]
    fn test_sweep_from_json_partial() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.json");
        std::fs::write(&path, r#"{"input_sizes": [8], "output_channels": [4]}"#).unwrap();
        let sweep = ConvSweep::load(&path).unwrap();
        assert_eq!(sweep.input_sizes, vec![8]);
        assert_eq!(sweep.output_channels, vec![4]);
        assert_eq!(sweep.kernel_sizes, vec![3, 5, 11]);
    }

    #[test]
    fn test_sweep_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sweep.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(ConvSweep::load(&path), Err(FixtureError::Sweep { .. })));
    }

    proptest! {
        #[test]
        fn prop_feasible_tuples_have_output(
            is in 1usize..300,
            ic in 1usize..64,
            ks in 1usize..13,
            s in 1usize..4,
            p in 0usize..6,
        ) {
            let params = ConvParams::new(is, ic, 8, ks, s, p);
            if params.is_feasible() {
                let o = params.output_dim().unwrap();
                prop_assert_eq!(o, (is + 2 * p - ks) / s + 1);
                prop_assert!(o >= 1);
                prop_assert!(p <= ks / 2);
                prop_assert!(is > ks);
            }
        }
    }
}
