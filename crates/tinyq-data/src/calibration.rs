//! Standard-normal calibration data shaped like a graph's runtime inputs.

use rand::rngs::StdRng;
use rand::SeedableRng;

use tinyq_core::{Tensor, TensorSpec};

/// One calibration feed: a tensor per runtime input, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSample {
    pub inputs: Vec<(String, Tensor)>,
}

impl CalibrationSample {
    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.inputs.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}

/// A finite, restartable source of calibration samples.
pub trait RepresentativeDataset {
    /// Number of samples one pass yields.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inputs every sample provides.
    fn specs(&self) -> &[TensorSpec];

    /// Start a fresh pass over the samples.
    fn samples(&self) -> Box<dyn Iterator<Item = CalibrationSample> + '_>;
}

/// `num_samples` samples of i.i.d. N(0, 1) values.
///
/// Samples are generated lazily. With a seed every pass yields the same
/// sequence; without one each pass draws from fresh entropy.
#[derive(Debug, Clone)]
pub struct CalibrationDataset {
    specs: Vec<TensorSpec>,
    num_samples: usize,
    seed: Option<u64>,
}

impl CalibrationDataset {
    pub fn new(specs: Vec<TensorSpec>, num_samples: usize, seed: Option<u64>) -> Self {
        Self { specs, num_samples, seed }
    }

    pub fn iter(&self) -> CalibrationIter<'_> {
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        CalibrationIter {
            specs: &self.specs,
            remaining: self.num_samples,
            rng,
        }
    }
}

impl RepresentativeDataset for CalibrationDataset {
    fn len(&self) -> usize {
        self.num_samples
    }

    fn specs(&self) -> &[TensorSpec] {
        &self.specs
    }

    fn samples(&self) -> Box<dyn Iterator<Item = CalibrationSample> + '_> {
        Box::new(self.iter())
    }
}

impl<'a> IntoIterator for &'a CalibrationDataset {
    type Item = CalibrationSample;
    type IntoIter = CalibrationIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// One pass over a `CalibrationDataset`.
pub struct CalibrationIter<'a> {
    specs: &'a [TensorSpec],
    remaining: usize,
    rng: StdRng,
}

impl Iterator for CalibrationIter<'_> {
    type Item = CalibrationSample;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let inputs = self
            .specs
            .iter()
            .map(|spec| (spec.name.clone(), Tensor::randn_with(&spec.shape, &mut self.rng)))
            .collect();
        Some(CalibrationSample { inputs })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for CalibrationIter<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs() -> Vec<TensorSpec> {
        vec![TensorSpec::new("input_0", &[1, 2]), TensorSpec::new("input_1", &[1, 1, 4, 4])]
    }

    #[test]
    fn test_yields_exact_count_and_shapes() {
        let ds = CalibrationDataset::new(specs(), 100, None);
        let samples: Vec<_> = ds.samples().collect();
        assert_eq!(samples.len(), 100);
        for s in &samples {
            assert_eq!(s.len(), 2);
            assert_eq!(s.get("input_0").unwrap().dims(), &[1, 2]);
            assert_eq!(s.get("input_1").unwrap().dims(), &[1, 1, 4, 4]);
        }
    }

    #[test]
    fn test_seeded_is_reproducible() {
        let a = CalibrationDataset::new(specs(), 5, Some(42));
        let b = CalibrationDataset::new(specs(), 5, Some(42));
        let first: Vec<_> = a.iter().collect();
        assert_eq!(first, b.iter().collect::<Vec<_>>());
        // Restarting the same dataset replays the sequence.
        assert_eq!(first, a.iter().collect::<Vec<_>>());
    }

    #[test]
    fn test_unseeded_passes_differ() {
        let ds = CalibrationDataset::new(vec![TensorSpec::new("x", &[1, 64])], 1, None);
        let a: Vec<_> = ds.iter().collect();
        let b: Vec<_> = ds.iter().collect();
        assert_ne!(a, b);
    }

    #[test]
    fn test_roughly_standard_normal() {
        let ds = CalibrationDataset::new(vec![TensorSpec::new("x", &[1, 1000])], 10, Some(7));
        let values: Vec<f32> = ds.iter().flat_map(|s| s.inputs[0].1.to_vec()).collect();
        let n = values.len() as f32;
        let mean = values.iter().sum::<f32>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
        assert!(mean.abs() < 0.05, "mean {mean}");
        assert!((var - 1.0).abs() < 0.1, "var {var}");
    }

    #[test]
    fn test_empty_dataset() {
        let ds = CalibrationDataset::new(specs(), 0, Some(1));
        assert!(ds.is_empty());
        assert_eq!(ds.iter().count(), 0);
    }
}
