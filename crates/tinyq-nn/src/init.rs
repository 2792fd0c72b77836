//! Deterministic parameter initialization.
//!
//! Every layer draws from its own `StdRng`, seeded from a fixed base seed, a
//! caller-chosen salt and the parameter shape. Two layers of the same shape in
//! one fixture therefore need different salts to get different weights.

use rand::rngs::StdRng;
use rand::SeedableRng;

use tinyq_core::Tensor;

const BASE_SEED: u64 = 0x7419_5eed_c0de_0001;

/// Seed source for layer parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Initializer {
    salt: u64,
}

impl Default for Initializer {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Initializer {
    pub fn new(salt: u64) -> Self {
        Self { salt }
    }

    pub fn salt(&self) -> u64 {
        self.salt
    }

    /// Initializer for the next layer in a fixture.
    pub fn derive(&self, index: u64) -> Self {
        Self::new(mix(self.salt, index.wrapping_add(1)))
    }

    fn rng_for(&self, shape: &[usize], stream: u64) -> StdRng {
        let mut seed = mix(BASE_SEED, self.salt);
        seed = mix(seed, stream);
        for &d in shape {
            seed = mix(seed, d as u64);
        }
        StdRng::seed_from_u64(seed)
    }

    /// Kaiming-uniform weights: `U(-sqrt(6 / fan_in), sqrt(6 / fan_in))`.
    pub fn kaiming_uniform(&self, shape: &[usize], fan_in: usize) -> Tensor {
        let limit = (6.0 / fan_in.max(1) as f32).sqrt();
        let mut rng = self.rng_for(shape, 0);
        Tensor::rand_uniform_with(shape, -limit, limit, &mut rng)
    }

    /// Bias values: `U(-1 / sqrt(fan_in), 1 / sqrt(fan_in))`.
    pub fn bias_uniform(&self, shape: &[usize], fan_in: usize) -> Tensor {
        let limit = 1.0 / (fan_in.max(1) as f32).sqrt();
        let mut rng = self.rng_for(shape, 1);
        Tensor::rand_uniform_with(shape, -limit, limit, &mut rng)
    }
}

// splitmix64 finalizer over a xor-combined state.
fn mix(a: u64, b: u64) -> u64 {
    let mut z = a ^ b.wrapping_mul(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
