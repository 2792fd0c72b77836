use tinyq_core::{Result, Tensor, TinyError};

use crate::init::Initializer;
use crate::module::Module;

/// Fully connected linear layer: y = x @ W^T + b
pub struct Linear {
    weight: Tensor, // [out_features, in_features]
    bias: Option<Tensor>,
}

impl Linear {
    /// Create a new Linear layer with deterministic Kaiming-uniform weights.
    pub fn new(in_features: usize, out_features: usize, bias: bool, init: &Initializer) -> Self {
        let mut weight = init.kaiming_uniform(&[out_features, in_features], in_features);
        weight.set_requires_grad(true);

        let bias = bias.then(|| {
            let mut b = init.bias_uniform(&[out_features], in_features);
            b.set_requires_grad(true);
            b
        });

        Self { weight, bias }
    }

    /// Build a layer from explicit parameters.
    pub fn from_weight(weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        let dims = weight.dims();
        if dims.len() != 2 {
            return Err(TinyError::ShapeMismatch { expected: vec![0, 0], got: dims.to_vec() });
        }
        if let Some(ref b) = bias {
            if b.dims() != [dims[0]] {
                return Err(TinyError::ShapeMismatch { expected: vec![dims[0]], got: b.dims().to_vec() });
            }
        }
        Ok(Self { weight, bias })
    }

    pub fn in_features(&self) -> usize {
        self.weight.dims()[1]
    }

    pub fn out_features(&self) -> usize {
        self.weight.dims()[0]
    }

    /// Get the weight tensor.
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Get the bias tensor (if present).
    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }
}

impl Module for Linear {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        let wt = self.weight.transpose_2d()?;
        let output = input.matmul(&wt)?;
        match self.bias {
            Some(ref bias) => output.add(bias),
            None => Ok(output),
        }
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut params = vec![&self.weight];
        if let Some(ref b) = self.bias {
            params.push(b);
        }
        params
    }

    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut params = vec![("weight".into(), &self.weight)];
        if let Some(ref b) = self.bias {
            params.push(("bias".into(), b));
        }
        params
    }

    fn set_trainable(&mut self, trainable: bool) {
        self.weight.set_requires_grad(trainable);
        if let Some(ref mut b) = self.bias {
            b.set_requires_grad(trainable);
        }
    }
}
