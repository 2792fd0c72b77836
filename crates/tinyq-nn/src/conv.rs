//! 2-D convolution layer.

use tinyq_core::ops::{conv2d, conv_output_dim, Conv2dGeometry};
use tinyq_core::{Result, Tensor, TinyError};

use crate::init::Initializer;
use crate::module::Module;

/// 2D convolution layer: y = conv2d(x, weight) + bias
///
/// Input shape: [batch, in_channels, height, width]
/// Output shape: [batch, out_channels, out_h, out_w]
pub struct Conv2d {
    weight: Tensor, // [out_channels, in_channels, k, k]
    bias: Option<Tensor>,
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    stride: usize,
    padding: usize,
}

impl Conv2d {
    /// Create a new Conv2d layer with square kernel and deterministic
    /// Kaiming-uniform weights.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        padding: usize,
        bias: bool,
        init: &Initializer,
    ) -> Self {
        let fan_in = in_channels * kernel_size * kernel_size;
        let mut weight = init.kaiming_uniform(&[out_channels, in_channels, kernel_size, kernel_size], fan_in);
        weight.set_requires_grad(true);

        let bias = bias.then(|| {
            let mut b = init.bias_uniform(&[out_channels], fan_in);
            b.set_requires_grad(true);
            b
        });

        Self {
            weight,
            bias,
            in_channels,
            out_channels,
            kernel_size,
            stride,
            padding,
        }
    }

    /// Build a layer from explicit `[oc, ic, k, k]` weights.
    pub fn from_weight(weight: Tensor, bias: Option<Tensor>, stride: usize, padding: usize) -> Result<Self> {
        let dims = weight.dims().to_vec();
        if dims.len() != 4 || dims[2] != dims[3] {
            return Err(TinyError::InvalidConv(format!(
                "expected square [oc, ic, k, k] weight, got {dims:?}"
            )));
        }
        if let Some(ref b) = bias {
            if b.dims() != [dims[0]] {
                return Err(TinyError::ShapeMismatch { expected: vec![dims[0]], got: b.dims().to_vec() });
            }
        }
        if stride == 0 {
            return Err(TinyError::InvalidConv("stride must be positive".into()));
        }
        Ok(Self {
            weight,
            bias,
            in_channels: dims[1],
            out_channels: dims[0],
            kernel_size: dims[2],
            stride,
            padding,
        })
    }

    /// Compute output spatial dimensions.
    pub fn output_size(&self, h: usize, w: usize) -> Option<(usize, usize)> {
        let oh = conv_output_dim(h, self.kernel_size, self.stride, self.padding)?;
        let ow = conv_output_dim(w, self.kernel_size, self.stride, self.padding)?;
        Some((oh, ow))
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    pub fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn padding(&self) -> usize {
        self.padding
    }
}

impl Module for Conv2d {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        conv2d(
            input,
            &self.weight,
            self.bias.as_ref(),
            Conv2dGeometry::new(self.stride, self.padding),
        )
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conv2d_creation() {
        let conv = Conv2d::new(3, 16, 3, 1, 1, true, &Initializer::default());
        assert_eq!(conv.weight().dims(), &[16, 3, 3, 3]);
        assert_eq!(conv.bias().unwrap().dims(), &[16]);
        assert_eq!(conv.parameters().len(), 2);
    }

    #[test]
    fn test_conv2d_output_size() {
        let conv = Conv2d::new(1, 32, 3, 1, 0, true, &Initializer::default());
        assert_eq!(conv.output_size(10, 10), Some((8, 8)));
        let conv = Conv2d::new(3, 8, 5, 3, 2, true, &Initializer::default());
        assert_eq!(conv.output_size(224, 224), Some((75, 75)));
    }

    #[test]
    fn test_conv2d_forward_shape() {
        let conv = Conv2d::new(1, 3, 3, 1, 1, true, &Initializer::default());
        let y = conv.forward(&Tensor::zeros(&[1, 1, 5, 5])).unwrap();
        assert_eq!(y.dims(), &[1, 3, 5, 5]);
    }

    #[test]
    fn test_conv2d_zero_input_yields_bias() {
        let conv = Conv2d::new(2, 4, 3, 1, 0, true, &Initializer::new(9));
        let y = conv.forward(&Tensor::zeros(&[1, 2, 6, 6])).unwrap();
        let bias = conv.bias().unwrap().to_vec();
        for (oc, plane) in y.as_f32_slice().chunks(16).enumerate() {
            assert!(plane.iter().all(|&v| v == bias[oc]));
        }
    }

    #[test]
    fn test_conv2d_named_parameters() {
        let mut conv = Conv2d::new(1, 1, 3, 1, 0, true, &Initializer::default());
        conv.set_trainable(false);
        let names: Vec<String> = conv.named_parameters().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["weight", "bias"]);
        assert!(!conv.is_trainable());
    }

    #[test]
    fn test_conv2d_from_weight_rejects_rect() {
        assert!(Conv2d::from_weight(Tensor::zeros(&[1, 1, 3, 2]), None, 1, 0).is_err());
    }
}
