//! Direct 2-D convolution (NCHW, OIHW weights).
//!
//! Each `(batch, out_channel)` output plane is independent. Large problems
//! split the planes across the rayon pool.

use rayon::prelude::*;

use crate::error::TinyError;
use crate::tensor::Tensor;
use crate::Result;

/// Below this many multiply-accumulates the kernel stays on one thread.
const PAR_MAC_THRESHOLD: usize = 1 << 16;

/// Stride and symmetric zero padding of a square-kernel convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2dGeometry {
    pub stride: usize,
    pub padding: usize,
}

impl Conv2dGeometry {
    pub fn new(stride: usize, padding: usize) -> Self {
        Self { stride, padding }
    }
}

/// Output spatial size: `(input + 2·padding − kernel) / stride + 1`.
///
/// Returns `None` when the padded input is smaller than the kernel or the
/// stride is zero.
pub fn conv_output_dim(input: usize, kernel: usize, stride: usize, padding: usize) -> Option<usize> {
    let padded = input + 2 * padding;
    if stride == 0 || kernel == 0 || padded < kernel {
        return None;
    }
    Some((padded - kernel) / stride + 1)
}

/// 2-D convolution: `y = conv2d(x, weight) + bias`.
///
/// - `input`: `[batch, in_channels, height, width]`
/// - `weight`: `[out_channels, in_channels, kernel_h, kernel_w]`
/// - `bias`: `[out_channels]`
pub fn conv2d(input: &Tensor, weight: &Tensor, bias: Option<&Tensor>, geom: Conv2dGeometry) -> Result<Tensor> {
    let dims = input.dims();
    if dims.len() != 4 {
        return Err(TinyError::ShapeMismatch {
            expected: vec![0, 0, 0, 0],
            got: dims.to_vec(),
        });
    }
    let w_dims = weight.dims();
    if w_dims.len() != 4 {
        return Err(TinyError::ShapeMismatch {
            expected: vec![0, 0, 0, 0],
            got: w_dims.to_vec(),
        });
    }

    let (batch, in_ch, in_h, in_w) = (dims[0], dims[1], dims[2], dims[3]);
    let (out_ch, w_in_ch, kernel_h, kernel_w) = (w_dims[0], w_dims[1], w_dims[2], w_dims[3]);
    if w_in_ch != in_ch {
        return Err(TinyError::ShapeMismatch {
            expected: vec![out_ch, in_ch, kernel_h, kernel_w],
            got: w_dims.to_vec(),
        });
    }
    if let Some(b) = bias {
        if b.dims() != [out_ch] {
            return Err(TinyError::ShapeMismatch { expected: vec![out_ch], got: b.dims().to_vec() });
        }
    }

    let out_h = conv_output_dim(in_h, kernel_h, geom.stride, geom.padding)
        .ok_or_else(|| TinyError::InvalidConv(format!(
            "kernel {kernel_h}x{kernel_w} does not fit input {in_h}x{in_w} with padding {}",
            geom.padding
        )))?;
    let out_w = conv_output_dim(in_w, kernel_w, geom.stride, geom.padding)
        .ok_or_else(|| TinyError::InvalidConv(format!(
            "kernel {kernel_h}x{kernel_w} does not fit input {in_h}x{in_w} with padding {}",
            geom.padding
        )))?;

    let x = input.as_f32_slice();
    let w = weight.as_f32_slice();
    let b = bias.map(|t| t.as_f32_slice());
    let plane = out_h * out_w;

    let mut output = vec![0.0f32; batch * out_ch * plane];

    let compute_plane = |idx: usize, out_plane: &mut [f32]| {
        let bi = idx / out_ch;
        let oc = idx % out_ch;
        let bias_v = b.map_or(0.0, |b| b[oc]);
        for oh in 0..out_h {
            for ow in 0..out_w {
                let mut acc = bias_v;
                for ic in 0..in_ch {
                    let x_base = (bi * in_ch + ic) * in_h * in_w;
                    let w_base = (oc * in_ch + ic) * kernel_h * kernel_w;
                    for kh in 0..kernel_h {
                        let ih = oh * geom.stride + kh;
                        if ih < geom.padding || ih - geom.padding >= in_h {
                            continue;
                        }
                        let ih = ih - geom.padding;
                        for kw in 0..kernel_w {
                            let iw = ow * geom.stride + kw;
                            if iw < geom.padding || iw - geom.padding >= in_w {
                                continue;
                            }
                            let iw = iw - geom.padding;
                            acc += x[x_base + ih * in_w + iw] * w[w_base + kh * kernel_w + kw];
                        }
                    }
                }
                out_plane[oh * out_w + ow] = acc;
            }
        }
    };

    let macs = batch * out_ch * plane * in_ch * kernel_h * kernel_w;
    if plane > 0 && macs >= PAR_MAC_THRESHOLD {
        output
            .par_chunks_mut(plane)
            .enumerate()
            .for_each(|(idx, out_plane)| compute_plane(idx, out_plane));
    } else if plane > 0 {
        for (idx, out_plane) in output.chunks_mut(plane).enumerate() {
            compute_plane(idx, out_plane);
        }
    }

    Tensor::from_vec(output, &[batch, out_ch, out_h, out_w])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_dim() {
        assert_eq!(conv_output_dim(10, 3, 1, 0), Some(8));
        assert_eq!(conv_output_dim(224, 5, 3, 2), Some(75));
        assert_eq!(conv_output_dim(2, 3, 1, 0), None);
        assert_eq!(conv_output_dim(10, 3, 0, 0), None);
    }

    #[test]
    fn test_conv2d_laplacian() {
        let input = Tensor::from_f32(
            &(0..25).map(|i| (i % 5) as f32).collect::<Vec<_>>(),
            &[1, 1, 5, 5],
        );
        let weight = Tensor::from_f32(
            &[0.0, -1.0, 0.0, -1.0, 4.0, -1.0, 0.0, -1.0, 0.0],
            &[1, 1, 3, 3],
        );
        let out = conv2d(&input, &weight, None, Conv2dGeometry::new(1, 0)).unwrap();
        assert_eq!(out.dims(), &[1, 1, 3, 3]);
        // Rows are identical ramps, so the laplacian of a linear ramp is zero.
        assert!(out.as_f32_slice().iter().all(|&v| v.abs() < 1e-6));
    }

    #[test]
    fn test_conv2d_padding_and_bias() {
        let input = Tensor::ones(&[1, 1, 3, 3]);
        let weight = Tensor::ones(&[2, 1, 3, 3]);
        let bias = Tensor::from_f32(&[0.0, 1.0], &[2]);
        let out = conv2d(&input, &weight, Some(&bias), Conv2dGeometry::new(1, 1)).unwrap();
        assert_eq!(out.dims(), &[1, 2, 3, 3]);
        let data = out.as_f32_slice();
        assert_eq!(data[0], 4.0); // corner sees a 2x2 window
        assert_eq!(data[4], 9.0); // center sees everything
        assert_eq!(data[9 + 4], 10.0);
    }

    #[test]
    fn test_conv2d_stride() {
        let input = Tensor::ones(&[1, 1, 7, 7]);
        let weight = Tensor::ones(&[1, 1, 3, 3]);
        let out = conv2d(&input, &weight, None, Conv2dGeometry::new(2, 0)).unwrap();
        assert_eq!(out.dims(), &[1, 1, 3, 3]);
    }

    #[test]
    fn test_conv2d_parallel_matches_shape() {
        let input = Tensor::zeros(&[1, 3, 32, 32]);
        let weight = Tensor::ones(&[16, 3, 3, 3]);
        let bias = Tensor::full(&[16], 0.5);
        let out = conv2d(&input, &weight, Some(&bias), Conv2dGeometry::new(1, 0)).unwrap();
        assert_eq!(out.dims(), &[1, 16, 30, 30]);
        assert!(out.as_f32_slice().iter().all(|&v| v == 0.5));
    }

    #[test]
    fn test_conv2d_channel_mismatch() {
        let input = Tensor::zeros(&[1, 2, 5, 5]);
        let weight = Tensor::zeros(&[1, 3, 3, 3]);
        assert!(conv2d(&input, &weight, None, Conv2dGeometry::new(1, 0)).is_err());
    }
}
