//! Element-wise arithmetic and matrix multiplication.

use crate::error::TinyError;
use crate::shape::Shape;
use crate::tensor::Tensor;
use crate::Result;

impl Tensor {
    /// Element-wise addition with broadcasting: self + other.
    pub fn add(&self, other: &Tensor) -> Result<Tensor> {
        binary_op(self, other, |a, b| a + b)
    }

    /// Element-wise multiplication with broadcasting: self * other.
    pub fn mul(&self, other: &Tensor) -> Result<Tensor> {
        binary_op(self, other, |a, b| a * b)
    }

    /// Scalar multiplication: self * scalar.
    pub fn mul_scalar(&self, scalar: f32) -> Tensor {
        self.map(|a| a * scalar)
    }

    /// Rectified linear unit.
    pub fn relu(&self) -> Tensor {
        self.map(|a| a.max(0.0))
    }

    /// Apply `op` to every element.
    pub fn map(&self, op: impl Fn(f32) -> f32) -> Tensor {
        let result: Vec<f32> = self.as_f32_slice().iter().map(|&v| op(v)).collect();
        Tensor::from_f32(&result, self.dims())
    }

    /// Matrix multiplication: [M, K] @ [K, N] → [M, N].
    pub fn matmul(&self, other: &Tensor) -> Result<Tensor> {
        let a_dims = self.dims();
        let b_dims = other.dims();
        if a_dims.len() != 2 || b_dims.len() != 2 {
            return Err(TinyError::ShapeMismatch {
                expected: a_dims.to_vec(),
                got: b_dims.to_vec(),
            });
        }
        let (m, k1) = (a_dims[0], a_dims[1]);
        let (k2, n) = (b_dims[0], b_dims[1]);
        if k1 != k2 {
            return Err(TinyError::MatmulDimMismatch { m, k1, k2, n });
        }

        let a_data = self.as_f32_slice();
        let b_data = other.as_f32_slice();
        let mut c_data = vec![0.0f32; m * n];

        for i in 0..m {
            for p in 0..k1 {
                let a = a_data[i * k1 + p];
                let b_row = &b_data[p * n..(p + 1) * n];
                let c_row = &mut c_data[i * n..(i + 1) * n];
                for (c, &b) in c_row.iter_mut().zip(b_row) {
                    *c += a * b;
                }
            }
        }

        Tensor::from_vec(c_data, &[m, n])
    }

    /// Transpose a 2-D tensor.
    pub fn transpose_2d(&self) -> Result<Tensor> {
        let dims = self.dims();
        if dims.len() != 2 {
            return Err(TinyError::ShapeMismatch { expected: vec![0, 0], got: dims.to_vec() });
        }
        let (rows, cols) = (dims[0], dims[1]);
        let data = self.as_f32_slice();
        let mut out = vec![0.0f32; rows * cols];
        for r in 0..rows {
            for c in 0..cols {
                out[c * rows + r] = data[r * cols + c];
            }
        }
        Tensor::from_vec(out, &[cols, rows])
    }
}

/// Apply a binary operation element-wise with broadcasting.
fn binary_op(a: &Tensor, b: &Tensor, op: impl Fn(f32, f32) -> f32) -> Result<Tensor> {
    let out_shape = a.shape().broadcast_with(b.shape()).ok_or_else(|| {
        TinyError::BroadcastError {
            a: a.dims().to_vec(),
            b: b.dims().to_vec(),
        }
    })?;

    let numel = out_shape.numel();
    let a_data = a.as_f32_slice();
    let b_data = b.as_f32_slice();

    let result: Vec<f32> = if a.shape() == b.shape() {
        a_data.iter().zip(b_data).map(|(&x, &y)| op(x, y)).collect()
    } else {
        (0..numel)
            .map(|i| {
                let a_idx = broadcast_index(i, &out_shape, a.shape());
                let b_idx = broadcast_index(i, &out_shape, b.shape());
                op(a_data[a_idx], b_data[b_idx])
            })
            .collect()
    };

    Tensor::from_vec(result, out_shape.dims())
}

/// Compute the source index for a broadcasted element.
fn broadcast_index(flat_idx: usize, out_shape: &Shape, src_shape: &Shape) -> usize {
    let out_dims = out_shape.dims();
    let src_dims = src_shape.dims();
    let out_ndim = out_dims.len();
    let src_ndim = src_dims.len();

    let mut remaining = flat_idx;
    let mut src_idx = 0;
    let out_strides = out_shape.contiguous_strides();
    let src_strides = src_shape.contiguous_strides();

    for i in 0..out_ndim {
        let coord = remaining / out_strides[i];
        remaining %= out_strides[i];

        let src_dim_idx = i as isize - (out_ndim as isize - src_ndim as isize);
        if src_dim_idx >= 0 {
            let si = src_dim_idx as usize;
            if src_dims[si] > 1 {
                src_idx += coord * src_strides[si];
            }
        }
    }

    src_idx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_same_shape() {
        let x = Tensor::arange(0.0, 4.0, 1.0).reshape(&[1, 4]).unwrap();
        let y = x.add(&x).unwrap();
        assert_eq!(y.as_f32_slice(), &[0.0, 2.0, 4.0, 6.0]);
        assert_eq!(y.dims(), &[1, 4]);
    }

    #[test]
    fn test_mul_broadcast() {
        let a = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0], &[1, 1, 2, 2]);
        let b = Tensor::from_f32(&[10.0], &[1, 1]);
        let c = a.mul(&b).unwrap();
        assert_eq!(c.dims(), &[1, 1, 2, 2]);
        assert_eq!(c.as_f32_slice(), &[10.0, 20.0, 30.0, 40.0]);
    }

    #[test]
    fn test_broadcast_error() {
        let a = Tensor::zeros(&[2, 3]);
        let b = Tensor::zeros(&[4, 3]);
        assert!(matches!(a.add(&b), Err(TinyError::BroadcastError { .. })));
    }

    #[test]
    fn test_matmul() {
        let a = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let b = Tensor::from_f32(&[7.0, 8.0, 9.0, 10.0, 11.0, 12.0], &[3, 2]);
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.dims(), &[2, 2]);
        assert_eq!(c.as_f32_slice(), &[58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_matmul_propagates_non_finite() {
        // 0 * NaN and 0 * inf are NaN, even with a zero left operand
        let a = Tensor::from_f32(&[0.0, 1.0], &[1, 2]);
        let b = Tensor::from_f32(&[f32::NAN, f32::INFINITY, 2.0, 3.0], &[2, 2]);
        let c = a.matmul(&b).unwrap();
        assert!(c.as_f32_slice().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn test_matmul_dim_mismatch() {
        let a = Tensor::zeros(&[2, 3]);
        let b = Tensor::zeros(&[2, 3]);
        assert!(matches!(a.matmul(&b), Err(TinyError::MatmulDimMismatch { .. })));
    }

    #[test]
    fn test_transpose_2d() {
        let a = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let t = a.transpose_2d().unwrap();
        assert_eq!(t.dims(), &[3, 2]);
        assert_eq!(t.as_f32_slice(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_relu() {
        let a = Tensor::from_f32(&[-1.0, 0.5], &[2]);
        assert_eq!(a.relu().as_f32_slice(), &[0.0, 0.5]);
    }
}
