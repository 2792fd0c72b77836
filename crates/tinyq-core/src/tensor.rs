use std::fmt;
use std::sync::Arc;

use rand::Rng;
use rand_distr::StandardNormal;

use crate::dtype::DType;
use crate::error::TinyError;
use crate::shape::Shape;
use crate::Result;

/// A dense, contiguous f32 array. The value type flowing through tinyq
/// graphs.
///
/// Data is shared through an `Arc`, so clones and reshapes are cheap.
/// Parameters carry a `requires_grad` flag so fixtures can mark their
/// weights as frozen constants before export.
///
/// # Examples
///
/// ```
/// use tinyq_core::Tensor;
///
/// let t = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
/// assert_eq!(t.shape().dims(), &[2, 2]);
/// assert_eq!(t.numel(), 4);
///
/// let flat = t.reshape(&[4]).unwrap();
/// assert_eq!(flat.shape().dims(), &[4]);
/// ```
#[derive(Clone)]
pub struct Tensor {
    data: Arc<[f32]>,
    shape: Shape,
    requires_grad: bool,
}

impl Tensor {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Create a tensor from f32 data with the given shape.
    ///
    /// # Panics
    /// Panics if `data.len()` does not match the shape. Use
    /// [`Tensor::from_vec`] for a checked constructor.
    pub fn from_f32(data: &[f32], shape: &[usize]) -> Self {
        let s = Shape::new(shape);
        assert_eq!(
            s.numel(),
            data.len(),
            "Shape {:?} requires {} elements, got {}",
            shape,
            s.numel(),
            data.len()
        );
        Self {
            data: Arc::from(data),
            shape: s,
            requires_grad: false,
        }
    }

    /// Create a tensor from an owned vector, checking the element count.
    pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> Result<Self> {
        let s = Shape::new(shape);
        if s.numel() != data.len() {
            return Err(TinyError::DataLength { len: data.len(), shape: shape.to_vec() });
        }
        Ok(Self {
            data: Arc::from(data),
            shape: s,
            requires_grad: false,
        })
    }

    /// Create a tensor of zeros.
    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.0)
    }

    /// Create a tensor of ones.
    pub fn ones(shape: &[usize]) -> Self {
        Self::full(shape, 1.0)
    }

    /// Create a tensor filled with `value`.
    pub fn full(shape: &[usize], value: f32) -> Self {
        let s = Shape::new(shape);
        let data = vec![value; s.numel()];
        Self {
            data: Arc::from(data),
            shape: s,
            requires_grad: false,
        }
    }

    /// Create a tensor with values drawn i.i.d. from N(0, 1) using `rng`.
    pub fn randn_with<R: Rng + ?Sized>(shape: &[usize], rng: &mut R) -> Self {
        let s = Shape::new(shape);
        let data: Vec<f32> = (0..s.numel()).map(|_| rng.sample::<f32, _>(StandardNormal)).collect();
        Self {
            data: Arc::from(data),
            shape: s,
            requires_grad: false,
        }
    }

    /// Create a tensor with values uniformly distributed in [low, high).
    pub fn rand_uniform_with<R: Rng + ?Sized>(shape: &[usize], low: f32, high: f32, rng: &mut R) -> Self {
        let s = Shape::new(shape);
        let data: Vec<f32> = (0..s.numel()).map(|_| rng.gen_range(low..high)).collect();
        Self {
            data: Arc::from(data),
            shape: s,
            requires_grad: false,
        }
    }

    /// Create a 1-D tensor with values from `start` to `end` (exclusive).
    ///
    /// # Panics
    /// Panics if `step` is zero.
    pub fn arange(start: f32, end: f32, step: f32) -> Self {
        assert!(step != 0.0, "arange: step must be non-zero");
        let n = ((end - start) / step).ceil().max(0.0) as usize;
        let data: Vec<f32> = (0..n).map(|i| start + i as f32 * step).collect();
        Self::from_f32(&data, &[n])
    }

    /// Create a scalar tensor.
    pub fn scalar(value: f32) -> Self {
        Self {
            data: Arc::from(vec![value]),
            shape: Shape::scalar(),
            requires_grad: false,
        }
    }

    // =========================================================================
    // Metadata
    // =========================================================================

    /// Shape of the tensor.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Dimension sizes.
    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.ndim()
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// Element type. In-memory tensors are always f32.
    pub fn dtype(&self) -> DType {
        DType::F32
    }

    /// Whether this tensor is a trainable parameter.
    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    /// Mark or unmark this tensor as a trainable parameter.
    pub fn set_requires_grad(&mut self, requires_grad: bool) {
        self.requires_grad = requires_grad;
    }

    // =========================================================================
    // Data access
    // =========================================================================

    /// The underlying f32 data, row-major.
    pub fn as_f32_slice(&self) -> &[f32] {
        &self.data
    }

    /// Raw bytes of the data, native byte order.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.data[..])
    }

    /// Copy the data out into a `Vec`.
    pub fn to_vec(&self) -> Vec<f32> {
        self.data.to_vec()
    }

    /// Minimum and maximum element, or `None` for an empty tensor.
    pub fn min_max(&self) -> Option<(f32, f32)> {
        let mut iter = self.data.iter().copied();
        let first = iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), v| (lo.min(v), hi.max(v))))
    }

    // =========================================================================
    // Shape operations
    // =========================================================================

    /// Reshape the tensor (shares data).
    pub fn reshape(&self, new_shape: &[isize]) -> Result<Tensor> {
        let resolved = self.shape.resolve_reshape(new_shape).ok_or_else(|| {
            TinyError::InvalidReshape {
                numel: self.numel(),
                shape: new_shape.iter().map(|&d| d.max(0) as usize).collect(),
            }
        })?;

        Ok(Tensor {
            data: self.data.clone(),
            shape: resolved,
            requires_grad: self.requires_grad,
        })
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.data == other.data
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Tensor(shape={}, dtype={}, requires_grad={})",
            self.shape,
            self.dtype(),
            self.requires_grad,
        )
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.as_f32_slice();
        if self.numel() <= 20 {
            write!(f, "tensor({:?}, shape={})", data, self.shape)
        } else {
            write!(
                f,
                "tensor([{:.4}, {:.4}, ..., {:.4}], shape={})",
                data[0],
                data[1],
                data[self.numel() - 1],
                self.shape
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_from_f32() {
        let t = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        assert_eq!(t.shape().dims(), &[2, 3]);
        assert_eq!(t.numel(), 6);
        assert_eq!(t.dtype(), DType::F32);
    }

    #[test]
    fn test_from_vec_checks_length() {
        assert!(Tensor::from_vec(vec![1.0; 5], &[2, 3]).is_err());
        assert!(Tensor::from_vec(vec![1.0; 6], &[2, 3]).is_ok());
    }

    #[test]
    fn test_zeros() {
        let t = Tensor::zeros(&[1, 3, 10, 10]);
        assert_eq!(t.numel(), 300);
        assert!(t.as_f32_slice().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_arange() {
        let t = Tensor::arange(0.0, 5.0, 1.0);
        assert_eq!(t.shape().dims(), &[5]);
        assert_eq!(t.as_f32_slice(), &[0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_randn_seeded_is_reproducible() {
        let a = Tensor::randn_with(&[4, 4], &mut StdRng::seed_from_u64(7));
        let b = Tensor::randn_with(&[4, 4], &mut StdRng::seed_from_u64(7));
        assert_eq!(a, b);
    }

    #[test]
    fn test_reshape() {
        let t = Tensor::arange(0.0, 6.0, 1.0);
        let r = t.reshape(&[1, -1]).unwrap();
        assert_eq!(r.shape().dims(), &[1, 6]);
        assert!(t.reshape(&[4, 2]).is_err());
    }

    #[test]
    fn test_min_max() {
        let t = Tensor::from_f32(&[3.0, -2.0, 7.5], &[3]);
        assert_eq!(t.min_max(), Some((-2.0, 7.5)));
        let empty = Tensor::from_f32(&[], &[0]);
        assert_eq!(empty.min_max(), None);
    }

    #[test]
    fn test_requires_grad() {
        let mut t = Tensor::zeros(&[2, 2]);
        assert!(!t.requires_grad());
        t.set_requires_grad(true);
        assert!(t.requires_grad());
    }

    #[test]
    fn test_as_bytes() {
        let t = Tensor::from_f32(&[1.0], &[1]);
        assert_eq!(t.as_bytes(), &1.0f32.to_le_bytes());
    }
}
