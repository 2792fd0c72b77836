use smallvec::SmallVec;
use std::fmt;

type Dims = SmallVec<[usize; 4]>;

/// Row-major tensor shape. Up to NCHW stays inline.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Dims,
}

impl Shape {
    pub fn new(dims: &[usize]) -> Self {
        Self { dims: SmallVec::from_slice(dims) }
    }

    pub fn scalar() -> Self {
        Self { dims: Dims::new() }
    }

    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Element count; 1 for a scalar.
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Contiguous strides in elements.
    pub fn contiguous_strides(&self) -> Dims {
        let mut strides = Dims::from_elem(1, self.ndim());
        for axis in (0..self.ndim().saturating_sub(1)).rev() {
            strides[axis] = strides[axis + 1] * self.dims[axis + 1];
        }
        strides
    }

    /// NumPy broadcast of two shapes, aligned from the trailing axis.
    pub fn broadcast_with(&self, other: &Shape) -> Option<Shape> {
        let rank = self.ndim().max(other.ndim());
        let padded = |s: &Shape, axis: usize| -> usize {
            let offset = rank - s.ndim();
            if axis < offset { 1 } else { s.dims[axis - offset] }
        };

        let mut dims = Dims::with_capacity(rank);
        for axis in 0..rank {
            let (a, b) = (padded(self, axis), padded(other, axis));
            dims.push(match (a, b) {
                _ if a == b => a,
                (1, _) => b,
                (_, 1) => a,
                _ => return None,
            });
        }
        Some(Shape { dims })
    }

    /// Resolve a reshape target with at most one `-1` axis.
    pub fn resolve_reshape(&self, target: &[isize]) -> Option<Shape> {
        let numel = self.numel();
        let mut inferred = None;
        let mut dims = Dims::with_capacity(target.len());
        for (axis, &d) in target.iter().enumerate() {
            match d {
                -1 if inferred.is_none() => {
                    inferred = Some(axis);
                    dims.push(1);
                }
                d if d > 0 => dims.push(d as usize),
                _ => return None,
            }
        }

        let known: usize = dims.iter().product();
        if let Some(axis) = inferred {
            if known == 0 || numel % known != 0 {
                return None;
            }
            dims[axis] = numel / known;
        }
        let shape = Shape { dims };
        (shape.numel() == numel).then_some(shape)
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape({:?})", self.dims.as_slice())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.dims.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar() {
        let s = Shape::scalar();
        assert_eq!(s.ndim(), 0);
        assert_eq!(s.numel(), 1);
        assert!(s.contiguous_strides().is_empty());
    }

    #[test]
    fn test_strides() {
        let s = Shape::new(&[1, 3, 5, 5]);
        assert_eq!(s.numel(), 75);
        assert_eq!(s.contiguous_strides().as_slice(), &[75, 25, 5, 1]);
    }

    #[test]
    fn test_broadcast() {
        // conv output [1,1,4,4] times linear output [1,1]
        let a = Shape::new(&[1, 1, 4, 4]);
        let b = Shape::new(&[1, 1]);
        assert_eq!(a.broadcast_with(&b).unwrap().dims(), &[1, 1, 4, 4]);

        let bias = Shape::new(&[3]);
        assert_eq!(Shape::new(&[2, 1]).broadcast_with(&bias).unwrap().dims(), &[2, 3]);
        assert!(Shape::new(&[2, 3]).broadcast_with(&Shape::new(&[4, 3])).is_none());
    }

    #[test]
    fn test_reshape() {
        let s = Shape::new(&[25]);
        assert_eq!(s.resolve_reshape(&[1, 1, 5, 5]).unwrap().dims(), &[1, 1, 5, 5]);
        assert_eq!(s.resolve_reshape(&[1, -1]).unwrap().dims(), &[1, 25]);
        assert!(s.resolve_reshape(&[-1, -1]).is_none());
        assert!(s.resolve_reshape(&[4, 4]).is_none());
        assert!(s.resolve_reshape(&[0, -1]).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(Shape::new(&[1, 32, 8, 8]).to_string(), "[1, 32, 8, 8]");
    }
}
