use serde::{Deserialize, Serialize};

use crate::shape::Shape;

/// A named tensor with a fully concrete shape.
///
/// Used for graph inputs (runtime feeds) and anywhere a value needs to be
/// declared before data exists for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Vec<usize>,
}

impl TensorSpec {
    pub fn new(name: impl Into<String>, shape: &[usize]) -> Self {
        Self { name: name.into(), shape: shape.to_vec() }
    }

    /// Shape as a `Shape`.
    pub fn shape(&self) -> Shape {
        Shape::new(&self.shape)
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.shape().numel()
    }
}
