use tinyq_core::{Result, Tensor};

/// Base trait for all layers.
pub trait Module {
    /// Forward pass.
    fn forward(&self, input: &Tensor) -> Result<Tensor>;

    /// All parameters, weight first.
    fn parameters(&self) -> Vec<&Tensor>;

    /// Named parameters (`weight`, `bias`), unprefixed.
    fn named_parameters(&self) -> Vec<(String, &Tensor)>;

    /// Mark every parameter as trainable or frozen.
    fn set_trainable(&mut self, trainable: bool);

    /// Whether any parameter still requires gradients.
    fn is_trainable(&self) -> bool {
        self.parameters().iter().any(|p| p.requires_grad())
    }
}
