//! The `Module` trait: the generator-side contract the losses rely on.

use crate::autograd::{clear_grad, get_grad, Tensor};

/// A differentiable model with an enumerable parameter set.
///
/// Gradients live on the thread's computation graph, keyed by parameter
/// identity, so resetting and reading them goes through the graph rather
/// than through the parameter handles. `zero_grad` takes `&mut self` so a
/// caller holding the model cannot interleave two reset/backward/read-out
/// cycles.
pub trait Module {
    /// Forward pass.
    fn forward(&self, input: &Tensor) -> Tensor;

    /// Trainable parameters in a stable order.
    fn parameters(&self) -> Vec<&Tensor>;

    /// Reset accumulated gradients of every parameter.
    fn zero_grad(&mut self) {
        for param in self.parameters() {
            clear_grad(param.id());
        }
    }

    /// Current gradient of every parameter, in `parameters()` order.
    ///
    /// A parameter that received no gradient is reported as zeros of its
    /// own shape and device.
    fn gradients(&self) -> Vec<Tensor> {
        self.parameters()
            .into_iter()
            .map(|param| get_grad(param.id()).unwrap_or_else(|| Tensor::zeros_like(param)))
            .collect()
    }

    /// Total number of scalar parameters.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.numel()).sum()
    }
}
