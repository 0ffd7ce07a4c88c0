//! Fully connected (linear) layer.

use super::init::{xavier_uniform, zeros};
use super::module::Module;
use crate::autograd::Tensor;

/// Fully connected layer: y = xW + b
///
/// The weight is stored as `[in_features, out_features]` so the forward
/// pass is a single matmul without a transpose on the tape.
///
/// # Shape
///
/// - Input: `(N, in_features)`
/// - Output: `(N, out_features)`
///
/// # Example
///
/// ```
/// use seqgan_relax::autograd::Tensor;
/// use seqgan_relax::nn::{Linear, Module};
///
/// let layer = Linear::with_seed(4, 3, Some(0));
/// let out = layer.forward(&Tensor::zeros(&[2, 4]));
/// assert_eq!(out.shape(), &[2, 3]);
/// assert_eq!(layer.num_parameters(), 4 * 3 + 3);
/// ```
pub struct Linear {
    weight: Tensor,
    bias: Tensor,
}

impl Linear {
    /// Create a new Linear layer with Xavier initialization.
    #[must_use]
    pub fn new(in_features: usize, out_features: usize) -> Self {
        Self::with_seed(in_features, out_features, None)
    }

    /// Create a Linear layer with a specific random seed.
    #[must_use]
    pub fn with_seed(in_features: usize, out_features: usize, seed: Option<u64>) -> Self {
        let weight = xavier_uniform(
            &[in_features, out_features],
            in_features,
            out_features,
            seed,
        );
        Self::from_parts(weight, zeros(&[out_features]))
    }

    /// Build a layer from explicit weight `[in, out]` and bias `[out]` values.
    ///
    /// # Panics
    ///
    /// Panics if the bias length doesn't match the weight's output dimension.
    #[must_use]
    pub fn from_parts(weight: Tensor, bias: Tensor) -> Self {
        assert_eq!(weight.ndim(), 2, "weight must be [in_features, out_features]");
        assert_eq!(
            bias.shape(),
            &[weight.shape()[1]],
            "bias length must match out_features"
        );
        Self {
            weight: weight.detach().requires_grad(),
            bias: bias.detach().requires_grad(),
        }
    }

    #[must_use]
    pub fn in_features(&self) -> usize {
        self.weight.shape()[0]
    }

    #[must_use]
    pub fn out_features(&self) -> usize {
        self.weight.shape()[1]
    }

    #[must_use]
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    #[must_use]
    pub fn bias(&self) -> &Tensor {
        &self.bias
    }
}

impl Module for Linear {
    fn forward(&self, input: &Tensor) -> Tensor {
        input.matmul(&self.weight).broadcast_add(&self.bias)
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![&self.weight, &self.bias]
    }
}
