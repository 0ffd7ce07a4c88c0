//! Class-weighted negative likelihood over probabilities.

use crate::autograd::{ensure_same_device, Tensor};
use crate::error::{LossError, Result};

use super::mask::SelectionMask;

/// Reduction mode for losses that produce one value per row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Reduction {
    /// Return loss per row (no reduction)
    None,
    /// Return mean of losses
    Mean,
    /// Return sum of losses (default)
    #[default]
    Sum,
}

/// Class-weighted negative likelihood.
///
/// ```text
/// loss = -Σ_i W[T[i]] · P[i, T[i]]
/// ```
///
/// The input holds probabilities, not log-probabilities, and no logarithm
/// is applied: the selected weighted probability is negated as-is. With
/// the default [`Reduction::Sum`] the batch is not normalised.
///
/// # Example
///
/// ```
/// use seqgan_relax::autograd::Tensor;
/// use seqgan_relax::loss::WeightedNLLLoss;
///
/// let criterion = WeightedNLLLoss::new(Tensor::from_slice(&[1.0, 1.0])).expect("1D weights");
/// let prob = Tensor::new(&[0.7, 0.3], &[1, 2]);
/// let loss = criterion.forward(&prob, &Tensor::from_slice(&[0.0])).expect("valid input");
/// assert!((loss.item() + 0.7).abs() < 1e-6);
/// ```
#[derive(Debug, Clone)]
pub struct WeightedNLLLoss {
    weight: Vec<f32>,
    reduction: Reduction,
}

impl WeightedNLLLoss {
    /// Create the loss from a `[num_classes]` weight vector.
    ///
    /// # Errors
    ///
    /// Returns [`LossError::ShapeMismatch`] if `weight` is not 1D, or
    /// [`LossError::DegenerateInput`] if it is empty.
    pub fn new(weight: Tensor) -> Result<Self> {
        if weight.ndim() != 1 {
            return Err(LossError::shape_mismatch(
                "class weight",
                &[weight.numel()],
                weight.shape(),
            ));
        }
        if weight.numel() == 0 {
            return Err(LossError::DegenerateInput("empty class weight".to_string()));
        }
        Ok(Self {
            weight: weight.data().to_vec(),
            reduction: Reduction::default(),
        })
    }

    /// Uniform weight of 1 for every class.
    ///
    /// # Errors
    ///
    /// Returns [`LossError::DegenerateInput`] if `num_classes` is zero.
    pub fn unweighted(num_classes: usize) -> Result<Self> {
        Self::new(Tensor::ones(&[num_classes]))
    }

    #[must_use]
    pub fn with_reduction(mut self, reduction: Reduction) -> Self {
        self.reduction = reduction;
        self
    }

    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.weight.len()
    }

    #[must_use]
    pub fn reduction(&self) -> Reduction {
        self.reduction
    }

    /// Compute the loss.
    ///
    /// # Arguments
    ///
    /// * `prob` - `[N, C]` probabilities
    /// * `target` - `[N]` class indices (as `f32`)
    ///
    /// # Errors
    ///
    /// Returns [`LossError::ShapeMismatch`] for inconsistent shapes,
    /// [`LossError::IndexOutOfRange`] for labels outside `[0, C)`,
    /// [`LossError::DeviceMismatch`] if `prob` and `target` are placed
    /// apart, and [`LossError::DegenerateInput`] for a mean over an empty
    /// batch.
    pub fn forward(&self, prob: &Tensor, target: &Tensor) -> Result<Tensor> {
        let device = ensure_same_device(&[prob, target])?;
        let n = target.numel();
        let c = self.num_classes();
        if target.ndim() != 1 {
            return Err(LossError::shape_mismatch("target", &[n], target.shape()));
        }
        if prob.shape() != [n, c] {
            return Err(LossError::shape_mismatch("prob", &[n, c], prob.shape()));
        }

        // W broadcast to [N, C] on the probabilities' device.
        let expanded: Vec<f32> = std::iter::repeat(self.weight.iter().copied())
            .take(n)
            .flatten()
            .collect();
        let weight = Tensor::new(&expanded, &[n, c]).with_device(device);

        let mask = SelectionMask::from_labels(target, c, device)?;
        let selected = mask.select(&prob.mul(&weight))?;

        match self.reduction {
            Reduction::None => Ok(selected.neg()),
            Reduction::Sum => Ok(selected.sum().neg()),
            Reduction::Mean => {
                if n == 0 {
                    return Err(LossError::DegenerateInput(
                        "mean over an empty batch".to_string(),
                    ));
                }
                Ok(selected.mean().neg())
            }
        }
    }
}
