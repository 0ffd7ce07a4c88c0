//! Learned baseline supplied to the RELAX estimators.
//!
//! A control variate evaluates the discriminator on a hard sample `z` and on
//! its continuous relaxation `z̃`, returning two `[B, 2]` class distributions.
//! Only the positive ("real") class column enters the loss.

use crate::autograd::{ensure_same_device, Tensor};
use crate::error::{LossError, Result};

/// Column holding the discriminator's belief that a sequence is real.
pub const POSITIVE_CLASS: usize = 1;

/// Discriminator outputs for the hard sample and its relaxation.
#[derive(Debug, Clone)]
pub struct ControlVariateOutput {
    /// `c_φ(z)`, shape `[B, 2]`.
    pub z: Tensor,
    /// `c_φ(z̃)`, shape `[B, 2]`.
    pub z_tilde: Tensor,
}

impl ControlVariateOutput {
    #[must_use]
    pub fn new(z: Tensor, z_tilde: Tensor) -> Self {
        Self { z, z_tilde }
    }

    /// Positive-class columns `(c_φ(z)[:, 1], c_φ(z̃)[:, 1])`, each `[B]`.
    ///
    /// # Errors
    ///
    /// Returns [`LossError::ShapeMismatch`] unless both tensors are
    /// `[batch_size, C]` with `C >= 2`, and [`LossError::DeviceMismatch`]
    /// if they live on different devices.
    pub fn positive_class(&self, batch_size: usize) -> Result<(Tensor, Tensor)> {
        ensure_same_device(&[&self.z, &self.z_tilde])?;
        for (name, t) in [("c_phi(z)", &self.z), ("c_phi(z_tilde)", &self.z_tilde)] {
            if t.ndim() != 2 || t.shape()[0] != batch_size || t.shape()[1] <= POSITIVE_CLASS {
                return Err(LossError::shape_mismatch(name, &[batch_size, 2], t.shape()));
            }
        }
        Ok((
            self.z.select(1, POSITIVE_CLASS),
            self.z_tilde.select(1, POSITIVE_CLASS),
        ))
    }
}

/// Source of the `(c_φ(z), c_φ(z̃))` pair for a batch of generator
/// probabilities.
///
/// Implementors own whatever the evaluation needs (generator hidden state,
/// the learned scalar baseline, the discriminator) and may record their
/// computation on the tape so the variance loss can train them.
pub trait ControlVariate {
    /// Evaluate the discriminator on the sample and its relaxation.
    ///
    /// # Errors
    ///
    /// Implementations report shape or device problems with `prob`.
    fn evaluate(&self, prob: &Tensor) -> Result<ControlVariateOutput>;
}

/// A control variate whose outputs were computed ahead of the loss call.
#[derive(Debug, Clone)]
pub struct PrecomputedControlVariate {
    output: ControlVariateOutput,
}

impl PrecomputedControlVariate {
    #[must_use]
    pub fn new(z: Tensor, z_tilde: Tensor) -> Self {
        Self {
            output: ControlVariateOutput::new(z, z_tilde),
        }
    }
}

impl ControlVariate for PrecomputedControlVariate {
    fn evaluate(&self, _prob: &Tensor) -> Result<ControlVariateOutput> {
        Ok(self.output.clone())
    }
}

impl From<ControlVariateOutput> for PrecomputedControlVariate {
    fn from(output: ControlVariateOutput) -> Self {
        Self { output }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::Device;

    #[test]
    fn test_positive_class_takes_column_one() {
        let out = ControlVariateOutput::new(
            Tensor::new(&[0.9, 0.1, 0.4, 0.6], &[2, 2]),
            Tensor::new(&[0.3, 0.7, 0.8, 0.2], &[2, 2]),
        );
        let (cz, czt) = out.positive_class(2).expect("valid shapes");
        assert_eq!(cz.data(), &[0.1, 0.6]);
        assert_eq!(czt.data(), &[0.7, 0.2]);
    }

    #[test]
    fn test_positive_class_rejects_single_column() {
        let out = ControlVariateOutput::new(Tensor::zeros(&[2, 1]), Tensor::zeros(&[2, 2]));
        assert!(matches!(
            out.positive_class(2),
            Err(LossError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_positive_class_rejects_wrong_batch() {
        let out = ControlVariateOutput::new(Tensor::zeros(&[3, 2]), Tensor::zeros(&[3, 2]));
        assert!(out.positive_class(2).is_err());
    }

    #[test]
    fn test_positive_class_device_check() {
        let out = ControlVariateOutput::new(
            Tensor::zeros(&[1, 2]),
            Tensor::zeros(&[1, 2]).with_device(Device::Cuda(0)),
        );
        assert!(matches!(
            out.positive_class(1),
            Err(LossError::DeviceMismatch { .. })
        ));
    }

    #[test]
    fn test_precomputed_ignores_prob() {
        let cv = PrecomputedControlVariate::new(Tensor::ones(&[1, 2]), Tensor::zeros(&[1, 2]));
        let out = cv.evaluate(&Tensor::zeros(&[4, 3])).expect("precomputed");
        assert_eq!(out.z.data(), &[1.0, 1.0]);
        assert_eq!(out.z_tilde.data(), &[0.0, 0.0]);
    }
}
