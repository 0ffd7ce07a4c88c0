//! Second moment of the per-sample gradient estimator.

use crate::autograd::{ensure_same_device, Device, Tensor};
use crate::error::{LossError, Result};

use super::reward::GradientBundle;

/// Mean squared norm of per-sample gradients:
///
/// ```text
/// loss = (1/N) Σ_j Σ_p ||g_jp||²
/// ```
///
/// Used to train the control-variate network toward a lower-variance
/// estimator. The sum is assembled from tape operations, so gradients that
/// themselves carry a graph back to the control variate stay
/// differentiable.
///
/// # Example
///
/// ```
/// use seqgan_relax::autograd::Tensor;
/// use seqgan_relax::loss::{GradientBundle, VarianceLoss};
///
/// let bundles = vec![
///     GradientBundle::from(vec![Tensor::from_slice(&[2.0])]),
///     GradientBundle::from(vec![Tensor::from_slice(&[3.0])]),
/// ];
/// let loss = VarianceLoss::new().forward(&bundles).expect("non-empty batch");
/// assert!((loss.item() - 6.5).abs() < 1e-6);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct VarianceLoss;

impl VarianceLoss {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// # Errors
    ///
    /// Returns [`LossError::DegenerateInput`] for an empty batch and
    /// [`LossError::DeviceMismatch`] if the gradients are spread over
    /// several devices.
    pub fn forward(&self, bundles: &[GradientBundle]) -> Result<Tensor> {
        if bundles.is_empty() {
            return Err(LossError::DegenerateInput(
                "variance over zero per-sample gradients".to_string(),
            ));
        }

        let grads: Vec<&Tensor> = bundles.iter().flat_map(|b| b.grads().iter()).collect();
        let device = if grads.is_empty() {
            Device::default()
        } else {
            ensure_same_device(&grads)?
        };

        let mut total = Tensor::zeros_on(&[1], device);
        for bundle in bundles {
            let mut sample = Tensor::zeros_on(&[1], device);
            for grad in bundle {
                sample = sample.add(&grad.pow(2.0).sum());
            }
            total = total.add(&sample);
        }

        let n = bundles.len();
        let loss = total.mul_scalar(1.0 / n as f32);
        log::debug!("gradient variance over {n} samples: {:.6}", loss.item());
        Ok(loss)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::{clear_graph, get_grad};
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_two_samples_mean_squared_norm() {
        // [[2.0], [0.0]] -> 4.0 and [[0.0], [3.0]] -> 9.0
        let bundles = vec![
            GradientBundle::from(vec![Tensor::from_slice(&[2.0]), Tensor::from_slice(&[0.0])]),
            GradientBundle::from(vec![Tensor::from_slice(&[0.0]), Tensor::from_slice(&[3.0])]),
        ];
        let loss = VarianceLoss::new().forward(&bundles).expect("non-empty");
        assert_relative_eq!(loss.item(), 6.5, epsilon = 1e-6);
    }

    #[test]
    fn test_empty_batch_is_an_error() {
        assert!(matches!(
            VarianceLoss::new().forward(&[]),
            Err(LossError::DegenerateInput(_))
        ));
    }

    #[test]
    fn test_gradients_on_different_devices() {
        let bundles = vec![
            GradientBundle::from(vec![Tensor::from_slice(&[1.0])]),
            GradientBundle::from(vec![Tensor::from_slice(&[2.0]).with_device(Device::Cuda(1))]),
        ];
        assert_eq!(
            VarianceLoss::new().forward(&bundles).unwrap_err(),
            LossError::DeviceMismatch {
                expected: Device::Cpu,
                actual: Device::Cuda(1),
            }
        );
    }

    #[test]
    fn test_bundles_without_parameters() {
        let loss = VarianceLoss::new()
            .forward(&[GradientBundle::default(), GradientBundle::default()])
            .expect("non-empty batch");
        assert_eq!(loss.item(), 0.0);
    }

    #[test]
    fn test_differentiable_through_gradients() {
        clear_graph();
        let g = Tensor::from_slice(&[1.0, -2.0]).requires_grad();
        let loss = VarianceLoss::new()
            .forward(&[GradientBundle::from(vec![g.clone()])])
            .expect("non-empty");
        loss.backward();

        // d/dg (g·g) = 2g
        let dg = get_grad(g.id()).expect("g is a leaf");
        assert_relative_eq!(dg.data()[0], 2.0, epsilon = 1e-5);
        assert_relative_eq!(dg.data()[1], -4.0, epsilon = 1e-5);
    }

    proptest! {
        #[test]
        fn prop_matches_mean_squared_norm(
            values in prop::collection::vec(-5.0f32..5.0, 1..8),
        ) {
            let bundles: Vec<GradientBundle> = values
                .iter()
                .map(|&v| GradientBundle::from(vec![Tensor::from_slice(&[v, 1.0])]))
                .collect();
            let expected = bundles.iter().map(GradientBundle::squared_norm).sum::<f32>()
                / bundles.len() as f32;
            let loss = VarianceLoss::new().forward(&bundles).expect("non-empty");
            prop_assert!((loss.item() - expected).abs() < 1e-3);
            prop_assert!(loss.item() >= 0.0);
        }
    }
}
