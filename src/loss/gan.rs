//! Policy-gradient losses for the adversarially trained generator.
//!
//! Three estimators share the one-hot selection of sampled-token
//! probabilities:
//!
//! | Method | Input rows | Sequence reduction | Baseline |
//! |--------|-----------|--------------------|----------|
//! | [`GANLoss::reinforce`] | `[N, V]` | none | none |
//! | [`GANLoss::relax_legacy`] | `[B·L, V]` | mean over `L` | control variate |
//! | [`GANLoss::relax`] | `[B, L, V]` | sum over `L` | control variate |
//!
//! The legacy estimator averages the selected probabilities over the
//! sequence while the RELAX estimator sums them. Both reductions are kept
//! as-is; callers pick the estimator whose scale they trained with.
//!
//! For the two RELAX forms the per-sequence term is combined with the
//! control variate as
//!
//! ```text
//! loss = -Σ_b [ s_b · (R_b - c_φ(z̃)_b) + c_φ(z)_b - c_φ(z̃)_b ]
//! ```

use crate::autograd::{ensure_same_device, Tensor};
use crate::config::SequenceShape;
use crate::error::{LossError, Result};

use super::control_variate::ControlVariate;
use super::mask::SelectionMask;

/// Reward-refined likelihood losses for a generator of
/// `batch_size` sequences of `seq_len` tokens over `vocab_size` classes.
///
/// Every call records onto the thread's tape, and the tape is only freed
/// by [`clear_graph`](crate::autograd::clear_graph). Call it once per
/// training step, after the gradients have been read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GANLoss {
    shape: SequenceShape,
}

impl GANLoss {
    /// # Errors
    ///
    /// Returns [`LossError::InvalidConfig`] if any dimension is zero.
    pub fn new(shape: SequenceShape) -> Result<Self> {
        shape.validate()?;
        Ok(Self { shape })
    }

    #[must_use]
    pub fn shape(&self) -> SequenceShape {
        self.shape
    }

    /// REINFORCE: `loss = -Σ_i P[i, T[i]] · R[i]`.
    ///
    /// `prob` is `[N, V]`, `target` and `reward` are `[N]`. `N` is taken
    /// from `target`, so single steps and flattened sequences both work.
    ///
    /// # Errors
    ///
    /// Returns [`LossError::ShapeMismatch`], [`LossError::IndexOutOfRange`]
    /// or [`LossError::DeviceMismatch`] for inconsistent inputs.
    pub fn reinforce(&self, prob: &Tensor, target: &Tensor, reward: &Tensor) -> Result<Tensor> {
        let device = ensure_same_device(&[prob, target, reward])?;
        let n = target.numel();
        let v = self.shape.vocab_size;
        if prob.shape() != [n, v] {
            return Err(LossError::shape_mismatch("prob", &[n, v], prob.shape()));
        }
        let reward = flat(reward, n, "reward")?;

        let selected = SelectionMask::from_labels(target, v, device)?.select(prob)?;
        Ok(selected.mul(&reward).sum().neg())
    }

    /// Legacy RELAX estimator with the selected probabilities averaged over
    /// the sequence.
    ///
    /// `prob` is `[B·L, V]`, `target` holds `B·L` labels, `reward` is `[B]`.
    ///
    /// # Errors
    ///
    /// As [`GANLoss::reinforce`], plus any error from `control_variate`.
    pub fn relax_legacy(
        &self,
        prob: &Tensor,
        target: &Tensor,
        reward: &Tensor,
        control_variate: &dyn ControlVariate,
    ) -> Result<Tensor> {
        let device = ensure_same_device(&[prob, target, reward])?;
        let SequenceShape {
            batch_size: b,
            seq_len: l,
            vocab_size: v,
        } = self.shape;
        if prob.shape() != [b * l, v] {
            return Err(LossError::shape_mismatch("prob", &[b * l, v], prob.shape()));
        }
        if target.numel() != b * l {
            return Err(LossError::shape_mismatch("target", &[b * l], target.shape()));
        }

        let selected = SelectionMask::from_labels(target, v, device)?.select(prob)?;
        let per_sequence = selected.view(&[b, l]).mean_last_dim();
        self.combine(&per_sequence, reward, prob, control_variate)
    }

    /// RELAX estimator over the full sequence, summing the sampled-token
    /// probabilities of each sequence.
    ///
    /// `prob` is `[B, L, V]` or its flattened `[B·L, V]` form, `samples` is
    /// `[B, L]` with token indices stored as floats (truncated toward
    /// zero), `reward` is `[B]`.
    ///
    /// # Errors
    ///
    /// As [`GANLoss::reinforce`], plus any error from `control_variate`.
    pub fn relax(
        &self,
        prob: &Tensor,
        samples: &Tensor,
        reward: &Tensor,
        control_variate: &dyn ControlVariate,
    ) -> Result<Tensor> {
        let device = ensure_same_device(&[prob, samples, reward])?;
        let SequenceShape {
            batch_size: b,
            seq_len: l,
            vocab_size: v,
        } = self.shape;
        if !self.shape.is_prob_layout(prob.shape()) {
            return Err(LossError::shape_mismatch("prob", &[b, l, v], prob.shape()));
        }
        if samples.shape() != self.shape.token_shape() {
            return Err(LossError::shape_mismatch(
                "samples",
                &self.shape.token_shape(),
                samples.shape(),
            ));
        }

        let rows = prob.view(&[b * l, v]);
        let selected = SelectionMask::from_labels(samples, v, device)?.select(&rows)?;
        let per_sequence = selected.view(&[b, l]).sum_last_dim();
        self.combine(&per_sequence, reward, prob, control_variate)
    }

    fn combine(
        &self,
        per_sequence: &Tensor,
        reward: &Tensor,
        prob: &Tensor,
        control_variate: &dyn ControlVariate,
    ) -> Result<Tensor> {
        let b = self.shape.batch_size;
        let reward = flat(reward, b, "reward")?;
        let output = control_variate.evaluate(prob)?;
        let (c_z, c_z_tilde) = output.positive_class(b)?;
        ensure_same_device(&[per_sequence, &c_z])?;

        let term = per_sequence
            .mul(&reward.sub(&c_z_tilde))
            .add(&c_z)
            .sub(&c_z_tilde);
        Ok(term.sum().neg())
    }
}

/// `tensor` viewed as `[n]`, provided it holds exactly `n` values.
fn flat(tensor: &Tensor, n: usize, context: &str) -> Result<Tensor> {
    if tensor.numel() != n {
        return Err(LossError::shape_mismatch(context, &[n], tensor.shape()));
    }
    if tensor.shape() == [n] {
        Ok(tensor.clone())
    } else {
        Ok(tensor.view(&[n]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::{clear_graph, get_grad, Device};
    use crate::loss::PrecomputedControlVariate;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn gan(b: usize, l: usize, v: usize) -> GANLoss {
        GANLoss::new(SequenceShape::new(b, l, v)).expect("valid shape")
    }

    fn flat_baseline(b: usize, cz: f32, czt: f32) -> PrecomputedControlVariate {
        let z: Vec<f32> = (0..b).flat_map(|_| [1.0 - cz, cz]).collect();
        let zt: Vec<f32> = (0..b).flat_map(|_| [1.0 - czt, czt]).collect();
        PrecomputedControlVariate::new(Tensor::new(&z, &[b, 2]), Tensor::new(&zt, &[b, 2]))
    }

    #[test]
    fn test_reinforce_single_row() {
        let loss = gan(1, 1, 2)
            .reinforce(
                &Tensor::new(&[0.2, 0.8], &[1, 2]),
                &Tensor::from_slice(&[1.0]),
                &Tensor::from_slice(&[2.0]),
            )
            .expect("valid input");
        assert_relative_eq!(loss.item(), -1.6, epsilon = 1e-6);
    }

    #[test]
    fn test_reinforce_gradient_is_negative_reward() {
        clear_graph();
        let prob = Tensor::new(&[0.5, 0.5, 0.3, 0.7], &[2, 2]).requires_grad();
        gan(2, 1, 2)
            .reinforce(
                &prob,
                &Tensor::from_slice(&[0.0, 1.0]),
                &Tensor::from_slice(&[2.0, -1.0]),
            )
            .expect("valid input")
            .backward();

        let grad = get_grad(prob.id()).expect("prob is a leaf");
        assert_eq!(grad.data(), &[-2.0, 0.0, 0.0, 1.0]);
    }

    proptest! {
        #[test]
        fn prop_reinforce_zero_reward_is_zero(
            probs in prop::collection::vec(0.0f32..1.0, 12),
            labels in prop::collection::vec(0usize..3, 4),
        ) {
            let target: Vec<f32> = labels.iter().map(|&i| i as f32).collect();
            let loss = gan(4, 1, 3)
                .reinforce(
                    &Tensor::new(&probs, &[4, 3]),
                    &Tensor::from_slice(&target),
                    &Tensor::zeros(&[4]),
                )
                .expect("valid input");
            prop_assert_eq!(loss.item(), 0.0);
        }
    }

    #[test]
    fn test_legacy_means_and_relax_sums_over_sequence() {
        let cv = flat_baseline(1, 0.5, 0.5);
        let rows = Tensor::new(&[0.2, 0.8, 0.6, 0.4], &[2, 2]);
        let tokens = Tensor::new(&[1.0, 0.0], &[1, 2]);
        let reward = Tensor::from_slice(&[1.0]);
        let loss = gan(1, 2, 2);

        // selected = [0.8, 0.6]; (R - c_z̃) = 0.5; c_z - c_z̃ = 0
        let legacy = loss
            .relax_legacy(&rows, &tokens.view(&[2]), &reward, &cv)
            .expect("valid input");
        assert_relative_eq!(legacy.item(), -0.35, epsilon = 1e-6);

        let relax = loss
            .relax(&rows.view(&[1, 2, 2]), &tokens, &reward, &cv)
            .expect("valid input");
        assert_relative_eq!(relax.item(), -0.7, epsilon = 1e-6);
        assert_relative_eq!(relax.item(), 2.0 * legacy.item(), epsilon = 1e-6);
    }

    #[test]
    fn test_relax_baseline_offset() {
        // s = 0.9; 0.9 * (1.0 - 0.25) + 0.75 - 0.25 = 1.175
        let cv = flat_baseline(1, 0.75, 0.25);
        let loss = gan(1, 1, 2)
            .relax(
                &Tensor::new(&[0.1, 0.9], &[1, 1, 2]),
                &Tensor::new(&[1.0], &[1, 1]),
                &Tensor::from_slice(&[1.0]),
                &cv,
            )
            .expect("valid input");
        assert_relative_eq!(loss.item(), -1.175, epsilon = 1e-6);
    }

    #[test]
    fn test_relax_truncates_fractional_samples() {
        let cv = flat_baseline(1, 0.0, 0.0);
        let prob = Tensor::new(&[0.1, 0.2, 0.7], &[1, 1, 3]);
        let reward = Tensor::from_slice(&[1.0]);
        let loss = gan(1, 1, 3);

        let truncated = loss
            .relax(&prob, &Tensor::new(&[1.9], &[1, 1]), &reward, &cv)
            .expect("1.9 selects class 1");
        assert_relative_eq!(truncated.item(), -0.2, epsilon = 1e-6);

        let err = loss
            .relax(&prob, &Tensor::new(&[3.0], &[1, 1]), &reward, &cv)
            .unwrap_err();
        assert!(matches!(err, LossError::IndexOutOfRange { bound: 3, .. }));
    }

    #[test]
    fn test_relax_gradient_flows_to_control_variate() {
        clear_graph();
        let z = Tensor::new(&[0.4, 0.6], &[1, 2]).requires_grad();
        let z_tilde = Tensor::new(&[0.7, 0.3], &[1, 2]).requires_grad();
        let cv = PrecomputedControlVariate::new(z.clone(), z_tilde.clone());

        gan(1, 2, 2)
            .relax(
                &Tensor::new(&[0.5, 0.5, 0.25, 0.75], &[1, 2, 2]),
                &Tensor::new(&[0.0, 1.0], &[1, 2]),
                &Tensor::from_slice(&[2.0]),
                &cv,
            )
            .expect("valid input")
            .backward();

        // d/dc_z = -1; d/dc_z̃ = s + 1 with s = 1.25
        let dz = get_grad(z.id()).expect("z is a leaf");
        let dzt = get_grad(z_tilde.id()).expect("z_tilde is a leaf");
        assert_eq!(dz.data(), &[0.0, -1.0]);
        assert_relative_eq!(dzt.data()[1], 2.25, epsilon = 1e-6);
        assert_eq!(dzt.data()[0], 0.0);
    }

    #[test]
    fn test_shape_errors() {
        let cv = flat_baseline(2, 0.5, 0.5);
        let loss = gan(2, 2, 3);

        let err = loss
            .relax(
                &Tensor::zeros(&[2, 2, 2]),
                &Tensor::zeros(&[2, 2]),
                &Tensor::zeros(&[2]),
                &cv,
            )
            .unwrap_err();
        assert!(matches!(err, LossError::ShapeMismatch { .. }));

        let err = loss
            .relax_legacy(
                &Tensor::zeros(&[4, 3]),
                &Tensor::zeros(&[4]),
                &Tensor::zeros(&[3]),
                &cv,
            )
            .unwrap_err();
        assert!(matches!(err, LossError::ShapeMismatch { .. }));

        let wrong_batch = flat_baseline(1, 0.5, 0.5);
        let err = loss
            .relax_legacy(
                &Tensor::zeros(&[4, 3]),
                &Tensor::zeros(&[4]),
                &Tensor::zeros(&[2]),
                &wrong_batch,
            )
            .unwrap_err();
        assert!(matches!(err, LossError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_relax_rejects_permuted_prob() {
        let cv = flat_baseline(3, 0.5, 0.5);
        let loss = gan(3, 2, 2);
        let samples = Tensor::zeros(&[3, 2]);
        let reward = Tensor::ones(&[3]);

        for bad in [&[2, 3, 2][..], &[1, 6, 2][..]] {
            let err = loss
                .relax(&Tensor::zeros(bad), &samples, &reward, &cv)
                .unwrap_err();
            assert!(matches!(err, LossError::ShapeMismatch { .. }), "{bad:?}");
        }
        assert!(loss
            .relax(&Tensor::zeros(&[6, 2]), &samples, &reward, &cv)
            .is_ok());
    }

    #[test]
    fn test_clear_graph_releases_recorded_steps() {
        clear_graph();
        let loss = gan(2, 1, 2);
        for _ in 0..3 {
            let prob = Tensor::new(&[0.5, 0.5, 0.3, 0.7], &[2, 2]).requires_grad();
            loss.reinforce(
                &prob,
                &Tensor::from_slice(&[0.0, 1.0]),
                &Tensor::from_slice(&[1.0, 1.0]),
            )
            .expect("valid input")
            .backward();
        }
        assert!(crate::autograd::with_graph(|graph| graph.len()) >= 3);

        clear_graph();
        assert!(crate::autograd::with_graph(|graph| graph.is_empty()));
    }

    #[test]
    fn test_device_mismatch() {
        let err = gan(1, 1, 2)
            .reinforce(
                &Tensor::new(&[0.2, 0.8], &[1, 2]).with_device(Device::Cuda(0)),
                &Tensor::from_slice(&[1.0]),
                &Tensor::from_slice(&[2.0]),
            )
            .unwrap_err();
        assert_eq!(
            err,
            LossError::DeviceMismatch {
                expected: Device::Cuda(0),
                actual: Device::Cpu,
            }
        );
    }

    #[test]
    fn test_rejects_empty_shape() {
        assert!(matches!(
            GANLoss::new(SequenceShape::new(0, 4, 8)),
            Err(LossError::InvalidConfig { .. })
        ));
    }
}
