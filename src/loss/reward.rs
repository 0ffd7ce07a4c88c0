//! Reward-weighted sampled-token probabilities and per-sample gradients.
//!
//! The RELAX estimator needs, for every generated sequence `j`, the
//! gradient of `-R_j · Σ_i P[j, i, s_ji]` with respect to the generator's
//! parameters in isolation. [`RewardWeightedProbability::forward_reward`]
//! builds the signed per-step tensor used as a backward seed, and
//! [`RewardWeightedProbability::forward_reward_grads`] runs one backward
//! pass per sequence to collect [`GradientBundle`]s.
//!
//! Rewards are rollout outputs and enter as constants: no gradient flows
//! into the reward tensor.

use crate::autograd::{ensure_same_device, Device, Tensor};
use crate::config::SequenceShape;
use crate::error::{LossError, Result};
use crate::nn::Module;

use super::mask::class_index;

/// Gradients of one batch element, one tensor per generator parameter in
/// `Module::parameters()` order.
#[derive(Debug, Clone, Default)]
pub struct GradientBundle {
    grads: Vec<Tensor>,
}

impl GradientBundle {
    #[must_use]
    pub fn new(grads: Vec<Tensor>) -> Self {
        Self { grads }
    }

    #[must_use]
    pub fn grads(&self) -> &[Tensor] {
        &self.grads
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tensor> {
        self.grads.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.grads.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grads.is_empty()
    }

    /// `Σ_p ||g_p||²` over every parameter, without recording to the tape.
    #[must_use]
    pub fn squared_norm(&self) -> f32 {
        self.grads.iter().map(Tensor::squared_norm).sum()
    }

    #[must_use]
    pub fn into_inner(self) -> Vec<Tensor> {
        self.grads
    }
}

impl From<Vec<Tensor>> for GradientBundle {
    fn from(grads: Vec<Tensor>) -> Self {
        Self::new(grads)
    }
}

impl<'a> IntoIterator for &'a GradientBundle {
    type Item = &'a Tensor;
    type IntoIter = std::slice::Iter<'a, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.grads.iter()
    }
}

/// Signed, reward-weighted probability of each sampled token.
///
/// The per-sample passes replay the generator's graph, which stays on the
/// thread's tape until [`clear_graph`](crate::autograd::clear_graph) is
/// called. Clear it once per training step, after the bundles are built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardWeightedProbability {
    shape: SequenceShape,
}

impl RewardWeightedProbability {
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

    /// `[B, V]` tensor for one step: entry `(j, s_j)` holds
    /// `-R[j] · P[j, step, s_j]`, every other entry is zero.
    ///
    /// The result stays on the tape, so it can be differentiated with
    /// respect to `prob` directly or used as a backward seed.
    ///
    /// # Arguments
    ///
    /// * `step` - sequence position in `[0, seq_len)`
    /// * `samples` - `[B, L]` sampled token indices as floats
    /// * `prob` - `[B, L, V]` (or flattened `[B·L, V]`) probabilities
    /// * `rewards` - `[B]` per-sequence rewards
    ///
    /// # Errors
    ///
    /// Returns [`LossError::IndexOutOfRange`] if `step >= seq_len` or a
    /// sampled token is outside the vocabulary, [`LossError::ShapeMismatch`]
    /// or [`LossError::DeviceMismatch`] for inconsistent inputs.
    pub fn forward_reward(
        &self,
        step: usize,
        samples: &Tensor,
        prob: &Tensor,
        rewards: &Tensor,
    ) -> Result<Tensor> {
        let device = self.check_inputs(samples, prob, rewards)?;
        let SequenceShape {
            batch_size: b,
            seq_len: l,
            vocab_size: v,
        } = self.shape;
        if step >= l {
            return Err(LossError::index_out_of_range("step", step as f32, l));
        }

        let mut coefficients = vec![0.0; b * v];
        for (j, &reward) in rewards.data().iter().enumerate() {
            let token = class_index(samples.data()[j * l + step], v, "sample")?;
            coefficients[j * v + token] = -reward;
        }
        let coefficients = Tensor::new(&coefficients, &[b, v]).with_device(device);

        Ok(self.as_sequence(prob).select(1, step).mul(&coefficients))
    }

    /// Per-sample generator gradients of `-R_j · Σ_i P[j, i, s_ji]`.
    ///
    /// For each batch element `j`, in order: reset the generator's
    /// gradients, backpropagate `P[j]` seeded with its signed
    /// reward-weighted tensor, and copy the parameter gradients out. The
    /// computation graph is kept between passes, so `prob` must still be
    /// the output of the generator's forward pass on this thread's tape.
    ///
    /// Leaves the generator holding the gradients of the last element.
    ///
    /// # Errors
    ///
    /// As [`RewardWeightedProbability::forward_reward`].
    pub fn forward_reward_grads<M: Module + ?Sized>(
        &self,
        samples: &Tensor,
        prob: &Tensor,
        rewards: &Tensor,
        generator: &mut M,
    ) -> Result<Vec<GradientBundle>> {
        let device = self.check_inputs(samples, prob, rewards)?;

        // Seeds are detached values read from `prob` before any backward
        // pass runs.
        let seeds = rewards
            .data()
            .iter()
            .enumerate()
            .map(|(j, &reward)| self.sequence_seed(j, reward, samples, prob, device))
            .collect::<Result<Vec<_>>>()?;

        let sequence = self.as_sequence(prob);
        let mut bundles = Vec::with_capacity(seeds.len());
        for (j, seed) in seeds.into_iter().enumerate() {
            generator.zero_grad();
            sequence.select(0, j).backward_with_grad(seed);
            let bundle = GradientBundle::from(generator.gradients());
            log::debug!(
                "per-sample backward {}/{}: {} parameter tensors, squared norm {:.6}",
                j + 1,
                self.shape.batch_size,
                bundle.len(),
                bundle.squared_norm()
            );
            bundles.push(bundle);
        }
        Ok(bundles)
    }

    /// `[L, V]` seed for element `j`: `-R_j · P[j, i, s_ji]` at each sampled
    /// position.
    fn sequence_seed(
        &self,
        j: usize,
        reward: f32,
        samples: &Tensor,
        prob: &Tensor,
        device: Device,
    ) -> Result<Tensor> {
        let SequenceShape {
            seq_len: l,
            vocab_size: v,
            ..
        } = self.shape;
        let mut seed = vec![0.0; l * v];
        for i in 0..l {
            let token = class_index(samples.data()[j * l + i], v, "sample")?;
            seed[i * v + token] = -reward * prob.data()[(j * l + i) * v + token];
        }
        Ok(Tensor::new(&seed, &[l, v]).with_device(device))
    }

    fn check_inputs(&self, samples: &Tensor, prob: &Tensor, rewards: &Tensor) -> Result<Device> {
        let device = ensure_same_device(&[prob, samples, rewards])?;
        let [b, l, v] = self.shape.prob_shape();
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
        if rewards.numel() != b {
            return Err(LossError::shape_mismatch("rewards", &[b], rewards.shape()));
        }
        Ok(device)
    }

    fn as_sequence(&self, prob: &Tensor) -> Tensor {
        let shape = self.shape.prob_shape();
        if prob.shape() == shape {
            prob.clone()
        } else {
            prob.view(&shape)
        }
    }
}
