//! End-to-end RELAX training step: a softmax generator produces token
//! probabilities, per-sample gradients are extracted, and the variance
//! loss is formed from them.

use approx::assert_relative_eq;
use seqgan_relax::autograd::clear_graph;
use seqgan_relax::prelude::*;

const HIDDEN: usize = 4;

/// Linear projection followed by a softmax over the vocabulary.
struct SoftmaxGenerator {
    head: Linear,
}

impl SoftmaxGenerator {
    fn new(vocab_size: usize, seed: u64) -> Self {
        Self {
            head: Linear::with_seed(HIDDEN, vocab_size, Some(seed)),
        }
    }
}

impl Module for SoftmaxGenerator {
    fn forward(&self, input: &Tensor) -> Tensor {
        self.head.forward(input).softmax()
    }

    fn parameters(&self) -> Vec<&Tensor> {
        self.head.parameters()
    }
}

/// Discriminator head scoring a hard one-hot sample and its relaxation.
struct SoftDiscriminator {
    head: Linear,
    one_hot: Tensor,
    shape: SequenceShape,
}

impl SoftDiscriminator {
    fn new(shape: SequenceShape, samples: &Tensor, seed: u64) -> Self {
        let [b, l, v] = shape.prob_shape();
        let mut one_hot = vec![0.0; b * l * v];
        for (row, &token) in samples.data().iter().enumerate() {
            one_hot[row * v + token as usize] = 1.0;
        }
        Self {
            head: Linear::with_seed(l * v, 2, Some(seed)),
            one_hot: Tensor::new(&one_hot, &[b, l * v]),
            shape,
        }
    }
}

impl ControlVariate for SoftDiscriminator {
    fn evaluate(&self, prob: &Tensor) -> Result<ControlVariateOutput> {
        let [b, l, v] = self.shape.prob_shape();
        let relaxed = prob.view(&[b, l * v]);
        Ok(ControlVariateOutput::new(
            self.head.forward(&self.one_hot).softmax(),
            self.head.forward(&relaxed).softmax(),
        ))
    }
}

fn features(rows: usize) -> Tensor {
    let data: Vec<f32> = (0..rows * HIDDEN)
        .map(|i| ((i * 7 % 11) as f32 - 5.0) / 5.0)
        .collect();
    Tensor::new(&data, &[rows, HIDDEN])
}

fn sum_bundles(bundles: &[GradientBundle]) -> Vec<Vec<f32>> {
    let mut total: Vec<Vec<f32>> = bundles[0].iter().map(|g| vec![0.0; g.numel()]).collect();
    for bundle in bundles {
        for (acc, grad) in total.iter_mut().zip(bundle.iter()) {
            for (a, g) in acc.iter_mut().zip(grad.data()) {
                *a += g;
            }
        }
    }
    total
}

#[test]
fn test_per_sample_gradients_sum_to_batch_gradient() {
    clear_graph();
    let shape = SequenceShape::new(3, 2, 5);
    let mut generator = SoftmaxGenerator::new(shape.vocab_size, 11);
    let prob = generator.forward(&features(shape.flat_rows()));
    let samples = Tensor::new(&[0.0, 4.0, 2.0, 2.0, 1.0, 3.0], &shape.token_shape());
    let rewards = Tensor::from_slice(&[1.0, -0.5, 2.0]);

    let estimator = RewardWeightedProbability::new(shape).expect("valid shape");
    let bundles = estimator
        .forward_reward_grads(&samples, &prob, &rewards, &mut generator)
        .expect("valid input");
    assert_eq!(bundles.len(), shape.batch_size);
    assert!(bundles.iter().all(|b| b.len() == generator.parameters().len()));

    // Stack the per-step seeds into one [B, L, V] seed for a single pass.
    let [b, l, v] = shape.prob_shape();
    let mut seed = vec![0.0; b * l * v];
    for step in 0..l {
        let step_seed = estimator
            .forward_reward(step, &samples, &prob, &rewards)
            .expect("valid step");
        for j in 0..b {
            let dst = (j * l + step) * v;
            seed[dst..dst + v].copy_from_slice(&step_seed.data()[j * v..(j + 1) * v]);
        }
    }
    generator.zero_grad();
    prob.view(&shape.prob_shape())
        .backward_with_grad(Tensor::new(&seed, &shape.prob_shape()));
    let batch = generator.gradients();

    for (summed, full) in sum_bundles(&bundles).iter().zip(&batch) {
        for (s, f) in summed.iter().zip(full.data()) {
            assert_relative_eq!(*s, *f, epsilon = 1e-5);
        }
    }
}

#[test_log::test]
fn test_zero_reward_sample_has_zero_gradient() {
    clear_graph();
    let shape = SequenceShape::new(2, 3, 4);
    let mut generator = SoftmaxGenerator::new(shape.vocab_size, 5);
    let prob = generator.forward(&features(shape.flat_rows()));
    let samples = Tensor::new(&[1.0, 2.0, 3.0, 0.0, 0.0, 1.0], &shape.token_shape());

    let bundles = RewardWeightedProbability::new(shape)
        .expect("valid shape")
        .forward_reward_grads(
            &samples,
            &prob,
            &Tensor::from_slice(&[0.0, 1.5]),
            &mut generator,
        )
        .expect("valid input");

    assert_eq!(bundles[0].squared_norm(), 0.0);
    assert!(bundles[1].squared_norm() > 0.0);
}

#[test_log::test]
fn test_variance_of_extracted_gradients() {
    clear_graph();
    let shape = SequenceShape::new(4, 2, 3);
    let mut generator = SoftmaxGenerator::new(shape.vocab_size, 23);
    let prob = generator.forward(&features(shape.flat_rows()));
    let samples = Tensor::new(&[0.0, 1.0, 2.0, 0.0, 1.0, 1.0, 2.0, 2.0], &shape.token_shape());
    let rewards = Tensor::from_slice(&[1.0, 0.25, -1.0, 0.5]);

    let bundles = RewardWeightedProbability::new(shape)
        .expect("valid shape")
        .forward_reward_grads(&samples, &prob, &rewards, &mut generator)
        .expect("valid input");
    let variance = VarianceLoss::new().forward(&bundles).expect("non-empty batch");

    let expected = bundles.iter().map(GradientBundle::squared_norm).sum::<f32>() / 4.0;
    assert!(variance.item() > 0.0);
    assert_relative_eq!(variance.item(), expected, epsilon = 1e-5);
}

#[test]
fn test_relax_step_reaches_generator_and_discriminator() {
    clear_graph();
    let shape = SequenceShape::new(2, 2, 3);
    let mut generator = SoftmaxGenerator::new(shape.vocab_size, 3);
    let prob = generator.forward(&features(shape.flat_rows()));
    let samples = Tensor::new(&[2.0, 0.0, 1.0, 1.0], &shape.token_shape());
    let discriminator = SoftDiscriminator::new(shape, &samples, 9);

    let loss = GANLoss::new(shape)
        .expect("valid shape")
        .relax(&prob, &samples, &Tensor::from_slice(&[1.0, 0.2]), &discriminator)
        .expect("valid input");
    assert!(loss.item().is_finite());

    generator.zero_grad();
    loss.backward();

    let generator_norm: f32 = generator.gradients().iter().map(Tensor::squared_norm).sum();
    let discriminator_norm: f32 = discriminator
        .head
        .gradients()
        .iter()
        .map(Tensor::squared_norm)
        .sum();
    assert!(generator_norm > 0.0);
    assert!(discriminator_norm > 0.0);
}

#[test]
fn test_weighted_nll_on_generator_output() {
    clear_graph();
    let generator = SoftmaxGenerator::new(3, 17);
    let prob = generator.forward(&features(2));
    let target = Tensor::from_slice(&[2.0, 0.0]);

    let loss = WeightedNLLLoss::new(Tensor::from_slice(&[1.0, 1.0, 1.0]))
        .expect("1D weights")
        .forward(&prob, &target)
        .expect("valid input");

    let expected = -(prob.data()[2] + prob.data()[3]);
    assert_relative_eq!(loss.item(), expected, epsilon = 1e-6);
}
