//! Losses for adversarial training of a sequence generator.
//!
//! # Usage
//!
//! ```
//! use seqgan_relax::autograd::Tensor;
//! use seqgan_relax::config::SequenceShape;
//! use seqgan_relax::loss::{GANLoss, WeightedNLLLoss};
//!
//! let shape = SequenceShape::new(1, 1, 2);
//! let prob = Tensor::new(&[0.2, 0.8], &[1, 2]);
//! let target = Tensor::from_slice(&[1.0]);
//!
//! let nll = WeightedNLLLoss::unweighted(2).expect("two classes");
//! assert!((nll.forward(&prob, &target).expect("valid").item() + 0.8).abs() < 1e-6);
//!
//! let pg = GANLoss::new(shape).expect("valid shape");
//! let reward = Tensor::from_slice(&[2.0]);
//! let loss = pg.reinforce(&prob, &target, &reward).expect("valid");
//! assert!((loss.item() + 1.6).abs() < 1e-6);
//! ```
//!
//! All inputs are probabilities, not log-probabilities. Labels and sampled
//! tokens are float tensors converted with [`class_index`].

mod control_variate;
mod gan;
mod mask;
mod nll;
mod reward;
mod variance;

pub use control_variate::{
    ControlVariate, ControlVariateOutput, PrecomputedControlVariate, POSITIVE_CLASS,
};
pub use gan::GANLoss;
pub use mask::{class_index, SelectionMask};
pub use nll::{Reduction, WeightedNLLLoss};
pub use reward::{GradientBundle, RewardWeightedProbability};
pub use variance::VarianceLoss;
