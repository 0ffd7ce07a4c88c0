//! Convenience re-exports for common usage.
//!
//! # Usage
//!
//! ```
//! use seqgan_relax::prelude::*;
//! ```

pub use crate::autograd::{no_grad, Device, Tensor};
pub use crate::config::SequenceShape;
pub use crate::error::{LossError, Result};
pub use crate::loss::{
    ControlVariate, ControlVariateOutput, GANLoss, GradientBundle, PrecomputedControlVariate,
    Reduction, RewardWeightedProbability, VarianceLoss, WeightedNLLLoss,
};
pub use crate::nn::{Linear, Module};
