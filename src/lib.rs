//! seqgan-relax: loss functions for adversarially trained sequence
//! generators in pure Rust.
//!
//! Provides the REINFORCE and RELAX policy-gradient losses, a
//! class-weighted likelihood loss, per-sample gradient extraction and the
//! gradient-variance loss used to train a learned control variate. Every
//! formula runs on a small define-by-run autograd engine so its gradients
//! are real.
//!
//! # Quick Start
//!
//! ```
//! use seqgan_relax::prelude::*;
//!
//! let shape = SequenceShape::new(2, 1, 3);
//! let prob = Tensor::new(&[0.1, 0.6, 0.3, 0.5, 0.25, 0.25], &[2, 3]).requires_grad();
//! let samples = Tensor::from_slice(&[1.0, 0.0]);
//! let rewards = Tensor::from_slice(&[1.0, 0.5]);
//!
//! let loss = GANLoss::new(shape)?.reinforce(&prob, &samples, &rewards)?;
//! loss.backward();
//!
//! let grad = seqgan_relax::autograd::get_grad(prob.id()).expect("prob is a leaf");
//! assert_eq!(grad.data(), &[0.0, -1.0, 0.0, -0.5, 0.0, 0.0]);
//! # Ok::<(), LossError>(())
//! ```
//!
//! # Modules
//!
//! - [`autograd`]: Tape-based reverse-mode differentiation and device tags
//! - [`config`]: Batch geometry shared by the sequence losses
//! - [`error`]: Error taxonomy
//! - [`loss`]: Likelihood, policy-gradient and variance losses
//! - [`nn`]: `Module` trait and a linear layer for generator heads

pub mod autograd;
pub mod config;
pub mod error;
pub mod loss;
pub mod nn;
pub mod prelude;

pub use error::{LossError, Result};
