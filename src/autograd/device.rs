//! Compute placement tags.
//!
//! Every tensor records the device it lives on. Intermediate tensors built
//! inside a loss (broadcast weights, one-hot masks, reward coefficients)
//! are created on the device of the input they will be combined with, so
//! the placement check happens once, in [`ensure_same_device`].

use std::fmt;

use serde::{Deserialize, Serialize};

use super::Tensor;
use crate::error::{LossError, Result};

/// Device a tensor is placed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Device {
    /// Host memory.
    #[default]
    Cpu,
    /// Accelerator identified by its ordinal.
    Cuda(usize),
}

impl Device {
    /// Whether this is an accelerator placement.
    #[must_use]
    pub fn is_cuda(&self) -> bool {
        matches!(self, Device::Cuda(_))
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(ordinal) => write!(f, "cuda:{ordinal}"),
        }
    }
}

/// Check that all operands share one device and return it.
///
/// The first tensor is the reference placement.
///
/// # Errors
///
/// Returns [`LossError::DeviceMismatch`] naming the first operand that
/// disagrees with the reference, or [`LossError::DegenerateInput`] when
/// called without operands.
pub fn ensure_same_device(tensors: &[&Tensor]) -> Result<Device> {
    let (first, rest) = tensors
        .split_first()
        .ok_or_else(|| LossError::DegenerateInput("no operands to place".to_string()))?;

    let expected = first.device();
    for tensor in rest {
        if tensor.device() != expected {
            return Err(LossError::DeviceMismatch {
                expected,
                actual: tensor.device(),
            });
        }
    }
    Ok(expected)
}
