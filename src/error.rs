//! Error types for loss computations.
//!
//! Every failure at this layer is fatal for the batch being processed:
//! the outer training loop decides whether to abort or skip it.

use thiserror::Error;

use crate::autograd::Device;

/// Main error type for loss computations.
///
/// # Examples
///
/// ```
/// use seqgan_relax::error::LossError;
///
/// let err = LossError::shape_mismatch("reward", &[4], &[3]);
/// assert!(err.to_string().contains("shape mismatch"));
/// ```
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LossError {
    /// Tensor dimensions inconsistent with the declared batch/sequence/vocab sizes.
    #[error("shape mismatch for {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Which operand was checked
        context: String,
        /// Shape the operation requires
        expected: Vec<usize>,
        /// Shape that was supplied
        actual: Vec<usize>,
    },

    /// Label or sample index outside `[0, bound)`.
    #[error("{context} index {index} out of range for {bound} classes")]
    IndexOutOfRange {
        /// Which operand held the index
        context: String,
        /// Offending value as supplied (before truncation)
        index: f32,
        /// Exclusive upper bound
        bound: usize,
    },

    /// Operands placed on different compute devices.
    #[error("device mismatch: expected {expected}, got {actual}")]
    DeviceMismatch {
        /// Placement of the reference operand
        expected: Device,
        /// Placement of the offending operand
        actual: Device,
    },

    /// Empty input where a mean or division is required.
    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    /// Invalid configuration value.
    #[error("invalid config: {param} = {value}, expected {constraint}")]
    InvalidConfig {
        /// Field name
        param: String,
        /// Supplied value
        value: String,
        /// Constraint description
        constraint: String,
    },
}

impl LossError {
    /// Create a shape mismatch error with descriptive context.
    #[must_use]
    pub fn shape_mismatch(context: &str, expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            context: context.to_string(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Create an index out of range error.
    #[must_use]
    pub fn index_out_of_range(context: &str, index: f32, bound: usize) -> Self {
        Self::IndexOutOfRange {
            context: context.to_string(),
            index,
            bound,
        }
    }
}

/// Convenience type alias for Results.
pub type Result<T> = std::result::Result<T, LossError>;
