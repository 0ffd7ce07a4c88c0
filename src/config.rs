//! Batch geometry shared by the sequence-level losses.

use serde::{Deserialize, Serialize};

use crate::error::{LossError, Result};

/// Geometry of a generated batch: `batch_size` sequences of `seq_len`
/// tokens drawn from a `vocab_size` vocabulary.
///
/// Derives serde so an outer trainer can embed it in its own config file.
///
/// # Example
///
/// ```
/// use seqgan_relax::config::SequenceShape;
///
/// let shape: SequenceShape =
///     serde_json::from_str(r#"{"batch_size": 64, "seq_len": 20, "vocab_size": 5000}"#)
///         .expect("valid json");
/// assert!(shape.validate().is_ok());
/// assert_eq!(shape.flat_rows(), 64 * 20);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceShape {
    pub batch_size: usize,
    pub seq_len: usize,
    pub vocab_size: usize,
}

impl SequenceShape {
    #[must_use]
    pub fn new(batch_size: usize, seq_len: usize, vocab_size: usize) -> Self {
        Self {
            batch_size,
            seq_len,
            vocab_size,
        }
    }

    /// Reject zero-sized dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`LossError::InvalidConfig`] naming the first zero field.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("batch_size", self.batch_size),
            ("seq_len", self.seq_len),
            ("vocab_size", self.vocab_size),
        ];
        for (param, value) in fields {
            if value == 0 {
                return Err(LossError::InvalidConfig {
                    param: param.to_string(),
                    value: value.to_string(),
                    constraint: ">0".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Rows of the flattened `(batch * seq_len, vocab)` probability matrix.
    #[must_use]
    pub fn flat_rows(&self) -> usize {
        self.batch_size * self.seq_len
    }

    /// `[batch, seq_len]`
    #[must_use]
    pub fn token_shape(&self) -> [usize; 2] {
        [self.batch_size, self.seq_len]
    }

    /// `[batch, seq_len, vocab]`
    #[must_use]
    pub fn prob_shape(&self) -> [usize; 3] {
        [self.batch_size, self.seq_len, self.vocab_size]
    }

    /// Whether `shape` is `[batch, seq_len, vocab]` or its flattened
    /// `[batch * seq_len, vocab]` form.
    #[must_use]
    pub fn is_prob_layout(&self, shape: &[usize]) -> bool {
        shape == self.prob_shape() || shape == [self.flat_rows(), self.vocab_size]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prob_layout_rejects_permuted_dims() {
        let shape = SequenceShape::new(3, 2, 4);
        assert!(shape.is_prob_layout(&[3, 2, 4]));
        assert!(shape.is_prob_layout(&[6, 4]));
        assert!(!shape.is_prob_layout(&[2, 3, 4]));
        assert!(!shape.is_prob_layout(&[1, 6, 4]));
        assert!(!shape.is_prob_layout(&[24]));
    }

    #[test]
    fn test_shapes() {
        let shape = SequenceShape::new(4, 3, 10);
        assert_eq!(shape.flat_rows(), 12);
        assert_eq!(shape.token_shape(), [4, 3]);
        assert_eq!(shape.prob_shape(), [4, 3, 10]);
    }

    #[test]
    fn test_validate_rejects_zero_dimension() {
        let err = SequenceShape::new(4, 0, 10).validate().unwrap_err();
        assert!(matches!(
            err,
            LossError::InvalidConfig { ref param, .. } if param == "seq_len"
        ));
    }

    #[test]
    fn test_missing_field_fails_to_deserialize() {
        let parsed: std::result::Result<SequenceShape, _> =
            serde_json::from_str(r#"{"batch_size": 2, "seq_len": 3}"#);
        assert!(parsed.is_err());
    }
}
