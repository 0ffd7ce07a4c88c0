//! One-hot selection of the probability assigned to a label or sample.
//!
//! Labels and sampled tokens arrive as `f32` tensors. They are converted to
//! class indices by truncation toward zero, then checked against the
//! vocabulary bound. Out-of-range values are an error, never clamped.

use crate::autograd::{Device, Tensor};
use crate::error::{LossError, Result};

/// Convert a label or sample value to a class index.
///
/// The value is truncated toward zero (`1.9 -> 1`, `-0.5 -> 0`).
///
/// # Errors
///
/// Returns [`LossError::IndexOutOfRange`] if the value is not finite, or if
/// the truncated index is negative or `>= num_classes`.
///
/// ```
/// use seqgan_relax::loss::class_index;
///
/// assert_eq!(class_index(2.7, 4, "sample"), Ok(2));
/// assert!(class_index(-1.0, 4, "sample").is_err());
/// assert!(class_index(4.0, 4, "sample").is_err());
/// ```
pub fn class_index(value: f32, num_classes: usize, context: &str) -> Result<usize> {
    let truncated = value.trunc();
    if !truncated.is_finite() || truncated < 0.0 || truncated as usize >= num_classes {
        return Err(LossError::index_out_of_range(context, value, num_classes));
    }
    if truncated != value {
        log::trace!("{context} value {value} truncated to class {truncated}");
    }
    Ok(truncated as usize)
}

/// One class index per row, validated against `num_classes`.
///
/// Dense masks are built on the mask's device, which is the device of the
/// probability tensor the mask is applied to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionMask {
    indices: Vec<usize>,
    num_classes: usize,
    device: Device,
}

impl SelectionMask {
    /// Build a mask from a tensor of labels (any shape; one row per element).
    ///
    /// # Errors
    ///
    /// Returns [`LossError::IndexOutOfRange`] for the first invalid label.
    pub fn from_labels(labels: &Tensor, num_classes: usize, device: Device) -> Result<Self> {
        let indices = labels
            .data()
            .iter()
            .map(|&v| class_index(v, num_classes, "label"))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            indices,
            num_classes,
            device,
        })
    }

    /// Build a mask from already-validated indices.
    ///
    /// # Errors
    ///
    /// Returns [`LossError::IndexOutOfRange`] for the first index `>= num_classes`.
    pub fn from_indices(indices: Vec<usize>, num_classes: usize, device: Device) -> Result<Self> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= num_classes) {
            return Err(LossError::index_out_of_range("label", bad as f32, num_classes));
        }
        Ok(Self {
            indices,
            num_classes,
            device,
        })
    }

    #[must_use]
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.indices.len()
    }

    #[must_use]
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Dense 0/1 mask with the given shape, whose trailing dimension must be
    /// `num_classes` and whose leading dimensions must hold `rows()` rows.
    ///
    /// # Errors
    ///
    /// Returns [`LossError::ShapeMismatch`] if `shape` cannot hold the mask.
    pub fn to_tensor(&self, shape: &[usize]) -> Result<Tensor> {
        let expected = [self.rows(), self.num_classes];
        let rows: usize = shape[..shape.len().saturating_sub(1)].iter().product();
        if shape.last() != Some(&self.num_classes) || rows != self.rows() {
            return Err(LossError::shape_mismatch("selection mask", &expected, shape));
        }

        let mut data = vec![0.0; rows * self.num_classes];
        for (row, &class) in self.indices.iter().enumerate() {
            data[row * self.num_classes + class] = 1.0;
        }
        Ok(Tensor::new(&data, shape).with_device(self.device))
    }

    /// Pick `prob[row, index[row]]` for every row, preserving the graph.
    ///
    /// # Errors
    ///
    /// Returns [`LossError::ShapeMismatch`] if `prob` doesn't have
    /// `rows() x num_classes` entries with `num_classes` trailing, or
    /// [`LossError::DeviceMismatch`] if `prob` lives elsewhere than the mask.
    pub fn select(&self, prob: &Tensor) -> Result<Tensor> {
        if prob.device() != self.device {
            return Err(LossError::DeviceMismatch {
                expected: self.device,
                actual: prob.device(),
            });
        }
        let mask = self.to_tensor(prob.shape())?;
        Ok(prob.masked_select(&mask))
    }
}
