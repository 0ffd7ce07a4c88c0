//! Differentiable operations for tensors.
//!
//! Each operation:
//! 1. Computes the forward result on the device of its left operand
//! 2. Records a `GradFn` to the computation graph (if gradient tracking is enabled)
//!
//! Shape preconditions are asserted; callers that accept user input
//! validate it before reaching this layer.

use std::sync::Arc;

use super::grad_fn::{
    as_matrix, AddBackward, BroadcastAddBackward, GradFn, LastDimReduceBackward,
    MaskedSelectBackward, MatmulBackward, MeanBackward, MulBackward, NegBackward, PowBackward,
    ScaleBackward, SelectBackward, SoftmaxBackward, SubBackward, SumBackward, ViewBackward,
};
use super::tensor::Tensor;
use super::{is_grad_enabled, with_graph};

impl Tensor {
    /// Attach `grad_fn` to `result` and record it if any input tracks gradients.
    fn record_op(mut result: Tensor, grad_fn: Arc<dyn GradFn>, inputs: &[&Tensor]) -> Tensor {
        if is_grad_enabled() && inputs.iter().any(|t| t.requires_grad_enabled()) {
            result.requires_grad_(true);
            result.set_grad_fn(grad_fn.clone());

            with_graph(|graph| {
                for input in inputs {
                    graph.register_tensor((*input).clone());
                }
                graph.record(
                    result.id(),
                    grad_fn,
                    inputs.iter().map(|t| t.id()).collect(),
                );
            });
        }
        result
    }

    fn zip_with(&self, other: &Tensor, op: &str, f: impl Fn(f32, f32) -> f32) -> Tensor {
        assert_eq!(
            self.shape(),
            other.shape(),
            "{op}: shape mismatch {:?} vs {:?}",
            self.shape(),
            other.shape()
        );
        let data: Vec<f32> = self
            .data()
            .iter()
            .zip(other.data().iter())
            .map(|(&a, &b)| f(a, b))
            .collect();
        Tensor::new(&data, self.shape()).with_device(self.device())
    }

    fn map(&self, f: impl Fn(f32) -> f32) -> Tensor {
        let data: Vec<f32> = self.data().iter().map(|&a| f(a)).collect();
        Tensor::new(&data, self.shape()).with_device(self.device())
    }
}

// ============================================================================
// Element-wise Operations
// ============================================================================

impl Tensor {
    /// Element-wise addition: z = self + other
    #[must_use]
    pub fn add(&self, other: &Tensor) -> Tensor {
        let result = self.zip_with(other, "add", |a, b| a + b);
        Self::record_op(result, Arc::new(AddBackward), &[self, other])
    }

    /// Element-wise subtraction: z = self - other
    #[must_use]
    pub fn sub(&self, other: &Tensor) -> Tensor {
        let result = self.zip_with(other, "sub", |a, b| a - b);
        Self::record_op(result, Arc::new(SubBackward), &[self, other])
    }

    /// Element-wise multiplication: z = self * other
    #[must_use]
    pub fn mul(&self, other: &Tensor) -> Tensor {
        let result = self.zip_with(other, "mul", |a, b| a * b);
        let grad_fn = Arc::new(MulBackward {
            x: self.clone(),
            y: other.clone(),
        });
        Self::record_op(result, grad_fn, &[self, other])
    }

    /// Element-wise negation: z = -self
    #[must_use]
    pub fn neg(&self) -> Tensor {
        let result = self.map(|a| -a);
        Self::record_op(result, Arc::new(NegBackward), &[self])
    }

    /// Scalar multiplication: z = self * scalar
    #[must_use]
    pub fn mul_scalar(&self, scalar: f32) -> Tensor {
        let result = self.map(|a| a * scalar);
        Self::record_op(result, Arc::new(ScaleBackward { scalar }), &[self])
    }

    /// Element-wise power: z = self^n
    #[must_use]
    pub fn pow(&self, n: f32) -> Tensor {
        let result = self.map(|a| a.powf(n));
        let grad_fn = Arc::new(PowBackward { x: self.clone(), n });
        Self::record_op(result, grad_fn, &[self])
    }
}

// ============================================================================
// Reduction Operations
// ============================================================================

impl Tensor {
    /// Sum all elements into a `[1]` tensor.
    #[must_use]
    pub fn sum(&self) -> Tensor {
        let sum: f32 = self.data().iter().sum();
        let result = Tensor::scalar(sum).with_device(self.device());
        let grad_fn = Arc::new(SumBackward {
            input_shape: self.shape().to_vec(),
        });
        Self::record_op(result, grad_fn, &[self])
    }

    /// Mean of all elements into a `[1]` tensor.
    #[must_use]
    pub fn mean(&self) -> Tensor {
        let sum: f32 = self.data().iter().sum();
        let result = Tensor::scalar(sum / self.numel() as f32).with_device(self.device());
        let grad_fn = Arc::new(MeanBackward {
            input_shape: self.shape().to_vec(),
        });
        Self::record_op(result, grad_fn, &[self])
    }

    /// Sum over the trailing dimension: `[.., n] -> [..]`.
    #[must_use]
    pub fn sum_last_dim(&self) -> Tensor {
        self.reduce_last_dim(1.0)
    }

    /// Mean over the trailing dimension: `[.., n] -> [..]`.
    #[must_use]
    pub fn mean_last_dim(&self) -> Tensor {
        let last = self.shape().last().copied().unwrap_or(1);
        self.reduce_last_dim(1.0 / last as f32)
    }

    fn reduce_last_dim(&self, scale: f32) -> Tensor {
        assert!(self.ndim() >= 2, "last-dim reduction needs at least 2 dims");
        let last = self.shape()[self.ndim() - 1];
        assert!(last > 0, "last-dim reduction over an empty dimension");

        let data: Vec<f32> = self
            .data()
            .chunks(last)
            .map(|row| row.iter().sum::<f32>() * scale)
            .collect();
        let out_shape = &self.shape()[..self.ndim() - 1];
        let result = Tensor::new(&data, out_shape).with_device(self.device());

        let grad_fn = Arc::new(LastDimReduceBackward {
            input_shape: self.shape().to_vec(),
            scale,
        });
        Self::record_op(result, grad_fn, &[self])
    }
}

// ============================================================================
// Indexing and Shape Operations
// ============================================================================

impl Tensor {
    /// Slice out `index` along `dim`, dropping that dimension.
    ///
    /// ```
    /// use seqgan_relax::autograd::Tensor;
    ///
    /// let t = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
    /// assert_eq!(t.select(1, 1).data(), &[2.0, 5.0]);
    /// assert_eq!(t.select(0, 1).data(), &[4.0, 5.0, 6.0]);
    /// ```
    #[must_use]
    pub fn select(&self, dim: usize, index: usize) -> Tensor {
        assert!(dim < self.ndim(), "select: dim {dim} out of range for {:?}", self.shape());
        let size = self.shape()[dim];
        assert!(index < size, "select: index {index} out of range for size {size}");

        let outer: usize = self.shape()[..dim].iter().product();
        let inner: usize = self.shape()[dim + 1..].iter().product();

        let mut data = Vec::with_capacity(outer * inner);
        for o in 0..outer {
            let start = (o * size + index) * inner;
            data.extend_from_slice(&self.data()[start..start + inner]);
        }

        let mut out_shape = self.shape().to_vec();
        out_shape.remove(dim);
        let result = Tensor::new(&data, &out_shape).with_device(self.device());

        let grad_fn = Arc::new(SelectBackward {
            input_shape: self.shape().to_vec(),
            dim,
            index,
        });
        Self::record_op(result, grad_fn, &[self])
    }

    /// Gather the entries where `mask` is non-zero into a 1D tensor (row-major order).
    #[must_use]
    pub fn masked_select(&self, mask: &Tensor) -> Tensor {
        assert_eq!(
            self.shape(),
            mask.shape(),
            "masked_select: mask shape must match input"
        );
        let positions: Vec<usize> = mask
            .data()
            .iter()
            .enumerate()
            .filter(|(_, &m)| m != 0.0)
            .map(|(i, _)| i)
            .collect();
        let data: Vec<f32> = positions.iter().map(|&i| self.data()[i]).collect();
        let result = Tensor::new(&data, &[data.len()]).with_device(self.device());

        let grad_fn = Arc::new(MaskedSelectBackward {
            input_shape: self.shape().to_vec(),
            positions,
        });
        Self::record_op(result, grad_fn, &[self])
    }

    /// Reshape tensor to a new shape with the same number of elements.
    #[must_use]
    pub fn view(&self, new_shape: &[usize]) -> Tensor {
        let new_numel: usize = new_shape.iter().product();
        assert_eq!(
            self.numel(),
            new_numel,
            "view: number of elements must match ({} vs {new_numel})",
            self.numel()
        );

        let result = Tensor::new(self.data(), new_shape).with_device(self.device());
        let grad_fn = Arc::new(ViewBackward {
            input_shape: self.shape().to_vec(),
        });
        Self::record_op(result, grad_fn, &[self])
    }
}

// ============================================================================
// Linear Algebra and Activations
// ============================================================================

impl Tensor {
    /// Matrix multiplication of two 2D tensors: z = self @ other
    #[must_use]
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.ndim(), 2, "matmul requires 2D tensors");
        assert_eq!(other.ndim(), 2, "matmul requires 2D tensors");
        let (m, k1) = (self.shape()[0], self.shape()[1]);
        let (k2, n) = (other.shape()[0], other.shape()[1]);
        assert_eq!(k1, k2, "matmul dimension mismatch: {k1} vs {k2}");

        let product = as_matrix(self).dot(&as_matrix(other));
        let data: Vec<f32> = product.iter().copied().collect();
        let result = Tensor::new(&data, &[m, n]).with_device(self.device());

        let grad_fn = Arc::new(MatmulBackward {
            x: self.clone(),
            y: other.clone(),
        });
        Self::record_op(result, grad_fn, &[self, other])
    }

    /// Broadcast addition of a `[M]` vector over the rows of a `[N, M]` matrix.
    #[must_use]
    pub fn broadcast_add(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.ndim(), 2, "broadcast_add requires 2D matrix");
        assert_eq!(other.ndim(), 1, "broadcast_add requires 1D vector");
        let (rows, cols) = (self.shape()[0], self.shape()[1]);
        assert_eq!(
            cols,
            other.shape()[0],
            "Matrix columns {cols} must match vector length {}",
            other.shape()[0]
        );

        let data: Vec<f32> = self
            .data()
            .chunks(cols)
            .flat_map(|row| row.iter().zip(other.data()).map(|(a, b)| a + b))
            .collect();
        let result = Tensor::new(&data, self.shape()).with_device(self.device());

        Self::record_op(
            result,
            Arc::new(BroadcastAddBackward { rows, cols }),
            &[self, other],
        )
    }

    /// Softmax over the last dimension of a 2D tensor.
    ///
    /// Uses numerically stable computation with max subtraction.
    #[must_use]
    pub fn softmax(&self) -> Tensor {
        assert_eq!(self.ndim(), 2, "softmax currently only supports 2D tensors");
        let features = self.shape()[1];

        let mut output = Vec::with_capacity(self.numel());
        for row in self.data().chunks(features) {
            let max_val = row.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
            let exp: Vec<f32> = row.iter().map(|&v| (v - max_val).exp()).collect();
            let sum: f32 = exp.iter().sum();
            output.extend(exp.into_iter().map(|e| e / sum));
        }

        let result = Tensor::new(&output, self.shape()).with_device(self.device());
        let grad_fn = Arc::new(SoftmaxBackward {
            output: result.clone(),
        });
        Self::record_op(result, grad_fn, &[self])
    }
}
