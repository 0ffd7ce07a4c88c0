//! Gradient function trait and implementations.
//!
//! Each differentiable operation implements `GradFn` to define
//! how gradients flow backward through the operation.

use super::tensor::Tensor;

/// Trait for functions that compute gradients during backward pass.
///
/// Each differentiable operation creates a `GradFn` implementation
/// that captures the context it needs for gradient computation.
///
/// For element-wise addition z = x + y, ∂z/∂x = ∂z/∂y = 1, so
/// `backward(grad_output)` returns `[grad_output, grad_output]`.
pub trait GradFn: Send + Sync {
    /// Compute gradients with respect to inputs.
    ///
    /// Returns one gradient per input tensor, in the input order used
    /// when the operation was recorded.
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor>;

    /// Human-readable name for debugging.
    fn name(&self) -> &'static str;
}

// ============================================================================
// Element-wise Operations
// ============================================================================

/// Gradient function for addition: z = x + y
pub(crate) struct AddBackward;

impl GradFn for AddBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![grad_output.clone(), grad_output.clone()]
    }

    fn name(&self) -> &'static str {
        "AddBackward"
    }
}

/// Gradient function for subtraction: z = x - y
pub(crate) struct SubBackward;

impl GradFn for SubBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let grad_y: Vec<f32> = grad_output.data().iter().map(|&g| -g).collect();
        vec![
            grad_output.clone(),
            Tensor::new(&grad_y, grad_output.shape()),
        ]
    }

    fn name(&self) -> &'static str {
        "SubBackward"
    }
}

/// Gradient function for multiplication: z = x * y
pub(crate) struct MulBackward {
    pub(crate) x: Tensor,
    pub(crate) y: Tensor,
}

impl GradFn for MulBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // ∂(x*y)/∂x = y, ∂(x*y)/∂y = x
        let grad_x: Vec<f32> = grad_output
            .data()
            .iter()
            .zip(self.y.data().iter())
            .map(|(&g, &y)| g * y)
            .collect();
        let grad_y: Vec<f32> = grad_output
            .data()
            .iter()
            .zip(self.x.data().iter())
            .map(|(&g, &x)| g * x)
            .collect();

        vec![
            Tensor::new(&grad_x, grad_output.shape()),
            Tensor::new(&grad_y, grad_output.shape()),
        ]
    }

    fn name(&self) -> &'static str {
        "MulBackward"
    }
}

/// Gradient function for negation: z = -x
pub(crate) struct NegBackward;

impl GradFn for NegBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let grad_data: Vec<f32> = grad_output.data().iter().map(|&g| -g).collect();
        vec![Tensor::new(&grad_data, grad_output.shape())]
    }

    fn name(&self) -> &'static str {
        "NegBackward"
    }
}

/// Gradient function for scaling by a constant: z = c * x
pub(crate) struct ScaleBackward {
    pub(crate) scalar: f32,
}

impl GradFn for ScaleBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let grad_data: Vec<f32> = grad_output.data().iter().map(|&g| g * self.scalar).collect();
        vec![Tensor::new(&grad_data, grad_output.shape())]
    }

    fn name(&self) -> &'static str {
        "ScaleBackward"
    }
}

/// Gradient function for pow: z = x^n
pub(crate) struct PowBackward {
    pub(crate) x: Tensor,
    pub(crate) n: f32,
}

impl GradFn for PowBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // ∂(x^n)/∂x = n * x^(n-1)
        let grad_data: Vec<f32> = grad_output
            .data()
            .iter()
            .zip(self.x.data().iter())
            .map(|(&g, &x)| g * self.n * x.powf(self.n - 1.0))
            .collect();
        vec![Tensor::new(&grad_data, grad_output.shape())]
    }

    fn name(&self) -> &'static str {
        "PowBackward"
    }
}

// ============================================================================
// Reduction Operations
// ============================================================================

/// Gradient function for sum: z = sum(x)
pub(crate) struct SumBackward {
    pub(crate) input_shape: Vec<usize>,
}

impl GradFn for SumBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let g = grad_output.item();
        let numel: usize = self.input_shape.iter().product();
        vec![Tensor::new(&vec![g; numel], &self.input_shape)]
    }

    fn name(&self) -> &'static str {
        "SumBackward"
    }
}

/// Gradient function for mean: z = mean(x)
pub(crate) struct MeanBackward {
    pub(crate) input_shape: Vec<usize>,
}

impl GradFn for MeanBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let numel: usize = self.input_shape.iter().product();
        let grad_val = grad_output.item() / numel as f32;
        vec![Tensor::new(&vec![grad_val; numel], &self.input_shape)]
    }

    fn name(&self) -> &'static str {
        "MeanBackward"
    }
}

/// Gradient function for a reduction over the trailing dimension.
///
/// `scale` is 1 for a sum and `1 / last_dim` for a mean.
pub(crate) struct LastDimReduceBackward {
    pub(crate) input_shape: Vec<usize>,
    pub(crate) scale: f32,
}

impl GradFn for LastDimReduceBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let last = self.input_shape.last().copied().unwrap_or(1);
        let grad_data: Vec<f32> = grad_output
            .data()
            .iter()
            .flat_map(|&g| std::iter::repeat(g * self.scale).take(last))
            .collect();
        vec![Tensor::new(&grad_data, &self.input_shape)]
    }

    fn name(&self) -> &'static str {
        "LastDimReduceBackward"
    }
}

// ============================================================================
// Indexing Operations
// ============================================================================

/// Gradient function for `select(dim, index)`.
///
/// Scatters the incoming gradient back into the selected slab of a zero
/// tensor shaped like the input.
pub(crate) struct SelectBackward {
    pub(crate) input_shape: Vec<usize>,
    pub(crate) dim: usize,
    pub(crate) index: usize,
}

impl GradFn for SelectBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let outer: usize = self.input_shape[..self.dim].iter().product();
        let size = self.input_shape[self.dim];
        let inner: usize = self.input_shape[self.dim + 1..].iter().product();

        let mut grad = vec![0.0; outer * size * inner];
        for o in 0..outer {
            let src = &grad_output.data()[o * inner..(o + 1) * inner];
            let start = (o * size + self.index) * inner;
            grad[start..start + inner].copy_from_slice(src);
        }
        vec![Tensor::new(&grad, &self.input_shape)]
    }

    fn name(&self) -> &'static str {
        "SelectBackward"
    }
}

/// Gradient function for `masked_select(mask)`.
pub(crate) struct MaskedSelectBackward {
    pub(crate) input_shape: Vec<usize>,
    pub(crate) positions: Vec<usize>,
}

impl GradFn for MaskedSelectBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let numel: usize = self.input_shape.iter().product();
        let mut grad = vec![0.0; numel];
        for (&pos, &g) in self.positions.iter().zip(grad_output.data()) {
            grad[pos] = g;
        }
        vec![Tensor::new(&grad, &self.input_shape)]
    }

    fn name(&self) -> &'static str {
        "MaskedSelectBackward"
    }
}

/// Gradient function for view (reshape).
pub(crate) struct ViewBackward {
    pub(crate) input_shape: Vec<usize>,
}

impl GradFn for ViewBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        vec![Tensor::new(grad_output.data(), &self.input_shape)]
    }

    fn name(&self) -> &'static str {
        "ViewBackward"
    }
}

// ============================================================================
// Linear Algebra
// ============================================================================

/// Gradient function for matmul: Z = X @ Y
pub(crate) struct MatmulBackward {
    pub(crate) x: Tensor,
    pub(crate) y: Tensor,
}

impl GradFn for MatmulBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        // ∂L/∂X = G @ Yᵀ, ∂L/∂Y = Xᵀ @ G
        let x = as_matrix(&self.x);
        let y = as_matrix(&self.y);
        let g = as_matrix(grad_output);

        let grad_x = g.dot(&y.t());
        let grad_y = x.t().dot(&g);

        vec![
            Tensor::new(&grad_x.iter().copied().collect::<Vec<_>>(), self.x.shape()),
            Tensor::new(&grad_y.iter().copied().collect::<Vec<_>>(), self.y.shape()),
        ]
    }

    fn name(&self) -> &'static str {
        "MatmulBackward"
    }
}

/// Gradient function for adding a `[cols]` vector to every row of a `[rows, cols]` matrix.
pub(crate) struct BroadcastAddBackward {
    pub(crate) rows: usize,
    pub(crate) cols: usize,
}

impl GradFn for BroadcastAddBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let mut grad_bias = vec![0.0; self.cols];
        for row in grad_output.data().chunks(self.cols).take(self.rows) {
            for (acc, &g) in grad_bias.iter_mut().zip(row) {
                *acc += g;
            }
        }
        vec![grad_output.clone(), Tensor::new(&grad_bias, &[self.cols])]
    }

    fn name(&self) -> &'static str {
        "BroadcastAddBackward"
    }
}

// ============================================================================
// Activation Functions
// ============================================================================

/// Gradient function for Softmax over last dimension of 2D tensor
/// For y = softmax(x), the gradient is:
/// ∂`L/∂x_i` = `y_i` * (`g_i` - `Σ_j` `g_j` * `y_j`)
pub(crate) struct SoftmaxBackward {
    pub(crate) output: Tensor,
}

impl GradFn for SoftmaxBackward {
    fn backward(&self, grad_output: &Tensor) -> Vec<Tensor> {
        let features = self.output.shape()[1];
        let mut grad_input = vec![0.0; self.output.numel()];

        let rows = self
            .output
            .data()
            .chunks(features)
            .zip(grad_output.data().chunks(features));
        for (b, (out_row, grad_row)) in rows.enumerate() {
            let dot: f32 = out_row.iter().zip(grad_row).map(|(y, g)| y * g).sum();
            for j in 0..features {
                grad_input[b * features + j] = out_row[j] * (grad_row[j] - dot);
            }
        }

        vec![Tensor::new(&grad_input, grad_output.shape())]
    }

    fn name(&self) -> &'static str {
        "SoftmaxBackward"
    }
}

/// Borrow a 2D tensor as an ndarray view.
pub(crate) fn as_matrix(t: &Tensor) -> ndarray::ArrayView2<'_, f32> {
    ndarray::ArrayView2::from_shape((t.shape()[0], t.shape()[1]), t.data())
        .expect("tensor shape agrees with its data length")
}
