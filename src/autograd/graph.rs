//! Computation graph for automatic differentiation.
//!
//! This module implements the tape-based recording of operations
//! and the backward pass algorithm.

use std::collections::HashMap;
use std::sync::Arc;

use super::grad_fn::GradFn;
use super::tensor::{Tensor, TensorId};

/// Entry in the computation tape.
#[derive(Clone)]
pub(crate) struct TapeEntry {
    pub output_id: TensorId,
    pub grad_fn: Arc<dyn GradFn>,
    pub input_ids: Vec<TensorId>,
}

/// Computation graph that records operations for backward pass.
///
/// Operations are appended in forward order and replayed in reverse
/// during [`ComputationGraph::backward`]. The tape is not consumed by a
/// backward pass: a caller can seed several backward passes from different
/// outputs of the same forward pass, clearing leaf gradients in between.
///
/// Each thread owns its own graph (see the parent module), so leaf
/// gradients are a single shared accumulator per thread, keyed by
/// [`TensorId`].
#[allow(missing_debug_implementations)]
pub struct ComputationGraph {
    tape: Vec<TapeEntry>,

    /// Tracked tensors; leaves that require grad hold the accumulated gradient.
    tensors: HashMap<TensorId, Tensor>,
}

impl ComputationGraph {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tape: Vec::new(),
            tensors: HashMap::new(),
        }
    }

    /// Clear all recorded operations and tracked tensors.
    pub fn clear(&mut self) {
        self.tape.clear();
        self.tensors.clear();
    }

    /// Track a tensor. A tensor already tracked keeps its accumulated gradient.
    pub fn register_tensor(&mut self, tensor: Tensor) {
        self.tensors.entry(tensor.id()).or_insert(tensor);
    }

    /// Record an operation to the tape.
    pub fn record(
        &mut self,
        output_id: TensorId,
        grad_fn: Arc<dyn GradFn>,
        input_ids: Vec<TensorId>,
    ) {
        self.tape.push(TapeEntry {
            output_id,
            grad_fn,
            input_ids,
        });
    }

    #[must_use]
    pub fn get_tensor(&self, id: TensorId) -> Option<&Tensor> {
        self.tensors.get(&id)
    }

    /// Compute gradients via backpropagation.
    ///
    /// 1. Start with `grad_output` for the output tensor
    /// 2. Iterate through operations in reverse order
    /// 3. For each operation, compute gradients w.r.t. inputs
    /// 4. Accumulate gradients for tensors used multiple times
    /// 5. Add the result into every tracked leaf that requires grad
    pub fn backward(&mut self, output_id: TensorId, grad_output: Tensor) {
        let mut grads: HashMap<TensorId, Tensor> = HashMap::new();
        grads.insert(output_id, grad_output);

        for entry in self.tape.iter().rev() {
            let Some(grad_out) = grads.get(&entry.output_id).cloned() else {
                continue;
            };

            let input_grads = entry.grad_fn.backward(&grad_out);

            for (input_id, input_grad) in entry.input_ids.iter().zip(input_grads) {
                grads
                    .entry(*input_id)
                    .and_modify(|existing| {
                        let new_data: Vec<f32> = existing
                            .data()
                            .iter()
                            .zip(input_grad.data().iter())
                            .map(|(a, b)| a + b)
                            .collect();
                        *existing = Tensor::new(&new_data, existing.shape());
                    })
                    .or_insert(input_grad);
            }
        }

        for (id, grad) in grads {
            if let Some(tensor) = self.tensors.get_mut(&id) {
                if tensor.requires_grad_enabled() && tensor.is_leaf() {
                    tensor.accumulate_grad(grad);
                }
            }
        }
    }

    /// Number of recorded operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tape.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tape.is_empty()
    }

    /// Get gradient for a tensor by ID (after backward).
    #[must_use]
    pub fn get_grad(&self, id: TensorId) -> Option<Tensor> {
        self.tensors.get(&id).and_then(|t| t.grad().cloned())
    }

    /// Clear gradient for a specific tensor.
    pub fn clear_grad(&mut self, id: TensorId) {
        if let Some(tensor) = self.tensors.get_mut(&id) {
            tensor.zero_grad_();
        }
    }
}

impl Default for ComputationGraph {
    fn default() -> Self {
        Self::new()
    }
}
