//! Tensor with automatic differentiation support.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::device::Device;
use super::grad_fn::GradFn;
use super::with_graph;

/// Unique identifier for tensors in the computation graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorId(u64);

impl TensorId {
    /// Generate a new unique tensor ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        TensorId(COUNTER.fetch_add(1, Ordering::SeqCst))
    }
}

impl Default for TensorId {
    fn default() -> Self {
        Self::new()
    }
}

/// A row-major `f32` tensor with optional gradient tracking.
///
/// # Design
///
/// The tensor stores:
/// - `data`: the values, row-major
/// - `shape`: dimensions of the tensor
/// - `grad`: accumulated gradient (populated on the graph's copy after `backward()`)
/// - `requires_grad`: whether this tensor participates in gradient computation
/// - `grad_fn`: the operation that created this tensor
/// - `device`: placement tag inherited by every op result
/// - `id`: identity used by the tape
///
/// Clones share the same `id`, so gradients are looked up through
/// [`crate::autograd::get_grad`] rather than read from a handle.
#[derive(Clone)]
pub struct Tensor {
    data: Vec<f32>,
    shape: Vec<usize>,
    grad: Option<Box<Tensor>>,
    requires_grad: bool,
    is_leaf: bool,
    grad_fn: Option<Arc<dyn GradFn>>,
    device: Device,
    id: TensorId,
}

impl Tensor {
    /// Create a new tensor from a slice with the given shape.
    ///
    /// By default, gradient tracking is disabled and the tensor lives on
    /// [`Device::Cpu`].
    ///
    /// # Panics
    ///
    /// Panics if the data length doesn't match the product of shape dimensions.
    #[must_use]
    pub fn new(data: &[f32], shape: &[usize]) -> Self {
        let expected_len: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected_len,
            "Data length {} doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected_len
        );

        Self {
            data: data.to_vec(),
            shape: shape.to_vec(),
            grad: None,
            requires_grad: false,
            is_leaf: true,
            grad_fn: None,
            device: Device::Cpu,
            id: TensorId::new(),
        }
    }

    /// Create a tensor from a 1D slice (vector).
    #[must_use]
    pub fn from_slice(data: &[f32]) -> Self {
        Self::new(data, &[data.len()])
    }

    /// Create a one-element tensor of shape `[1]`.
    #[must_use]
    pub fn scalar(value: f32) -> Self {
        Self::new(&[value], &[1])
    }

    /// Create a tensor filled with zeros.
    #[must_use]
    pub fn zeros(shape: &[usize]) -> Self {
        let len: usize = shape.iter().product();
        Self::new(&vec![0.0; len], shape)
    }

    /// Create a zero tensor already placed on `device`.
    #[must_use]
    pub fn zeros_on(shape: &[usize], device: Device) -> Self {
        Self::zeros(shape).with_device(device)
    }

    /// Create a tensor filled with ones.
    #[must_use]
    pub fn ones(shape: &[usize]) -> Self {
        let len: usize = shape.iter().product();
        Self::new(&vec![1.0; len], shape)
    }

    /// Create a zero tensor with the shape and device of `other`.
    #[must_use]
    pub fn zeros_like(other: &Tensor) -> Self {
        Self::zeros_on(&other.shape, other.device)
    }

    /// Enable gradient tracking for this tensor.
    #[must_use]
    pub fn requires_grad(mut self) -> Self {
        self.requires_grad = true;
        self
    }

    /// Enable or disable gradient tracking (in-place).
    pub fn requires_grad_(&mut self, requires: bool) -> &mut Self {
        self.requires_grad = requires;
        self
    }

    /// Check if this tensor requires gradient computation.
    #[must_use]
    pub fn requires_grad_enabled(&self) -> bool {
        self.requires_grad
    }

    /// Place this tensor on `device`.
    #[must_use]
    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Device this tensor is placed on.
    #[must_use]
    pub fn device(&self) -> Device {
        self.device
    }

    /// Check if this is a leaf tensor (not created by an operation).
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.is_leaf
    }

    #[must_use]
    pub fn id(&self) -> TensorId {
        self.id
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Get the total number of elements.
    #[must_use]
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Gradient held by this handle. Only the graph's registered copy
    /// accumulates gradients; callers read them with
    /// [`get_grad`](crate::autograd::get_grad).
    #[must_use]
    pub(crate) fn grad(&self) -> Option<&Tensor> {
        self.grad.as_deref()
    }

    /// Zero out the gradient.
    pub fn zero_grad_(&mut self) {
        self.grad = None;
    }

    pub(crate) fn accumulate_grad(&mut self, grad: Tensor) {
        match &mut self.grad {
            Some(existing) => {
                let new_data: Vec<f32> = existing
                    .data()
                    .iter()
                    .zip(grad.data().iter())
                    .map(|(a, b)| a + b)
                    .collect();
                **existing = Tensor::new(&new_data, &self.shape).with_device(self.device);
            }
            None => {
                self.grad = Some(Box::new(grad.with_device(self.device)));
            }
        }
    }

    pub(crate) fn set_grad_fn(&mut self, grad_fn: Arc<dyn GradFn>) {
        self.grad_fn = Some(grad_fn);
        self.is_leaf = false;
    }

    /// Name of the operation that produced this tensor, if any.
    #[must_use]
    pub fn grad_fn_name(&self) -> Option<&'static str> {
        self.grad_fn.as_ref().map(|f| f.name())
    }

    /// Detach tensor from computation graph.
    ///
    /// Returns a new leaf with the same data and device but no gradient tracking.
    #[must_use]
    pub fn detach(&self) -> Tensor {
        Tensor {
            data: self.data.clone(),
            shape: self.shape.clone(),
            grad: None,
            requires_grad: false,
            is_leaf: true,
            grad_fn: None,
            device: self.device,
            id: TensorId::new(),
        }
    }

    /// Get a scalar value (for 0-d or 1-element tensors).
    ///
    /// # Panics
    ///
    /// Panics if the tensor has more than one element.
    #[must_use]
    pub fn item(&self) -> f32 {
        assert_eq!(
            self.numel(),
            1,
            "item() only works on tensors with exactly 1 element, got {}",
            self.numel()
        );
        self.data[0]
    }

    /// Sum of squared entries, without recording to the tape.
    #[must_use]
    pub fn squared_norm(&self) -> f32 {
        self.data.iter().map(|&v| v * v).sum()
    }

    /// Compute gradients via backpropagation from a scalar output.
    ///
    /// # Panics
    ///
    /// Panics if called on a tensor with more than one element
    /// (use `backward_with_grad` for non-scalar outputs).
    pub fn backward(&self) {
        assert_eq!(
            self.numel(),
            1,
            "backward() requires scalar output, got shape {:?}. Use backward_with_grad() instead.",
            self.shape
        );

        self.backward_with_grad(Tensor::ones(&self.shape));
    }

    /// Compute gradients seeded with `grad_output` (same shape as `self`).
    ///
    /// # Panics
    ///
    /// Panics if the seed shape differs from this tensor's shape.
    pub fn backward_with_grad(&self, grad_output: Tensor) {
        assert_eq!(
            grad_output.shape(),
            self.shape(),
            "backward seed shape must match output shape"
        );
        with_graph(|graph| {
            graph.backward(self.id, grad_output);
        });
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("device", &self.device)
            .field("requires_grad", &self.requires_grad)
            .field("is_leaf", &self.is_leaf)
            .field("has_grad", &self.grad.is_some())
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
