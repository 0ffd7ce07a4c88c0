//! Reverse-mode automatic differentiation engine.
//!
//! The losses in [`crate::loss`] are built on this tape-based engine:
//! every formula is a chain of recorded operations, and the per-sample
//! gradient extraction replays the tape once per batch element.
//!
//! # Architecture
//!
//! The engine uses a define-by-run (dynamic) computational graph:
//! - Operations are recorded to a thread-local tape during the forward pass
//! - Gradients are computed in reverse order during the backward pass
//! - Leaf gradients accumulate until explicitly cleared with [`clear_grad`]
//! - The tape survives a backward pass, so several outputs of the same
//!   forward pass can be differentiated one after another
//!
//! # Example
//!
//! ```
//! use seqgan_relax::autograd::{get_grad, Tensor};
//!
//! let x = Tensor::from_slice(&[1.0, 2.0, 3.0]).requires_grad();
//! let w = Tensor::from_slice(&[0.5, 0.5, 0.5]).requires_grad();
//!
//! let y = x.mul(&w).sum();
//! y.backward();
//!
//! let dx = get_grad(x.id()).expect("x takes part in y");
//! assert_eq!(dx.data(), &[0.5, 0.5, 0.5]);
//! ```
//!
//! # References
//!
//! - Baydin, A. G., et al. (2018). Automatic differentiation in machine learning: a survey. JMLR.
//! - Griewank, A., & Walther, A. (2008). Evaluating derivatives. SIAM.

mod device;
pub(crate) mod grad_fn;
mod graph;
mod ops;
mod tensor;

pub use device::{ensure_same_device, Device};
pub use grad_fn::GradFn;
pub use graph::ComputationGraph;
pub use tensor::{Tensor, TensorId};

use std::cell::RefCell;

thread_local! {
    /// Global computation graph for the current thread.
    static GRAPH: RefCell<ComputationGraph> = RefCell::new(ComputationGraph::new());

    /// Flag to disable gradient tracking (for inference).
    static GRAD_ENABLED: RefCell<bool> = const { RefCell::new(true) };
}

/// Execute a closure without gradient tracking.
///
/// ```
/// use seqgan_relax::autograd::{no_grad, Tensor};
///
/// let x = Tensor::from_slice(&[1.0, 2.0]).requires_grad();
/// let y = no_grad(|| x.mul(&x).sum());
/// assert!(!y.requires_grad_enabled());
/// ```
pub fn no_grad<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    GRAD_ENABLED.with(|enabled| {
        let prev = *enabled.borrow();
        *enabled.borrow_mut() = false;
        let result = f();
        *enabled.borrow_mut() = prev;
        result
    })
}

/// Check if gradient tracking is currently enabled.
#[must_use]
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(|enabled| *enabled.borrow())
}

pub(crate) fn with_graph<F, R>(f: F) -> R
where
    F: FnOnce(&mut ComputationGraph) -> R,
{
    GRAPH.with(|graph| f(&mut graph.borrow_mut()))
}

/// Drop the recorded tape and every tracked tensor.
pub fn clear_graph() {
    GRAPH.with(|graph| graph.borrow_mut().clear());
}

/// Get the accumulated gradient of a tensor by ID.
#[must_use]
pub fn get_grad(id: TensorId) -> Option<Tensor> {
    with_graph(|graph| graph.get_grad(id))
}

/// Reset the accumulated gradient of a tensor by ID.
pub fn clear_grad(id: TensorId) {
    with_graph(|graph| graph.clear_grad(id));
}
