//! Neural network building blocks.
//!
//! The losses only need a model that can enumerate its parameters and
//! reset/read their gradients; that contract is the [`Module`] trait.
//! [`Linear`] is the minimal concrete layer used to build generator heads.

pub mod init;
mod linear;
mod module;

pub use linear::Linear;
pub use module::Module;
