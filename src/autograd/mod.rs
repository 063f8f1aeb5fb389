//! Tape-based autograd engine
//!
//! Provides automatic differentiation using a computational graph with gradient tape.
//! Every op records a [`BackwardOp`] on its output; [`backward`] replays them in
//! reverse topological order so shared subgraphs receive their full gradient
//! before propagating it further.

mod backward;
mod context;
pub(crate) mod ops;
mod tensor;

#[cfg(test)]
mod tests;

pub use backward::{backward, BackwardOp};
pub use context::Context;
pub use ops::*;
pub use tensor::{GradCell, Tensor};
