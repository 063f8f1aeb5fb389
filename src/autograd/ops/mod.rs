//! Autograd operations with backward passes
//!
//! This module provides differentiable operations for automatic differentiation.

mod activations;
pub(crate) mod basic;
mod conv;
mod embedding;
mod matmul;
mod normalize;
mod piano_roll;
mod shape;

// Re-export all public operations
pub use activations::{leaky_relu, relu, sigmoid, sigmoid_scalar, softmax_rows};
pub use basic::{add, add_scalar, log_clamped, mean, mul, scale, sub, sum, sum_axes};
pub use conv::{conv3d, conv3d_transpose, Padding};
pub use embedding::embedding;
pub use matmul::{linear, matmul, matmul_compute, transpose};
pub use normalize::{batch_norm, channel_stats, BatchStats};
pub use piano_roll::{chroma, onset, onset_difference, OCTAVE};
pub use shape::{concat_last, permute, reshape, slice_last};
