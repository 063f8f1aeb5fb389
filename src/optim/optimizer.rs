//! Optimizer trait

use crate::Tensor;

/// Trait for optimization algorithms.
///
/// Parameters are borrowed from the networks that own them. The order of
/// `params` must be the same on every call: per-parameter state is indexed
/// by position.
pub trait Optimizer {
    /// Apply one update from the accumulated gradients; parameters without
    /// a gradient are left untouched
    fn step(&mut self, params: &mut [&mut Tensor]);

    /// Clear every gradient
    fn zero_grad(&mut self, params: &mut [&mut Tensor]) {
        for param in params.iter_mut() {
            param.zero_grad();
        }
    }

    /// Get learning rate
    fn lr(&self) -> f32;

    /// Set learning rate
    fn set_lr(&mut self, lr: f32);
}
