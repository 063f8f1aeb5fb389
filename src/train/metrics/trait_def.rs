//! Core Metric trait definition

use crate::Tensor;

/// Trait for evaluation metrics over class predictions
pub trait Metric {
    /// Compute the metric from `[B, K]` class scores and one label per row
    fn compute(&self, predictions: &Tensor, labels: &[usize]) -> f32;

    /// Name of the metric
    fn name(&self) -> &str;

    /// Whether higher values are better (true) or lower (false)
    fn higher_is_better(&self) -> bool {
        true
    }
}
