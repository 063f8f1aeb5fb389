//! Genre accuracy

use super::Metric;
use crate::Tensor;

/// Index of the largest entry of each `[B, K]` row; ties go to the lower index
pub fn argmax_rows(predictions: &Tensor) -> Vec<usize> {
    let classes = predictions.shape().last().copied().unwrap_or(1).max(1);
    predictions
        .as_slice()
        .chunks(classes)
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |best, (k, &v)| if v > best.1 { (k, v) } else { best })
                .0
        })
        .collect()
}

/// Number of rows whose argmax equals the label
pub fn count_correct(predictions: &Tensor, labels: &[usize]) -> usize {
    argmax_rows(predictions).iter().zip(labels).filter(|(p, l)| p == l).count()
}

/// Fraction of rows whose argmax matches the label
///
/// # Example
///
/// ```
/// use museforge::train::{Accuracy, Metric};
/// use museforge::Tensor;
///
/// let probs = Tensor::from_shape_vec(&[2, 3], vec![0.1, 0.7, 0.2, 0.5, 0.3, 0.2], false)?;
/// assert_eq!(Accuracy.compute(&probs, &[1, 2]), 0.5);
/// # Ok::<(), museforge::Error>(())
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct Accuracy;

impl Metric for Accuracy {
    fn compute(&self, predictions: &Tensor, labels: &[usize]) -> f32 {
        if labels.is_empty() {
            return 0.0;
        }
        count_correct(predictions, labels) as f32 / labels.len() as f32
    }

    fn name(&self) -> &str {
        "accuracy"
    }
}

/// Accuracy accumulated over every batch seen so far
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningAccuracy {
    correct: usize,
    seen: usize,
}

impl RunningAccuracy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one batch and return that batch's own accuracy
    pub fn update(&mut self, predictions: &Tensor, labels: &[usize]) -> f32 {
        let correct = count_correct(predictions, labels);
        self.correct += correct;
        self.seen += labels.len();
        if labels.is_empty() {
            0.0
        } else {
            correct as f32 / labels.len() as f32
        }
    }

    /// Running accuracy, 0 before any example
    pub fn value(&self) -> f32 {
        if self.seen == 0 {
            0.0
        } else {
            self.correct as f32 / self.seen as f32
        }
    }

    pub fn seen(&self) -> usize {
        self.seen
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
