//! Training result types

use serde::Serialize;

/// Result of a training run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainResult {
    /// Epochs completed
    pub epochs: usize,
    /// Optimizer steps taken
    pub steps: usize,
    /// Loss of the last successful step
    pub final_loss: f32,
    /// Running accuracy at the end of the run
    pub accuracy: f32,
    /// Accuracy of the best checkpoint written, if any
    pub best_accuracy: Option<f32>,
    /// Steps whose whole batch was unreadable
    pub skipped_steps: usize,
    /// Steps that produced a non-finite loss
    pub diverged_steps: usize,
    /// Total training time in seconds
    pub elapsed_secs: f64,
}

impl TrainResult {
    pub(crate) fn empty() -> Self {
        Self {
            epochs: 0,
            steps: 0,
            final_loss: f32::NAN,
            accuracy: 0.0,
            best_accuracy: None,
            skipped_steps: 0,
            diverged_steps: 0,
            elapsed_secs: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_result() {
        let result = TrainResult::empty();
        assert_eq!(result.steps, 0);
        assert!(result.final_loss.is_nan());
        assert_eq!(result.best_accuracy, None);
    }
}
