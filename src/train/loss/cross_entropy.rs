//! Label-smoothed categorical cross-entropy on class probabilities

use crate::autograd::{log_clamped, mean, mul, scale, sum_axes, Tensor};
use crate::error::{Error, Result};

/// Probabilities below this are clamped before the log
pub const PROBABILITY_FLOOR: f32 = 1e-7;

/// `onehot * (1 - label_smoothing) + label_smoothing / num_classes`, shaped `[B, K]`
pub fn smoothed_targets(labels: &[usize], num_classes: usize, label_smoothing: f32) -> Result<Tensor> {
    if let Some(&bad) = labels.iter().find(|&&l| l >= num_classes) {
        return Err(Error::Config(format!("label {bad} out of range for {num_classes} classes")));
    }
    let off = label_smoothing / num_classes as f32;
    let on = 1.0 - label_smoothing + off;
    let data = labels
        .iter()
        .flat_map(|&label| (0..num_classes).map(move |k| if k == label { on } else { off }))
        .collect();
    Tensor::from_shape_vec(&[labels.len(), num_classes], data, false)
}

/// Cross-entropy of each example, shaped `[B]`
pub fn cross_entropy_by_example(
    probs: &Tensor,
    labels: &[usize],
    num_classes: usize,
    label_smoothing: f32,
) -> Result<Tensor> {
    let expected = [labels.len(), num_classes];
    if probs.shape() != expected {
        return Err(Error::shape(&expected, probs.shape()));
    }
    let targets = smoothed_targets(labels, num_classes, label_smoothing)?;
    let weighted = mul(&log_clamped(probs, PROBABILITY_FLOOR), &targets);
    Ok(scale(&sum_axes(&weighted, &[1], false)?, -1.0))
}

/// Batch-mean cross-entropy between predicted probabilities `[B, K]` and
/// smoothed one-hot labels
pub fn classifier_loss(
    probs: &Tensor,
    labels: &[usize],
    num_classes: usize,
    label_smoothing: f32,
) -> Result<Tensor> {
    Ok(mean(&cross_entropy_by_example(probs, labels, num_classes, label_smoothing)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::backward;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_smoothed_targets_sum_to_one() {
        let t = smoothed_targets(&[2, 0], 4, 0.1).unwrap();
        assert_eq!(t.shape(), &[2, 4]);
        assert_abs_diff_eq!(t.data()[2], 0.925, epsilon = 1e-6);
        assert_abs_diff_eq!(t.data()[0], 0.025, epsilon = 1e-6);
        assert_abs_diff_eq!(t.data().sum(), 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_unsmoothed_loss_is_negative_log_likelihood() {
        let probs = Tensor::from_shape_vec(&[2, 2], vec![0.8, 0.2, 0.4, 0.6], true).unwrap();
        let mut loss = classifier_loss(&probs, &[0, 1], 2, 0.0).unwrap();
        let expected = -(0.8f32.ln() + 0.6f32.ln()) / 2.0;
        assert_abs_diff_eq!(loss.item(), expected, epsilon = 1e-6);

        backward(&mut loss, None);
        let grad = probs.grad().unwrap();
        assert_abs_diff_eq!(grad[0], -1.0 / (2.0 * 0.8), epsilon = 1e-5);
        assert_abs_diff_eq!(grad[1], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_per_example_values() {
        let probs = Tensor::from_shape_vec(&[2, 3], vec![1.0, 0.0, 0.0, 0.0, 0.5, 0.5], false).unwrap();
        let per = cross_entropy_by_example(&probs, &[0, 2], 3, 0.0).unwrap();
        assert_eq!(per.shape(), &[2]);
        assert_abs_diff_eq!(per.data()[0], 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(per.data()[1], -(0.5f32.ln()), epsilon = 1e-6);
    }

    #[test]
    fn test_zero_probability_stays_finite() {
        let probs = Tensor::from_shape_vec(&[1, 2], vec![1.0, 0.0], false).unwrap();
        let loss = classifier_loss(&probs, &[1], 2, 0.1).unwrap();
        assert!(loss.item().is_finite());
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let probs = Tensor::zeros_shaped(&[2, 3], false);
        assert!(matches!(classifier_loss(&probs, &[0], 3, 0.0), Err(Error::ShapeMismatch { .. })));
        assert!(matches!(classifier_loss(&probs, &[0, 3], 3, 0.0), Err(Error::Config(_))));
    }
}
