//! Property-based tests for row softmax

use super::test_utils::{finite_difference, loss_weights, weighted_sum};
use crate::autograd::{backward, softmax_rows, Tensor};
use proptest::prelude::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_softmax_backward_gradient_check(
        rows in 1usize..4,
        classes in 2usize..6,
        seed in prop::collection::vec(-5.0f32..5.0, 24),
    ) {
        let x: Vec<f32> = seed[..rows * classes].to_vec();
        let a = Tensor::from_shape_vec(&[rows, classes], x.clone(), true).unwrap();
        let mut y = softmax_rows(&a).unwrap();

        let y_len = y.len();
        backward(&mut y, Some(ndarray::Array1::from(loss_weights(y_len))));

        let analytical = a.grad().expect("gradient should be available");
        let numerical = finite_difference(
            |x_val| {
                let t = Tensor::from_shape_vec(&[rows, classes], x_val.to_vec(), false).unwrap();
                weighted_sum(softmax_rows(&t).unwrap().as_slice())
            },
            &x,
            1e-3,
        );

        for i in 0..x.len() {
            let diff = (analytical[i] - numerical[i]).abs();
            prop_assert!(diff < 0.01, "Gradient mismatch at index {}: analytical={}, numerical={}, diff={}",
                        i, analytical[i], numerical[i], diff);
        }
    }

    #[test]
    fn prop_softmax_rows_sum_to_one(
        rows in 1usize..5,
        x in prop::collection::vec(-20.0f32..20.0, 40),
    ) {
        let classes = x.len() / 5;
        let a = Tensor::from_shape_vec(&[rows, classes], x[..rows * classes].to_vec(), false).unwrap();
        let y = softmax_rows(&a).unwrap();

        for row in y.as_slice().chunks(classes) {
            let sum: f32 = row.iter().sum();
            prop_assert!((sum - 1.0).abs() < 1e-5);
        }
    }
}
