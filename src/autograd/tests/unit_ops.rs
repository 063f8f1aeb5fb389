//! Unit tests for autograd operations (forward and backward)

use crate::autograd::{
    add, add_scalar, backward, concat_last, mean, mul, permute, relu, reshape, scale, sigmoid,
    slice_last, sub, sum, sum_axes, Tensor,
};
use approx::assert_abs_diff_eq;

#[test]
fn test_tensor_grad_accumulation() {
    let t = Tensor::from_vec(vec![1.0, 2.0, 3.0], true);

    t.accumulate_grad(ndarray::arr1(&[1.0, 1.0, 1.0]));
    let grad1 = t.grad().expect("gradient should be available");
    assert_eq!(grad1[0], 1.0);

    t.accumulate_grad(ndarray::arr1(&[1.0, 1.0, 1.0]));
    let grad2 = t.grad().expect("gradient should be available");
    assert_eq!(grad2[0], 2.0);
}

#[test]
fn test_add_backward() {
    let a = Tensor::from_vec(vec![1.0, 2.0, 3.0], true);
    let b = Tensor::from_vec(vec![4.0, 5.0, 6.0], true);
    let mut c = add(&a, &b);
    assert_abs_diff_eq!(c.data()[1], 7.0);

    backward(&mut c, Some(ndarray::arr1(&[1.0, 1.0, 1.0])));

    assert_abs_diff_eq!(a.grad().expect("gradient")[0], 1.0);
    assert_abs_diff_eq!(b.grad().expect("gradient")[0], 1.0);
}

#[test]
fn test_sub_backward_negates_rhs() {
    let a = Tensor::from_vec(vec![1.0, 2.0], true);
    let b = Tensor::from_vec(vec![4.0, 5.0], true);
    let mut c = sub(&a, &b);
    assert_eq!(c.data().to_vec(), vec![-3.0, -3.0]);

    backward(&mut c, Some(ndarray::arr1(&[1.0, 2.0])));
    assert_eq!(a.grad().unwrap().to_vec(), vec![1.0, 2.0]);
    assert_eq!(b.grad().unwrap().to_vec(), vec![-1.0, -2.0]);
}

#[test]
fn test_mul_backward() {
    let a = Tensor::from_vec(vec![2.0, 3.0], true);
    let b = Tensor::from_vec(vec![5.0, 7.0], true);
    let mut c = mul(&a, &b);

    backward(&mut c, Some(ndarray::arr1(&[1.0, 1.0])));

    // d(a*b)/da = b
    assert_eq!(a.grad().unwrap().to_vec(), vec![5.0, 7.0]);
    assert_eq!(b.grad().unwrap().to_vec(), vec![2.0, 3.0]);
}

#[test]
fn test_mean_and_scale() {
    let a = Tensor::from_vec(vec![1.0, 2.0, 3.0, 6.0], true);
    let mut m = scale(&mean(&a), 2.0);
    assert_abs_diff_eq!(m.item(), 6.0);

    backward(&mut m, None);
    assert_eq!(a.grad().unwrap().to_vec(), vec![0.5; 4]);
}

#[test]
fn test_add_scalar_passes_gradient() {
    let a = Tensor::from_vec(vec![1.0, -1.0], true);
    let mut s = sum(&add_scalar(&a, -1.0));
    assert_abs_diff_eq!(s.item(), -2.0);
    backward(&mut s, None);
    assert_eq!(a.grad().unwrap().to_vec(), vec![1.0, 1.0]);
}

#[test]
fn test_relu_forward_backward() {
    let a = Tensor::from_vec(vec![-1.0, 0.5, 2.0], true);
    let mut r = relu(&a);
    assert_eq!(r.data().to_vec(), vec![0.0, 0.5, 2.0]);

    backward(&mut r, None);
    assert_eq!(a.grad().unwrap().to_vec(), vec![0.0, 1.0, 1.0]);
}

#[test]
fn test_sigmoid_at_zero() {
    let a = Tensor::from_vec(vec![0.0], true);
    let mut s = sigmoid(&a);
    assert_abs_diff_eq!(s.item(), 0.5);
    backward(&mut s, None);
    assert_abs_diff_eq!(a.grad().unwrap()[0], 0.25);
}

#[test]
fn test_shared_subgraph_gradient_counted_once_per_path() {
    // y = (x*x) + (x*x) through one shared node h = x*x; dy/dx = 4x
    let x = Tensor::from_vec(vec![3.0], true);
    let h = mul(&x, &x);
    let mut y = add(&h, &h);
    backward(&mut y, None);
    assert_abs_diff_eq!(x.grad().unwrap()[0], 12.0);
}

#[test]
fn test_deep_diamond_gradient() {
    // z = a + b with a = 2h, b = 3h, h = relu(x); dz/dx = 5 for x > 0
    let x = Tensor::from_vec(vec![1.0, 2.0], true);
    let h = relu(&x);
    let a = scale(&h, 2.0);
    let b = scale(&h, 3.0);
    let mut z = sum(&add(&a, &b));
    backward(&mut z, None);
    assert_eq!(x.grad().unwrap().to_vec(), vec![5.0, 5.0]);
}

#[test]
fn test_sum_axes_keepdims() {
    let a = Tensor::from_shape_vec(&[2, 3, 2], (0..12).map(|v| v as f32).collect(), true).unwrap();
    let mut s = sum_axes(&a, &[1], true).unwrap();
    assert_eq!(s.shape(), &[2, 1, 2]);
    assert_eq!(s.data().to_vec(), vec![6.0, 9.0, 24.0, 27.0]);

    let dropped = sum_axes(&a, &[0, 2], false).unwrap();
    assert_eq!(dropped.shape(), &[3]);
    assert_eq!(dropped.data().to_vec(), vec![14.0, 22.0, 30.0]);

    backward(&mut s, Some(ndarray::arr1(&[1.0, 2.0, 3.0, 4.0])));
    let grad = a.grad().unwrap();
    assert_eq!(grad[0], 1.0);
    assert_eq!(grad[3], 2.0);
    assert_eq!(grad[11], 4.0);
}

#[test]
fn test_sum_axes_rejects_bad_axis() {
    let a = Tensor::zeros_shaped(&[2, 2], false);
    assert!(sum_axes(&a, &[2], false).is_err());
}

#[test]
fn test_fold_tracks_into_batch_and_back() {
    // [B=2, F=3, T=2] -> [T, B, F] -> back to [B, F, T]
    let data: Vec<f32> = (0..12).map(|v| v as f32).collect();
    let x = Tensor::from_shape_vec(&[2, 3, 2], data.clone(), true).unwrap();
    let folded = permute(&x, &[2, 0, 1]).unwrap();
    assert_eq!(folded.shape(), &[2, 2, 3]);
    assert_eq!(folded.data().slice(ndarray::s![..3]).to_vec(), vec![0.0, 2.0, 4.0]);

    let flat = reshape(&folded, &[4, 3]).unwrap();
    let restored = permute(&reshape(&flat, &[2, 2, 3]).unwrap(), &[1, 2, 0]).unwrap();
    assert_eq!(restored.data().to_vec(), data);

    let mut s = sum(&restored);
    backward(&mut s, None);
    assert_eq!(x.grad().unwrap().to_vec(), vec![1.0; 12]);
}

#[test]
fn test_split_tracks_and_concat() {
    let x = Tensor::from_shape_vec(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], true).unwrap();
    let parts: Vec<Tensor> = (0..3).map(|t| slice_last(&x, t, 1).unwrap()).collect();
    let joined = concat_last(&parts).unwrap();
    assert_eq!(joined.data(), x.data());

    let mut s = sum(&mul(&joined, &joined));
    backward(&mut s, None);
    assert_eq!(x.grad().unwrap().to_vec(), vec![2.0, 4.0, 6.0, 8.0, 10.0, 12.0]);
}
