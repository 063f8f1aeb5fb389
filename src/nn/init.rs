//! Weight initialisers
//!
//! Fan sizes follow the usual convention for convolution kernels: the
//! receptive field (product of the spatial kernel extents) times the channel
//! count on each side.

use crate::autograd::{Context, Tensor};
use ndarray::Array1;

/// `(fan_in, fan_out)` for a weight of the given shape.
///
/// 2-D shapes are `[in, out]`; longer shapes are kernels whose last two axes
/// are the channel axes.
pub fn fans(shape: &[usize]) -> (usize, usize) {
    match shape {
        [] => (1, 1),
        [n] => (*n, *n),
        [rest @ .., a, b] => {
            let receptive: usize = rest.iter().product();
            (receptive * a, receptive * b)
        }
    }
}

/// U(-limit, limit) with `limit = sqrt(6 / (fan_in + fan_out))`
pub fn glorot_uniform(shape: &[usize], ctx: &mut Context) -> Tensor {
    let (fan_in, fan_out) = fans(shape);
    let limit = (6.0 / (fan_in + fan_out).max(1) as f32).sqrt();
    let len: usize = shape.iter().product();
    let data = ctx.uniform(len).mapv(|u| (2.0 * u - 1.0) * limit);
    Tensor::from_array(data, shape.to_vec(), true)
}

/// N(0, std^2) with `std = sqrt(2 / (fan_in + fan_out))`
pub fn glorot_normal(shape: &[usize], ctx: &mut Context) -> Tensor {
    let (fan_in, fan_out) = fans(shape);
    let std = (2.0 / (fan_in + fan_out).max(1) as f32).sqrt();
    let len: usize = shape.iter().product();
    let data = ctx.normal(len) * std;
    Tensor::from_array(data, shape.to_vec(), true)
}

/// Trainable tensor filled with `value`
pub fn filled(shape: &[usize], value: f32) -> Tensor {
    let len: usize = shape.iter().product();
    Tensor::from_array(Array1::from_elem(len, value), shape.to_vec(), true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fans_for_kernels() {
        assert_eq!(fans(&[128, 64]), (128, 64));
        assert_eq!(fans(&[1, 6, 1, 32, 64]), (6 * 32, 6 * 64));
    }

    #[test]
    fn test_glorot_uniform_bounds() {
        let mut ctx = Context::with_seed(4);
        let w = glorot_uniform(&[1, 1, 12, 64, 32], &mut ctx);
        let limit = (6.0f32 / (12.0 * 64.0 + 12.0 * 32.0)).sqrt();
        assert_eq!(w.shape(), &[1, 1, 12, 64, 32]);
        assert!(w.requires_grad());
        assert!(w.data().iter().all(|v| v.abs() <= limit));
    }

    #[test]
    fn test_glorot_normal_spread() {
        let mut ctx = Context::with_seed(8);
        let w = glorot_normal(&[100, 100], &mut ctx);
        let var = w.data().mapv(|v| v * v).mean().unwrap();
        assert!((var - 0.01).abs() < 0.002, "variance {var}");
    }
}
