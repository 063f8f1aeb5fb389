//! Gradient penalty on interpolates between real and generated batches
//!
//! The penalty `mean_i (||dD/dx (x_i)|| - 1)^2` depends on the critic's input
//! gradient, so its own gradient with respect to the critic parameters is a
//! second derivative. The tape is first-order, so the parameter gradient is
//! obtained from a surrogate whose first derivative matches it: for each
//! example `i` with unit input-gradient direction `u_i`,
//!
//! ```text
//! d/dθ [u_iᵀ ∇x D(x_i)] ≈ d/dθ [(D(x_i + h u_i) - D(x_i - h u_i)) / 2h]
//! ```
//!
//! so `Σ_i w_i (D(x_i + h u_i) - D(x_i - h u_i)) / 2h` with constant weights
//! `w_i = 2 (||g_i|| - 1) / B` has (up to `O(h²)`) the penalty's parameter
//! gradient. The central difference is exact for critics that are linear in
//! their input.

use crate::autograd::{add_scalar, backward, mul, reshape, sub, sum, Context, Tensor};
use crate::error::{Error, Result};
use crate::nn::{Discriminator, Module};
use ndarray::Array1;

/// Added under the square root of the slope norm
pub const SLOPE_EPS: f32 = 1e-8;

/// Step of the central difference along the input gradient direction
pub const DIRECTION_STEP: f32 = 1e-2;

/// A network scoring piano-rolls, one row per example
pub trait Critic: Module {
    fn score(&self, x: &Tensor) -> Result<Tensor>;
}

impl Critic for Discriminator {
    fn score(&self, x: &Tensor) -> Result<Tensor> {
        self.forward(x)
    }
}

/// Penalty value and the term to add to the critic loss
#[derive(Clone)]
pub struct GradientPenalty {
    /// Unscaled `mean_i (||g_i|| - 1)^2`
    pub value: f32,
    /// Mean input-gradient norm over the batch
    pub mean_slope: f32,
    /// Scalar equal to `coefficient * value` whose parameter gradient is the
    /// penalty's
    pub term: Tensor,
}

/// `eps_i * real_i + (1 - eps_i) * fake_i` with `eps_i ~ U[0, 1)` per example.
///
/// The result is a fresh leaf that records its own gradient.
pub fn interpolate(real: &Tensor, fake: &Tensor, ctx: &mut Context) -> Result<Tensor> {
    if real.shape() != fake.shape() {
        return Err(Error::shape(real.shape(), fake.shape()));
    }
    let batch = real.shape().first().copied().unwrap_or(0);
    if batch == 0 {
        return Err(Error::Config("cannot interpolate an empty batch".into()));
    }
    let per_example = real.len() / batch;
    let eps = ctx.uniform(batch);

    let data: Vec<f32> = real
        .as_slice()
        .chunks(per_example)
        .zip(fake.as_slice().chunks(per_example))
        .zip(eps.iter())
        .flat_map(|((r, f), &e)| r.iter().zip(f).map(move |(&r, &f)| e * r + (1.0 - e) * f))
        .collect();
    Tensor::from_shape_vec(real.shape(), data, true)
}

/// Run `f` and restore the gradients of `critic`'s parameters afterwards
fn preserving_grads<C: Critic, T>(critic: &C, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let saved: Vec<Option<Array1<f32>>> = critic.parameters().iter().map(|p| p.grad()).collect();
    let result = f();
    for (param, grad) in critic.parameters().into_iter().zip(saved) {
        match grad {
            Some(grad) => param.set_grad(grad),
            None => param.zero_grad(),
        }
    }
    result
}

/// Gradient penalty of `critic` at random interpolates of `real` and `fake`,
/// scaled by `coefficient`.
///
/// Gradients already accumulated on the critic parameters are left as they were.
pub fn gradient_penalty<C: Critic>(
    critic: &C,
    real: &Tensor,
    fake: &Tensor,
    coefficient: f32,
    ctx: &mut Context,
) -> Result<GradientPenalty> {
    let inter = interpolate(real, fake, ctx)?;
    let batch = inter.shape()[0];
    let per_example = inter.len() / batch;

    let input_grad = preserving_grads(critic, || {
        let mut total = sum(&critic.score(&inter)?);
        backward(&mut total, None);
        Ok(inter.grad().unwrap_or_else(|| Array1::zeros(inter.len())))
    })?;
    let input_grad = input_grad.as_slice().expect("gradient is contiguous");

    let slopes: Vec<f32> = input_grad
        .chunks(per_example)
        .map(|g| (SLOPE_EPS + g.iter().map(|v| v * v).sum::<f32>()).sqrt())
        .collect();
    let value = slopes.iter().map(|s| (s - 1.0) * (s - 1.0)).sum::<f32>() / batch as f32;
    let mean_slope = slopes.iter().sum::<f32>() / batch as f32;

    // Probe points x ± h u along each example's gradient direction
    let mut plus = Vec::with_capacity(inter.len());
    let mut minus = Vec::with_capacity(inter.len());
    for ((x, g), &slope) in
        inter.as_slice().chunks(per_example).zip(input_grad.chunks(per_example)).zip(&slopes)
    {
        for (&x, &g) in x.iter().zip(g) {
            let step = DIRECTION_STEP * g / slope;
            plus.push(x + step);
            minus.push(x - step);
        }
    }
    let plus = Tensor::from_shape_vec(inter.shape(), plus, false)?;
    let minus = Tensor::from_shape_vec(inter.shape(), minus, false)?;

    let weights: Vec<f32> = slopes
        .iter()
        .map(|s| coefficient * 2.0 * (s - 1.0) / batch as f32 / (2.0 * DIRECTION_STEP))
        .collect();
    let weights = Tensor::from_vec(weights, false);

    let difference = sub(&critic.score(&plus)?, &critic.score(&minus)?);
    let surrogate = sum(&mul(&reshape(&difference, &[batch])?, &weights));
    let term = add_scalar(&surrogate, coefficient * value - surrogate.item());

    Ok(GradientPenalty { value, mean_slope, term })
}
