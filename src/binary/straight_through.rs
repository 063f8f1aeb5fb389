//! Straight-through binary neurons
//!
//! The binarisation step (`ceil(p - u)` or `round(p)`) is treated as identity
//! on the backward pass. See Bengio et al., "Estimating or Propagating
//! Gradients Through Stochastic Neurons" (arXiv:1308.3432) and the slope
//! annealing trick of Chung et al. (arXiv:1609.01704).

use super::{BinaryEstimator, BinaryOutput, SamplingMode};
use crate::autograd::{scale, sigmoid, sigmoid_scalar, BackwardOp, Context, GradCell, Tensor};
use crate::error::Result;
use ndarray::Array1;
use std::rc::Rc;

/// Output `values` in the forward pass, gradient of `input` passed unchanged
fn with_identity_grad(input: &Tensor, values: Array1<f32>) -> Tensor {
    let requires_grad = input.requires_grad();
    let mut result = Tensor::from_array(values, input.shape().to_vec(), requires_grad);

    if requires_grad {
        let backward_op =
            Rc::new(IdentityBackward { input: input.clone(), result_grad: result.grad_cell() });
        result.set_backward_op(backward_op);
    }

    result
}

struct IdentityBackward {
    input: Tensor,
    result_grad: GradCell,
}

impl BackwardOp for IdentityBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.input.requires_grad() {
                self.input.accumulate_grad(grad.clone());
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.input.clone()]
    }
}

/// Sigmoid whose gradient is the identity
pub fn pass_through_sigmoid(x: &Tensor) -> Tensor {
    with_identity_grad(x, x.data().mapv(sigmoid_scalar))
}

/// `ceil(p - u)` with `u ~ U[0, 1)`: 1 with probability `p`, identity gradient
pub fn bernoulli_sample(p: &Tensor, ctx: &mut Context) -> Tensor {
    let u = ctx.uniform(p.len());
    let values =
        ndarray::Zip::from(p.data()).and(&u).map_collect(|&p, &u| if p > u { 1.0 } else { 0.0 });
    with_identity_grad(p, values)
}

/// Threshold at 0.5, identity gradient
pub fn binary_round(p: &Tensor) -> Tensor {
    with_identity_grad(p, p.data().mapv(|v| if v > 0.5 { 1.0 } else { 0.0 }))
}

/// Straight-through estimator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StraightThrough {
    pass_through: bool,
    slope: f32,
}

impl StraightThrough {
    /// With `pass_through` the sigmoid's gradient is the identity; otherwise
    /// `p = sigmoid(slope * x)` keeps its true derivative
    pub fn new(pass_through: bool, slope: f32) -> Self {
        Self { pass_through, slope }
    }

    pub fn slope(&self) -> f32 {
        self.slope
    }

    pub fn set_slope(&mut self, slope: f32) {
        self.slope = slope;
    }

    pub fn pass_through(&self) -> bool {
        self.pass_through
    }
}

impl BinaryEstimator for StraightThrough {
    fn forward(&self, logits: &Tensor, mode: SamplingMode, ctx: &mut Context) -> Result<BinaryOutput> {
        let probabilities = if self.pass_through {
            pass_through_sigmoid(logits)
        } else {
            sigmoid(&scale(logits, self.slope))
        };

        let values = match mode {
            SamplingMode::Stochastic => bernoulli_sample(&probabilities, ctx),
            SamplingMode::Deterministic => binary_round(&probabilities),
        };

        Ok(BinaryOutput { values, probabilities })
    }
}
