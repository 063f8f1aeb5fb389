//! Activation function autograd operations: relu, leaky_relu, sigmoid, softmax

use crate::autograd::{BackwardOp, GradCell, Tensor};
use crate::error::{Error, Result};
use ndarray::Array1;
use std::rc::Rc;

/// Logistic function
#[inline]
pub fn sigmoid_scalar(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// ReLU activation
pub fn relu(a: &Tensor) -> Tensor {
    leaky_relu(a, 0.0)
}

/// Leaky ReLU: `x` for positive inputs, `alpha * x` otherwise
pub fn leaky_relu(a: &Tensor, alpha: f32) -> Tensor {
    let data = a.data().mapv(|x| if x > 0.0 { x } else { alpha * x });
    let requires_grad = a.requires_grad();

    let mut result = Tensor::from_array(data, a.shape().to_vec(), requires_grad);

    if requires_grad {
        let backward_op =
            Rc::new(LeakyReluBackward { a: a.clone(), alpha, result_grad: result.grad_cell() });
        result.set_backward_op(backward_op);
    }

    result
}

struct LeakyReluBackward {
    a: Tensor,
    alpha: f32,
    result_grad: GradCell,
}

impl BackwardOp for LeakyReluBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂L/∂a = ∂L/∂out * (1 if a > 0 else alpha)
                let alpha = self.alpha;
                let slope = self.a.data().mapv(|x| if x > 0.0 { 1.0 } else { alpha });
                self.a.accumulate_grad(grad * &slope);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Sigmoid activation with its true derivative
pub fn sigmoid(a: &Tensor) -> Tensor {
    let data = a.data().mapv(sigmoid_scalar);
    let requires_grad = a.requires_grad();

    let mut result = Tensor::from_array(data, a.shape().to_vec(), requires_grad);

    if requires_grad {
        let backward_op = Rc::new(SigmoidBackward {
            a: a.clone(),
            output: result.data().clone(),
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct SigmoidBackward {
    a: Tensor,
    output: Array1<f32>,
    result_grad: GradCell,
}

impl BackwardOp for SigmoidBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂σ/∂x = σ(x) * (1 - σ(x))
                let local = self.output.mapv(|s| s * (1.0 - s));
                self.a.accumulate_grad(grad * &local);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}

/// Softmax over the last axis of a `[rows, classes]` tensor
pub fn softmax_rows(a: &Tensor) -> Result<Tensor> {
    if a.ndim() != 2 {
        return Err(Error::Config(format!(
            "softmax_rows expects [rows, classes], got {:?}",
            a.shape()
        )));
    }
    let classes = a.shape()[1];
    let mut data = a.data().clone();
    if let Some(values) = data.as_slice_mut() {
        for row in values.chunks_mut(classes.max(1)) {
            let max_val = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let mut sum_exp = 0.0;
            for v in row.iter_mut() {
                *v = (*v - max_val).exp();
                sum_exp += *v;
            }
            for v in row.iter_mut() {
                *v /= sum_exp;
            }
        }
    }

    let requires_grad = a.requires_grad();
    let mut result = Tensor::from_array(data, a.shape().to_vec(), requires_grad);

    if requires_grad {
        let backward_op = Rc::new(SoftmaxRowsBackward {
            a: a.clone(),
            output: result.data().clone(),
            classes,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    Ok(result)
}

struct SoftmaxRowsBackward {
    a: Tensor,
    output: Array1<f32>,
    classes: usize,
    result_grad: GradCell,
}

impl BackwardOp for SoftmaxRowsBackward {
    fn backward(&self) {
        if let Some(grad_output) = self.result_grad.borrow().as_ref() {
            if self.a.requires_grad() {
                // ∂L/∂x_i = y_i * (∂L/∂y_i - Σ_j ∂L/∂y_j * y_j), per row
                let mut grad_a = Vec::with_capacity(self.output.len());
                for (y, g) in self
                    .output
                    .as_slice()
                    .expect("softmax output is contiguous")
                    .chunks(self.classes.max(1))
                    .zip(
                        grad_output
                            .as_slice()
                            .expect("gradient is contiguous")
                            .chunks(self.classes.max(1)),
                    )
                {
                    let dot: f32 = y.iter().zip(g).map(|(&yi, &gi)| yi * gi).sum();
                    grad_a.extend(y.iter().zip(g).map(|(&yi, &gi)| yi * (gi - dot)));
                }
                self.a.accumulate_grad(Array1::from(grad_a));
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.a.clone()]
    }
}
