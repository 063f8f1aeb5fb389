//! Batch normalization over the channel (last) axis

use crate::autograd::{BackwardOp, GradCell, Tensor};
use crate::error::{Error, Result};
use ndarray::Array1;
use std::rc::Rc;

/// Per-channel statistics of a batch
#[derive(Debug, Clone)]
pub struct BatchStats {
    pub mean: Array1<f32>,
    pub var: Array1<f32>,
}

/// Per-channel mean and biased variance over every position but the last axis
pub fn channel_stats(x: &Tensor) -> Result<BatchStats> {
    let channels = last_axis(x)?;
    let rows = (x.len() / channels.max(1)).max(1) as f32;
    let mut mean = Array1::<f32>::zeros(channels);
    let mut var = Array1::<f32>::zeros(channels);
    for row in x.as_slice().chunks(channels.max(1)) {
        for (m, &v) in mean.iter_mut().zip(row) {
            *m += v;
        }
    }
    mean /= rows;
    for row in x.as_slice().chunks(channels.max(1)) {
        for ((s, &v), &m) in var.iter_mut().zip(row).zip(mean.iter()) {
            *s += (v - m) * (v - m);
        }
    }
    var /= rows;
    Ok(BatchStats { mean, var })
}

fn last_axis(x: &Tensor) -> Result<usize> {
    x.shape()
        .last()
        .copied()
        .ok_or_else(|| Error::Config("batch_norm: scalar input has no channel axis".into()))
}

/// Normalize `x` with the given statistics, then scale by `gamma` and shift by `beta`.
///
/// When `batch_stats` is true the statistics are taken to be those of `x`
/// itself and the gradient flows through them (training mode); otherwise
/// they are constants (running statistics, evaluation mode).
pub fn batch_norm(
    x: &Tensor,
    gamma: &Tensor,
    beta: &Tensor,
    stats: &BatchStats,
    eps: f32,
    batch_stats: bool,
) -> Result<Tensor> {
    let channels = last_axis(x)?;
    for param in [gamma, beta] {
        if param.len() != channels {
            return Err(Error::shape(&[channels], param.shape()));
        }
    }
    if stats.mean.len() != channels || stats.var.len() != channels {
        return Err(Error::shape(&[channels], &[stats.mean.len()]));
    }

    let inv_std = stats.var.mapv(|v| 1.0 / (v + eps).sqrt());
    let mut normalized = Vec::with_capacity(x.len());
    let mut data = Vec::with_capacity(x.len());
    for row in x.as_slice().chunks(channels.max(1)) {
        for (c, &v) in row.iter().enumerate() {
            let x_hat = (v - stats.mean[c]) * inv_std[c];
            normalized.push(x_hat);
            data.push(gamma.data()[c] * x_hat + beta.data()[c]);
        }
    }

    let requires_grad = x.requires_grad() || gamma.requires_grad() || beta.requires_grad();
    let mut result = Tensor::from_array(Array1::from(data), x.shape().to_vec(), requires_grad);

    if requires_grad {
        let backward_op = Rc::new(BatchNormBackward {
            x: x.clone(),
            gamma: gamma.clone(),
            beta: beta.clone(),
            normalized,
            inv_std,
            batch_stats,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    Ok(result)
}

struct BatchNormBackward {
    x: Tensor,
    gamma: Tensor,
    beta: Tensor,
    normalized: Vec<f32>,
    inv_std: Array1<f32>,
    batch_stats: bool,
    result_grad: GradCell,
}

impl BackwardOp for BatchNormBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            let grad = grad.as_slice().expect("gradient is contiguous");
            let channels = self.gamma.len().max(1);
            let rows = (grad.len() / channels).max(1) as f32;

            let mut grad_gamma = Array1::<f32>::zeros(channels);
            let mut grad_beta = Array1::<f32>::zeros(channels);
            for (g_row, n_row) in grad.chunks(channels).zip(self.normalized.chunks(channels)) {
                for c in 0..channels {
                    grad_gamma[c] += g_row[c] * n_row[c];
                    grad_beta[c] += g_row[c];
                }
            }

            if self.x.requires_grad() {
                let gamma = self.gamma.data();
                let mut grad_x = Vec::with_capacity(grad.len());
                for (g_row, n_row) in grad.chunks(channels).zip(self.normalized.chunks(channels)) {
                    for c in 0..channels {
                        let scale = gamma[c] * self.inv_std[c];
                        let value = if self.batch_stats {
                            // ∂L/∂x = γ/σ · (g - mean(g) - x̂ · mean(g · x̂))
                            scale
                                * (g_row[c]
                                    - grad_beta[c] / rows
                                    - n_row[c] * grad_gamma[c] / rows)
                        } else {
                            scale * g_row[c]
                        };
                        grad_x.push(value);
                    }
                }
                self.x.accumulate_grad(Array1::from(grad_x));
            }
            if self.gamma.requires_grad() {
                self.gamma.accumulate_grad(grad_gamma);
            }
            if self.beta.requires_grad() {
                self.beta.accumulate_grad(grad_beta);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.x.clone(), self.gamma.clone(), self.beta.clone()]
    }
}
