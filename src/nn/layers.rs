//! Parameter-owning layers

use super::init::{filled, glorot_normal, glorot_uniform};
use super::Module;
use crate::autograd::{
    batch_norm, channel_stats, conv3d, conv3d_transpose, embedding, linear, BatchStats, Context,
    Padding, Tensor,
};
use crate::error::Result;

/// Running-statistics decay of [`BatchNorm`]
pub const BATCH_NORM_MOMENTUM: f32 = 0.99;
/// Variance floor of [`BatchNorm`]
pub const BATCH_NORM_EPS: f32 = 1e-3;

/// Fully-connected layer, weight `[in, out]`
pub struct Dense {
    pub weight: Tensor,
    pub bias: Tensor,
}

impl Dense {
    pub fn new(inputs: usize, outputs: usize, ctx: &mut Context) -> Self {
        Self { weight: glorot_uniform(&[inputs, outputs], ctx), bias: filled(&[outputs], 0.0) }
    }

    /// `x [rows, in]` -> `[rows, out]`
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        linear(x, &self.weight, &self.bias)
    }

    pub fn outputs(&self) -> usize {
        self.bias.len()
    }
}

impl Module for Dense {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        vec![("weight".into(), &self.weight), ("bias".into(), &self.bias)]
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        vec![("weight".into(), &mut self.weight), ("bias".into(), &mut self.bias)]
    }
}

/// 3-D convolution over `[B, D, H, W, C]`, weight `[kd, kh, kw, in, out]`
pub struct Conv3d {
    pub weight: Tensor,
    pub bias: Tensor,
    stride: [usize; 3],
    padding: Padding,
}

impl Conv3d {
    pub fn new(
        kernel: [usize; 3],
        in_channels: usize,
        out_channels: usize,
        stride: [usize; 3],
        padding: Padding,
        ctx: &mut Context,
    ) -> Self {
        let [kd, kh, kw] = kernel;
        Self {
            weight: glorot_uniform(&[kd, kh, kw, in_channels, out_channels], ctx),
            bias: filled(&[out_channels], 0.0),
            stride,
            padding,
        }
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        conv3d(x, &self.weight, Some(&self.bias), self.stride, self.padding)
    }
}

impl Module for Conv3d {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        vec![("weight".into(), &self.weight), ("bias".into(), &self.bias)]
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        vec![("weight".into(), &mut self.weight), ("bias".into(), &mut self.bias)]
    }
}

/// Transposed 3-D convolution, weight `[kd, kh, kw, out, in]`, valid padding
pub struct ConvTranspose3d {
    pub weight: Tensor,
    pub bias: Tensor,
    stride: [usize; 3],
}

impl ConvTranspose3d {
    pub fn new(
        kernel: [usize; 3],
        in_channels: usize,
        out_channels: usize,
        stride: [usize; 3],
        ctx: &mut Context,
    ) -> Self {
        let [kd, kh, kw] = kernel;
        Self {
            weight: glorot_uniform(&[kd, kh, kw, out_channels, in_channels], ctx),
            bias: filled(&[out_channels], 0.0),
            stride,
        }
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        conv3d_transpose(x, &self.weight, Some(&self.bias), self.stride, Padding::Valid)
    }
}

impl Module for ConvTranspose3d {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        vec![("weight".into(), &self.weight), ("bias".into(), &self.bias)]
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        vec![("weight".into(), &mut self.weight), ("bias".into(), &mut self.bias)]
    }
}

/// Batch normalization over the last axis.
///
/// In training mode the batch statistics normalise the input and are folded
/// into the running averages; in evaluation mode the running averages are
/// used as constants.
pub struct BatchNorm {
    pub gamma: Tensor,
    pub beta: Tensor,
    pub running_mean: Tensor,
    pub running_var: Tensor,
}

impl BatchNorm {
    pub fn new(channels: usize) -> Self {
        Self {
            gamma: filled(&[channels], 1.0),
            beta: filled(&[channels], 0.0),
            running_mean: Tensor::zeros(channels, false),
            running_var: Tensor::ones_shaped(&[channels], false),
        }
    }

    pub fn forward(&mut self, x: &Tensor, ctx: &Context) -> Result<Tensor> {
        if ctx.is_training() {
            let stats = channel_stats(x)?;
            let y = batch_norm(x, &self.gamma, &self.beta, &stats, BATCH_NORM_EPS, true)?;
            fold_into(&mut self.running_mean, &stats.mean);
            fold_into(&mut self.running_var, &stats.var);
            Ok(y)
        } else {
            let stats = BatchStats {
                mean: self.running_mean.data().clone(),
                var: self.running_var.data().clone(),
            };
            batch_norm(x, &self.gamma, &self.beta, &stats, BATCH_NORM_EPS, false)
        }
    }
}

fn fold_into(running: &mut Tensor, batch: &ndarray::Array1<f32>) {
    running.data_mut().zip_mut_with(batch, |r, &b| {
        *r = BATCH_NORM_MOMENTUM * *r + (1.0 - BATCH_NORM_MOMENTUM) * b;
    });
}

impl Module for BatchNorm {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        vec![
            ("gamma".into(), &self.gamma),
            ("beta".into(), &self.beta),
            ("running_mean".into(), &self.running_mean),
            ("running_var".into(), &self.running_var),
        ]
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        vec![
            ("gamma".into(), &mut self.gamma),
            ("beta".into(), &mut self.beta),
            ("running_mean".into(), &mut self.running_mean),
            ("running_var".into(), &mut self.running_var),
        ]
    }
}

/// Lookup table `[num_embeddings, dim]`, Glorot-normal initialised
pub struct Embedding {
    pub table: Tensor,
}

impl Embedding {
    pub fn new(num_embeddings: usize, dim: usize, ctx: &mut Context) -> Self {
        Self { table: glorot_normal(&[num_embeddings, dim], ctx) }
    }

    pub fn dim(&self) -> usize {
        self.table.shape()[1]
    }

    pub fn forward(&self, ids: &[usize]) -> Result<Tensor> {
        embedding(&self.table, ids)
    }
}

impl Module for Embedding {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        vec![("table".into(), &self.table)]
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        vec![("table".into(), &mut self.table)]
    }
}
