//! 3-D convolution and transposed convolution on channels-last tensors
//!
//! Tensors are laid out `[batch, depth, height, width, channels]`. Both ops are
//! expressed over one geometry relating a "large" grid to a "small" grid:
//! a convolution maps large to small, its transpose maps small to large, and
//! each op's input gradient is the other op's forward kernel.

use crate::autograd::{BackwardOp, GradCell, Tensor};
use crate::error::{Error, Result};
use ndarray::Array1;
use rayon::prelude::*;
use std::rc::Rc;

/// Spatial padding mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Padding {
    /// No padding; only full windows
    Valid,
    /// Pad so that each output axis is `ceil(input / stride)` (convolution)
    /// or `input * stride` (transposed convolution)
    Same,
}

/// Index relation between the large and small grids.
///
/// Small position `o` and kernel tap `k` touch large position `o * stride + k - pad`
/// on every axis, when that position is inside the large grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ConvGeometry {
    pub batch: usize,
    pub large: [usize; 3],
    pub small: [usize; 3],
    pub kernel: [usize; 3],
    pub stride: [usize; 3],
    pub pad: [usize; 3],
    pub large_channels: usize,
    pub small_channels: usize,
}

impl ConvGeometry {
    fn taps(&self) -> usize {
        self.kernel.iter().product()
    }

    fn small_rows(&self) -> usize {
        self.batch * self.small.iter().product::<usize>()
    }

    fn large_rows(&self) -> usize {
        self.batch * self.large.iter().product::<usize>()
    }

    fn weight_len(&self) -> usize {
        self.taps() * self.large_channels * self.small_channels
    }

    fn tap(&self, t: usize) -> [usize; 3] {
        let [_, kh, kw] = self.kernel;
        [t / (kh * kw), (t / kw) % kh, t % kw]
    }

    fn split(row: usize, grid: [usize; 3]) -> (usize, [usize; 3]) {
        let [d, h, w] = grid;
        let spatial = d * h * w;
        let r = row % spatial;
        (row / spatial, [r / (h * w), (r / w) % h, r % w])
    }

    fn row(b: usize, pos: [usize; 3], grid: [usize; 3]) -> usize {
        let [d, h, w] = grid;
        ((b * d + pos[0]) * h + pos[1]) * w + pos[2]
    }

    fn large_of(&self, o: [usize; 3], k: [usize; 3]) -> Option<[usize; 3]> {
        let mut pos = [0; 3];
        for axis in 0..3 {
            let p = (o[axis] * self.stride[axis] + k[axis]).checked_sub(self.pad[axis])?;
            if p >= self.large[axis] {
                return None;
            }
            pos[axis] = p;
        }
        Some(pos)
    }

    fn small_of(&self, pos: [usize; 3], k: [usize; 3]) -> Option<[usize; 3]> {
        let mut o = [0; 3];
        for axis in 0..3 {
            let t = (pos[axis] + self.pad[axis]).checked_sub(k[axis])?;
            if t % self.stride[axis] != 0 || t / self.stride[axis] >= self.small[axis] {
                return None;
            }
            o[axis] = t / self.stride[axis];
        }
        Some(o)
    }
}

/// Small-grid values: `small[o, cs] = Σ_k Σ_cl large[o*s+k-p, cl] * w[k, cl, cs]`
pub(crate) fn reduce_to_small(g: &ConvGeometry, large: &[f32], weight: &[f32]) -> Vec<f32> {
    let (lc, sc) = (g.large_channels, g.small_channels);
    let mut out = vec![0.0f32; g.small_rows() * sc];
    if sc == 0 {
        return out;
    }
    out.par_chunks_mut(sc).enumerate().for_each(|(row, acc)| {
        let (b, o) = ConvGeometry::split(row, g.small);
        for t in 0..g.taps() {
            let Some(pos) = g.large_of(o, g.tap(t)) else { continue };
            let base = ConvGeometry::row(b, pos, g.large) * lc;
            let w_tap = &weight[t * lc * sc..(t + 1) * lc * sc];
            for (cl, &x) in large[base..base + lc].iter().enumerate() {
                // piano rolls are mostly silent
                if x == 0.0 {
                    continue;
                }
                for (a, &w) in acc.iter_mut().zip(&w_tap[cl * sc..(cl + 1) * sc]) {
                    *a += x * w;
                }
            }
        }
    });
    out
}

/// Large-grid values, the adjoint of [`reduce_to_small`]
pub(crate) fn expand_to_large(g: &ConvGeometry, small: &[f32], weight: &[f32]) -> Vec<f32> {
    let (lc, sc) = (g.large_channels, g.small_channels);
    let mut out = vec![0.0f32; g.large_rows() * lc];
    if lc == 0 {
        return out;
    }
    out.par_chunks_mut(lc).enumerate().for_each(|(row, acc)| {
        let (b, pos) = ConvGeometry::split(row, g.large);
        for t in 0..g.taps() {
            let Some(o) = g.small_of(pos, g.tap(t)) else { continue };
            let base = ConvGeometry::row(b, o, g.small) * sc;
            let src = &small[base..base + sc];
            let w_tap = &weight[t * lc * sc..(t + 1) * lc * sc];
            for (cl, a) in acc.iter_mut().enumerate() {
                let w_row = &w_tap[cl * sc..(cl + 1) * sc];
                *a += src.iter().zip(w_row).map(|(&s, &w)| s * w).sum::<f32>();
            }
        }
    });
    out
}

/// `dw[k, cl, cs] = Σ_b Σ_o large[o*s+k-p, cl] * small[o, cs]`
pub(crate) fn weight_grad(g: &ConvGeometry, large: &[f32], small: &[f32]) -> Vec<f32> {
    let (lc, sc) = (g.large_channels, g.small_channels);
    let mut out = vec![0.0f32; g.weight_len()];
    if lc * sc == 0 {
        return out;
    }
    out.par_chunks_mut(lc * sc).enumerate().for_each(|(t, acc)| {
        let k = g.tap(t);
        for row in 0..g.small_rows() {
            let (b, o) = ConvGeometry::split(row, g.small);
            let Some(pos) = g.large_of(o, k) else { continue };
            let x = &large[ConvGeometry::row(b, pos, g.large) * lc..][..lc];
            let gy = &small[row * sc..(row + 1) * sc];
            for (cl, &xv) in x.iter().enumerate() {
                if xv == 0.0 {
                    continue;
                }
                for (a, &gv) in acc[cl * sc..(cl + 1) * sc].iter_mut().zip(gy) {
                    *a += xv * gv;
                }
            }
        }
    });
    out
}

fn add_bias(values: &mut [f32], bias: &[f32]) {
    if bias.is_empty() {
        return;
    }
    for row in values.chunks_mut(bias.len()) {
        for (v, &b) in row.iter_mut().zip(bias) {
            *v += b;
        }
    }
}

fn bias_grad(grad: &[f32], channels: usize) -> Array1<f32> {
    let mut out = Array1::zeros(channels);
    if channels > 0 {
        for row in grad.chunks(channels) {
            for (o, &g) in out.iter_mut().zip(row) {
                *o += g;
            }
        }
    }
    out
}

fn check_operands(op: &str, input: &Tensor, weight: &Tensor, stride: [usize; 3]) -> Result<()> {
    if input.ndim() != 5 || weight.ndim() != 5 {
        return Err(Error::Config(format!(
            "{op}: expected 5-D input and weight, got {:?} and {:?}",
            input.shape(),
            weight.shape()
        )));
    }
    if stride.contains(&0) || weight.shape()[..3].contains(&0) {
        return Err(Error::Config(format!("{op}: zero stride or kernel extent")));
    }
    Ok(())
}

fn check_bias(bias: Option<&Tensor>, channels: usize) -> Result<()> {
    match bias {
        Some(bias) if bias.len() != channels => Err(Error::shape(&[channels], bias.shape())),
        _ => Ok(()),
    }
}

fn spatial(shape: &[usize]) -> [usize; 3] {
    [shape[1], shape[2], shape[3]]
}

/// Geometry of a convolution over `input` with kernel `[kd, kh, kw, in, out]`
pub(crate) fn conv_geometry(
    input: &[usize],
    weight: &[usize],
    stride: [usize; 3],
    padding: Padding,
) -> Result<ConvGeometry> {
    if input[4] != weight[3] {
        return Err(Error::shape(&[input[0], input[1], input[2], input[3], weight[3]], input));
    }
    let large = spatial(input);
    let kernel = [weight[0], weight[1], weight[2]];
    let mut small = [0; 3];
    let mut pad = [0; 3];
    for axis in 0..3 {
        match padding {
            Padding::Valid => {
                if large[axis] < kernel[axis] {
                    return Err(Error::Config(format!(
                        "conv3d: input extent {} is smaller than kernel extent {} on axis {}",
                        large[axis],
                        kernel[axis],
                        axis + 1
                    )));
                }
                small[axis] = (large[axis] - kernel[axis]) / stride[axis] + 1;
            }
            Padding::Same => {
                small[axis] = large[axis].div_ceil(stride[axis]);
                let total = (small[axis].saturating_sub(1) * stride[axis] + kernel[axis])
                    .saturating_sub(large[axis]);
                pad[axis] = total / 2;
            }
        }
    }
    Ok(ConvGeometry {
        batch: input[0],
        large,
        small,
        kernel,
        stride,
        pad,
        large_channels: weight[3],
        small_channels: weight[4],
    })
}

/// Geometry of a transposed convolution over `input` with kernel `[kd, kh, kw, out, in]`
pub(crate) fn transpose_geometry(
    input: &[usize],
    weight: &[usize],
    stride: [usize; 3],
    padding: Padding,
) -> Result<ConvGeometry> {
    if input[4] != weight[4] {
        return Err(Error::shape(&[input[0], input[1], input[2], input[3], weight[4]], input));
    }
    let small = spatial(input);
    let kernel = [weight[0], weight[1], weight[2]];
    let mut large = [0; 3];
    let mut pad = [0; 3];
    for axis in 0..3 {
        match padding {
            Padding::Valid => {
                large[axis] =
                    small[axis] * stride[axis] + kernel[axis].saturating_sub(stride[axis]);
            }
            Padding::Same => {
                large[axis] = small[axis] * stride[axis];
                let total = (small[axis].saturating_sub(1) * stride[axis] + kernel[axis])
                    .saturating_sub(large[axis]);
                pad[axis] = total / 2;
            }
        }
    }
    Ok(ConvGeometry {
        batch: input[0],
        large,
        small,
        kernel,
        stride,
        pad,
        large_channels: weight[3],
        small_channels: weight[4],
    })
}

/// 3-D convolution.
///
/// `input` is `[B, D, H, W, C_in]`, `weight` is `[kd, kh, kw, C_in, C_out]`,
/// the result is `[B, D', H', W', C_out]`.
pub fn conv3d(
    input: &Tensor,
    weight: &Tensor,
    bias: Option<&Tensor>,
    stride: [usize; 3],
    padding: Padding,
) -> Result<Tensor> {
    check_operands("conv3d", input, weight, stride)?;
    let g = conv_geometry(input.shape(), weight.shape(), stride, padding)?;
    check_bias(bias, g.small_channels)?;

    let mut data = reduce_to_small(&g, input.as_slice(), weight.as_slice());
    if let Some(bias) = bias {
        add_bias(&mut data, bias.as_slice());
    }
    let shape = vec![g.batch, g.small[0], g.small[1], g.small[2], g.small_channels];
    Ok(attach(input, weight, bias, g, false, data, shape))
}

/// Transposed 3-D convolution.
///
/// `input` is `[B, D, H, W, C_in]`, `weight` is `[kd, kh, kw, C_out, C_in]`,
/// the result is `[B, D', H', W', C_out]`.
pub fn conv3d_transpose(
    input: &Tensor,
    weight: &Tensor,
    bias: Option<&Tensor>,
    stride: [usize; 3],
    padding: Padding,
) -> Result<Tensor> {
    check_operands("conv3d_transpose", input, weight, stride)?;
    let g = transpose_geometry(input.shape(), weight.shape(), stride, padding)?;
    check_bias(bias, g.large_channels)?;

    let mut data = expand_to_large(&g, input.as_slice(), weight.as_slice());
    if let Some(bias) = bias {
        add_bias(&mut data, bias.as_slice());
    }
    let shape = vec![g.batch, g.large[0], g.large[1], g.large[2], g.large_channels];
    Ok(attach(input, weight, bias, g, true, data, shape))
}

fn attach(
    input: &Tensor,
    weight: &Tensor,
    bias: Option<&Tensor>,
    geometry: ConvGeometry,
    transposed: bool,
    data: Vec<f32>,
    shape: Vec<usize>,
) -> Tensor {
    let requires_grad = input.requires_grad()
        || weight.requires_grad()
        || bias.is_some_and(Tensor::requires_grad);
    let mut result = Tensor::from_array(Array1::from(data), shape, requires_grad);

    if requires_grad {
        let backward_op = Rc::new(ConvBackward {
            input: input.clone(),
            weight: weight.clone(),
            bias: bias.cloned(),
            geometry,
            transposed,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    result
}

struct ConvBackward {
    input: Tensor,
    weight: Tensor,
    bias: Option<Tensor>,
    geometry: ConvGeometry,
    transposed: bool,
    result_grad: GradCell,
}

impl BackwardOp for ConvBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            let grad = grad.as_slice().expect("gradient is contiguous");
            let g = &self.geometry;
            let w = self.weight.as_slice();

            if self.input.requires_grad() {
                let grad_in = if self.transposed {
                    reduce_to_small(g, grad, w)
                } else {
                    expand_to_large(g, grad, w)
                };
                self.input.accumulate_grad(Array1::from(grad_in));
            }

            if self.weight.requires_grad() {
                let x = self.input.as_slice();
                let grad_w =
                    if self.transposed { weight_grad(g, grad, x) } else { weight_grad(g, x, grad) };
                self.weight.accumulate_grad(Array1::from(grad_w));
            }

            if let Some(bias) = self.bias.as_ref().filter(|b| b.requires_grad()) {
                bias.accumulate_grad(bias_grad(grad, bias.len()));
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        let mut inputs = vec![self.input.clone(), self.weight.clone()];
        inputs.extend(self.bias.clone());
        inputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autograd::backward;

    fn ramp(shape: &[usize], requires_grad: bool) -> Tensor {
        let len = shape.iter().product();
        let data = (0..len).map(|i| ((i % 7) as f32 - 3.0) * 0.25).collect();
        Tensor::from_shape_vec(shape, data, requires_grad).unwrap()
    }

    #[test]
    fn test_valid_conv_output_shape() {
        let x = ramp(&[2, 4, 96, 84, 1], false);
        let w = ramp(&[1, 1, 12, 1, 32], false);
        let y = conv3d(&x, &w, None, [1, 1, 12], Padding::Valid).unwrap();
        assert_eq!(y.shape(), &[2, 4, 96, 7, 32]);
    }

    #[test]
    fn test_same_conv_keeps_extent() {
        let x = ramp(&[1, 1, 6, 12, 1], false);
        let w = ramp(&[1, 3, 12, 1, 2], false);
        let y = conv3d(&x, &w, None, [1, 1, 1], Padding::Same).unwrap();
        assert_eq!(y.shape(), &[1, 1, 6, 12, 2]);
    }

    #[test]
    fn test_transposed_output_extent() {
        let x = ramp(&[1, 3, 1, 1, 4], false);
        let w = ramp(&[2, 1, 1, 8, 4], false);
        let y = conv3d_transpose(&x, &w, None, [1, 1, 1], Padding::Valid).unwrap();
        assert_eq!(y.shape(), &[1, 4, 1, 1, 8]);

        let w = ramp(&[1, 4, 1, 8, 4], false);
        let y = conv3d_transpose(&x, &w, None, [1, 4, 1], Padding::Valid).unwrap();
        assert_eq!(y.shape(), &[1, 3, 4, 1, 8]);
    }

    #[test]
    fn test_identity_kernel_copies_input() {
        let x = ramp(&[1, 2, 3, 4, 1], false);
        let w = Tensor::ones_shaped(&[1, 1, 1, 1, 1], false);
        let y = conv3d(&x, &w, None, [1, 1, 1], Padding::Valid).unwrap();
        assert_eq!(y.data(), x.data());
        let z = conv3d_transpose(&x, &w, None, [1, 1, 1], Padding::Valid).unwrap();
        assert_eq!(z.data(), x.data());
    }

    #[test]
    fn test_conv_and_transpose_are_adjoint() {
        // <conv(x), y> == <x, conv_transpose(y)> for the same kernel
        let x = ramp(&[2, 2, 6, 6, 3], false);
        let w = ramp(&[1, 3, 2, 3, 4], false);
        let cx = conv3d(&x, &w, None, [1, 3, 2], Padding::Valid).unwrap();
        let y = ramp(cx.shape(), false);
        let ty = conv3d_transpose(&y, &w, None, [1, 3, 2], Padding::Valid).unwrap();
        assert_eq!(ty.shape()[..4], x.shape()[..4]);
        let lhs: f32 = cx.data().iter().zip(y.data()).map(|(a, b)| a * b).sum();
        let rhs: f32 = x.data().iter().zip(ty.data()).map(|(a, b)| a * b).sum();
        approx::assert_relative_eq!(lhs, rhs, epsilon = 1e-3);
    }

    #[test]
    fn test_bias_gradient_counts_positions() {
        let x = ramp(&[1, 1, 4, 4, 1], true);
        let w = ramp(&[1, 2, 2, 1, 2], true);
        let b = Tensor::zeros(2, true);
        let mut y = conv3d(&x, &w, Some(&b), [1, 2, 2], Padding::Valid).unwrap();
        assert_eq!(y.shape(), &[1, 1, 2, 2, 2]);
        backward(&mut y, None);
        assert_eq!(b.grad().unwrap().to_vec(), vec![4.0, 4.0]);
        assert!(x.grad().is_some());
        assert!(w.grad().is_some());
    }

    #[test]
    fn test_channel_mismatch_is_shape_error() {
        let x = ramp(&[1, 1, 4, 4, 2], false);
        let w = ramp(&[1, 1, 1, 3, 1], false);
        assert!(matches!(
            conv3d(&x, &w, None, [1, 1, 1], Padding::Valid),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_kernel_larger_than_input_is_rejected() {
        let x = ramp(&[1, 1, 2, 2, 1], false);
        let w = ramp(&[1, 3, 1, 1, 1], false);
        assert!(conv3d(&x, &w, None, [1, 1, 1], Padding::Valid).is_err());
    }
}
