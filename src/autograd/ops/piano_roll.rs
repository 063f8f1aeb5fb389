//! Piano-roll feature ops: pitch-class (chroma) reduction and note onsets
//!
//! Both take channels-last rolls `[batch, bar, beat, pitch, track]`.

use super::basic::sum_axes;
use super::shape::reshape;
use crate::autograd::{BackwardOp, GradCell, Tensor};
use crate::error::{Error, Result};
use ndarray::Array1;
use std::rc::Rc;

/// Semitones per octave
pub const OCTAVE: usize = 12;

fn check_roll(op: &str, x: &Tensor) -> Result<[usize; 5]> {
    match *x.shape() {
        [b, d, h, w, c] => Ok([b, d, h, w, c]),
        _ => Err(Error::Config(format!(
            "{op} expects [batch, bar, beat, pitch, track], got {:?}",
            x.shape()
        ))),
    }
}

/// Sum each bar into `beat_groups` equal groups of beats and fold pitch modulo 12.
///
/// `[B, D, H, W, C]` becomes `[B, D, beat_groups, 12, C]`. The pitch axis must
/// hold whole octaves and the beat axis must split evenly into the groups.
pub fn chroma(x: &Tensor, beat_groups: usize) -> Result<Tensor> {
    let [b, d, h, w, c] = check_roll("chroma", x)?;
    if w % OCTAVE != 0 {
        return Err(Error::Config(format!(
            "chroma needs a pitch axis made of whole octaves, got {w} pitches"
        )));
    }
    if beat_groups == 0 || h % beat_groups != 0 {
        return Err(Error::Config(format!(
            "chroma cannot split {h} beats into {beat_groups} equal groups"
        )));
    }
    let grouped =
        reshape(x, &[b, d, beat_groups, h / beat_groups, w / OCTAVE, OCTAVE, c])?;
    sum_axes(&grouped, &[3, 4], false)
}

/// Rectified first difference along the beat axis, summed over pitch.
///
/// Within each bar `o[0] = x[0]` and `o[t] = max(x[t] - x[t-1], 0)`, so held
/// notes and silence produce no onsets. Returns `[B, D, H, 1, C]`.
pub fn onset(x: &Tensor) -> Result<Tensor> {
    let diff = onset_difference(x)?;
    sum_axes(&diff, &[3], true)
}

/// The per-pitch onset map `o` of [`onset`], before the pitch reduction
pub fn onset_difference(x: &Tensor) -> Result<Tensor> {
    let [_, _, h, w, c] = check_roll("onset", x)?;
    // elements between consecutive beats of the same bar
    let step = w * c;
    let bar = h * step;
    let values = x.as_slice();

    let mut data = Vec::with_capacity(values.len());
    let mut sources = Vec::with_capacity(values.len());
    for (i, &v) in values.iter().enumerate() {
        let (value, source) = if i % bar < step {
            (v, OnsetSource::FirstBeat)
        } else {
            let d = v - values[i - step];
            if d > 0.0 {
                (d, OnsetSource::Rise(i - step))
            } else {
                (0.0, OnsetSource::Clipped)
            }
        };
        data.push(value);
        sources.push(source);
    }

    let requires_grad = x.requires_grad();
    let mut result = Tensor::from_array(Array1::from(data), x.shape().to_vec(), requires_grad);

    if requires_grad {
        let backward_op = Rc::new(OnsetBackward {
            x: x.clone(),
            sources,
            result_grad: result.grad_cell(),
        });
        result.set_backward_op(backward_op);
    }

    Ok(result)
}

#[derive(Clone, Copy)]
enum OnsetSource {
    FirstBeat,
    Clipped,
    /// `x[i] - x[j]` with `j` the same pitch one beat earlier
    Rise(usize),
}

struct OnsetBackward {
    x: Tensor,
    sources: Vec<OnsetSource>,
    result_grad: GradCell,
}

impl BackwardOp for OnsetBackward {
    fn backward(&self) {
        if let Some(grad) = self.result_grad.borrow().as_ref() {
            if self.x.requires_grad() {
                let mut grad_x = Array1::zeros(self.x.len());
                for (i, (&g, source)) in grad.iter().zip(&self.sources).enumerate() {
                    match *source {
                        OnsetSource::FirstBeat => grad_x[i] += g,
                        OnsetSource::Clipped => {}
                        OnsetSource::Rise(j) => {
                            grad_x[i] += g;
                            grad_x[j] -= g;
                        }
                    }
                }
                self.x.accumulate_grad(grad_x);
            }
        }
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.x.clone()]
    }
}
