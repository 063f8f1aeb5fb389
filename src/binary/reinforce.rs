//! REINFORCE binary neurons with a variance-reducing baseline
//!
//! The backward pass ignores the downstream gradient and instead returns the
//! score-function estimate `(b - p) * (L_i - l_bar)`, where `L_i` is the loss
//! of example `i` published on the [`Context`] after the forward pass.

use super::{BinaryEstimator, BinaryOutput, SamplingMode};
use crate::autograd::{sigmoid_scalar, BackwardOp, Context, GradCell, Tensor};
use crate::error::{Error, Result};
use ndarray::Array1;
use std::cell::RefCell;
use std::rc::Rc;

/// Loss slot name used when none is given
pub const DEFAULT_LOSS_NAME: &str = "loss_by_example";

const BASELINE_DECAY: f32 = 0.95;
const BASELINE_EPS: f32 = 1e-4;

/// Exponential-moving-average baseline, one entry per unit (batch axis reduced).
///
/// `num` starts at 0 and `den` at 1; each backward pass folds in
/// `mean_i((b-p)^2 L_i)` and `mean_i((b-p)^2)` and the baseline is
/// `num / (den + 1e-4)`.
#[derive(Debug, Clone)]
pub struct ReinforceBaseline {
    num: Array1<f32>,
    den: Array1<f32>,
}

impl ReinforceBaseline {
    pub fn new() -> Self {
        Self { num: Array1::zeros(0), den: Array1::ones(0) }
    }

    pub fn numerator(&self) -> &Array1<f32> {
        &self.num
    }

    pub fn denominator(&self) -> &Array1<f32> {
        &self.den
    }

    /// Fold one batch into the averages and return the updated baseline.
    ///
    /// `diff` is `b - p` laid out `[batch, units]`, `losses` has one entry per example.
    pub fn update(&mut self, diff: &[f32], losses: &[f32]) -> Array1<f32> {
        let batch = losses.len().max(1);
        let units = diff.len() / batch;
        if self.num.len() != units {
            self.num = Array1::zeros(units);
            self.den = Array1::ones(units);
        }

        let mut sq = Array1::<f32>::zeros(units);
        let mut sq_loss = Array1::<f32>::zeros(units);
        for (row, &loss) in diff.chunks(units.max(1)).zip(losses) {
            for (u, &d) in row.iter().enumerate() {
                sq[u] += d * d;
                sq_loss[u] += d * d * loss;
            }
        }
        sq /= batch as f32;
        sq_loss /= batch as f32;

        self.num = &self.num * BASELINE_DECAY + sq_loss * (1.0 - BASELINE_DECAY);
        self.den = &self.den * BASELINE_DECAY + sq * (1.0 - BASELINE_DECAY);
        &self.num / &(&self.den + BASELINE_EPS)
    }
}

impl Default for ReinforceBaseline {
    fn default() -> Self {
        Self::new()
    }
}

/// REINFORCE estimator bound to a named per-example loss
#[derive(Debug, Clone)]
pub struct Reinforce {
    loss_name: String,
    variance_adjustment: bool,
    baseline: Rc<RefCell<ReinforceBaseline>>,
}

impl Reinforce {
    pub fn new(loss_name: &str) -> Self {
        Self {
            loss_name: loss_name.to_string(),
            variance_adjustment: true,
            baseline: Rc::new(RefCell::new(ReinforceBaseline::new())),
        }
    }

    /// Skip the baseline and return `(b - p) * L_i`
    pub fn without_variance_adjustment(mut self) -> Self {
        self.variance_adjustment = false;
        self
    }

    pub fn loss_name(&self) -> &str {
        &self.loss_name
    }

    /// Snapshot of the baseline state
    pub fn baseline(&self) -> ReinforceBaseline {
        self.baseline.borrow().clone()
    }
}

impl BinaryEstimator for Reinforce {
    fn forward(&self, logits: &Tensor, mode: SamplingMode, ctx: &mut Context) -> Result<BinaryOutput> {
        let losses = ctx.loss_slot(&self.loss_name)?;
        if mode == SamplingMode::Deterministic {
            return Err(Error::Config(
                "REINFORCE samples only; use BinaryNeuron for deterministic thresholding".into(),
            ));
        }
        let batch = logits.shape().first().copied().unwrap_or(1);

        let p = logits.data().mapv(sigmoid_scalar);
        let u = ctx.uniform(p.len());
        let b = ndarray::Zip::from(&p).and(&u).map_collect(|&p, &u| if p > u { 1.0 } else { 0.0 });
        let diff = &b - &p;

        let probabilities = Tensor::from_array(p, logits.shape().to_vec(), false);
        let requires_grad = logits.requires_grad();
        let mut values = Tensor::from_array(b, logits.shape().to_vec(), requires_grad);

        if requires_grad {
            let backward_op = Rc::new(ReinforceBackward {
                logits: logits.clone(),
                diff,
                batch,
                losses,
                loss_name: self.loss_name.clone(),
                baseline: Rc::clone(&self.baseline),
                variance_adjustment: self.variance_adjustment,
                result_grad: values.grad_cell(),
            });
            values.set_backward_op(backward_op);
        }

        Ok(BinaryOutput { values, probabilities })
    }
}

struct ReinforceBackward {
    logits: Tensor,
    diff: Array1<f32>,
    batch: usize,
    losses: GradCell,
    loss_name: String,
    baseline: Rc<RefCell<ReinforceBaseline>>,
    variance_adjustment: bool,
    result_grad: GradCell,
}

impl BackwardOp for ReinforceBackward {
    fn backward(&self) {
        // Only the presence of a downstream gradient matters, not its value
        if self.result_grad.borrow().is_none() || !self.logits.requires_grad() {
            return;
        }
        let losses = self.losses.borrow();
        let Some(losses) = losses.as_ref() else {
            tracing::warn!(loss = %self.loss_name, "REINFORCE loss was never provided; skipping gradient");
            return;
        };
        if losses.len() != self.batch {
            tracing::warn!(
                loss = %self.loss_name,
                expected = self.batch,
                actual = losses.len(),
                "REINFORCE loss has wrong batch size; skipping gradient"
            );
            return;
        }

        let losses = losses.as_slice().expect("loss is contiguous");
        let diff = self.diff.as_slice().expect("diff is contiguous");
        let units = diff.len() / self.batch.max(1);

        let baseline = if self.variance_adjustment {
            self.baseline.borrow_mut().update(diff, losses)
        } else {
            Array1::zeros(units)
        };

        let mut grad = Vec::with_capacity(diff.len());
        for (row, &loss) in diff.chunks(units.max(1)).zip(losses) {
            grad.extend(row.iter().zip(baseline.iter()).map(|(&d, &l_bar)| d * (loss - l_bar)));
        }
        self.logits.accumulate_grad(Array1::from(grad));
    }

    fn inputs(&self) -> Vec<Tensor> {
        vec![self.logits.clone()]
    }
}
