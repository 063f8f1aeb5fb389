//! Binary stochastic units
//!
//! Turn real-valued logits into `{0, 1}` outputs while keeping a usable
//! gradient. Two estimators are provided:
//!
//! - [`StraightThrough`]: treats the binarisation step as identity on the
//!   backward pass, optionally with an annealed sigmoid slope.
//! - [`Reinforce`]: an unbiased score-function estimator driven by a
//!   per-example loss registered on the [`Context`].

mod reinforce;
mod straight_through;

pub use reinforce::{Reinforce, ReinforceBaseline, DEFAULT_LOSS_NAME};
pub use straight_through::{bernoulli_sample, binary_round, pass_through_sigmoid, StraightThrough};

use crate::autograd::{Context, Tensor};
use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Which gradient estimator a binary unit uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimatorKind {
    StraightThrough,
    Reinforce,
}

impl FromStr for EstimatorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "straight_through" => Ok(Self::StraightThrough),
            "reinforce" => Ok(Self::Reinforce),
            other => Err(Error::Config(format!("Unrecognized estimator: {other}"))),
        }
    }
}

impl fmt::Display for EstimatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StraightThrough => write!(f, "straight_through"),
            Self::Reinforce => write!(f, "reinforce"),
        }
    }
}

/// Sample from the Bernoulli distribution, or threshold at 0.5
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplingMode {
    Stochastic,
    Deterministic,
}

impl SamplingMode {
    pub fn from_stochastic(stochastic: bool) -> Self {
        if stochastic {
            Self::Stochastic
        } else {
            Self::Deterministic
        }
    }
}

/// Binary values and the probabilities they were drawn from
#[derive(Debug, Clone)]
pub struct BinaryOutput {
    /// `{0, 1}` tensor carrying the surrogate gradient
    pub values: Tensor,
    /// Sigmoid probabilities, same shape as `values`
    pub probabilities: Tensor,
}

/// A binarisation with a surrogate gradient
pub trait BinaryEstimator {
    /// Binarise `logits`; consumes randomness from `ctx` only when sampling
    fn forward(&self, logits: &Tensor, mode: SamplingMode, ctx: &mut Context) -> Result<BinaryOutput>;
}

/// Binary neuron wrapper dispatching on estimator kind and sampling mode.
///
/// REINFORCE is defined for sampling only, so deterministic calls fall back to
/// straight-through thresholding with an identity sigmoid gradient.
pub struct BinaryNeuron {
    estimator: Estimator,
}

enum Estimator {
    StraightThrough(StraightThrough),
    Reinforce(Reinforce),
}

impl BinaryNeuron {
    /// Build a neuron of the given kind.
    ///
    /// `pass_through` and `slope` only affect the straight-through estimator.
    /// A REINFORCE neuron looks up `loss_name` on the context at call time.
    pub fn new(kind: EstimatorKind, pass_through: bool, slope: f32, loss_name: &str) -> Self {
        let estimator = match kind {
            EstimatorKind::StraightThrough => {
                Estimator::StraightThrough(StraightThrough::new(pass_through, slope))
            }
            EstimatorKind::Reinforce => Estimator::Reinforce(Reinforce::new(loss_name)),
        };
        Self { estimator }
    }

    /// Parse the estimator name first; unknown names are configuration errors
    pub fn from_name(name: &str, pass_through: bool, slope: f32) -> Result<Self> {
        Ok(Self::new(name.parse()?, pass_through, slope, DEFAULT_LOSS_NAME))
    }

    pub fn kind(&self) -> EstimatorKind {
        match self.estimator {
            Estimator::StraightThrough(_) => EstimatorKind::StraightThrough,
            Estimator::Reinforce(_) => EstimatorKind::Reinforce,
        }
    }

    /// Current sigmoid slope (straight-through only)
    pub fn slope(&self) -> Option<f32> {
        match &self.estimator {
            Estimator::StraightThrough(st) => Some(st.slope()),
            Estimator::Reinforce(_) => None,
        }
    }

    /// Anneal the sigmoid slope; ignored by REINFORCE
    pub fn set_slope(&mut self, slope: f32) {
        if let Estimator::StraightThrough(st) = &mut self.estimator {
            st.set_slope(slope);
        }
    }
}

impl BinaryEstimator for BinaryNeuron {
    fn forward(&self, logits: &Tensor, mode: SamplingMode, ctx: &mut Context) -> Result<BinaryOutput> {
        match (&self.estimator, mode) {
            (Estimator::StraightThrough(st), _) => st.forward(logits, mode, ctx),
            (Estimator::Reinforce(r), SamplingMode::Stochastic) => r.forward(logits, mode, ctx),
            (Estimator::Reinforce(_), SamplingMode::Deterministic) => {
                StraightThrough::new(true, 1.0).forward(logits, mode, ctx)
            }
        }
    }
}
