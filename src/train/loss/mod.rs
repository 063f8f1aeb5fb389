//! Loss functions
//!
//! - [`classifier_loss`]: label-smoothed cross-entropy on class probabilities
//! - [`wasserstein_losses`]: critic and generator Wasserstein objectives
//! - [`gradient_penalty`]: unit-gradient-norm penalty on real/fake interpolates
//! - [`LossWeights`]: adversarial/classification mixing
//! - [`check_finite`]: divergence reporting

mod cross_entropy;
mod health;
mod penalty;
mod wasserstein;
mod weighted;

pub use cross_entropy::{
    classifier_loss, cross_entropy_by_example, smoothed_targets, PROBABILITY_FLOOR,
};
pub use health::{check_finite, LossHealth};
pub use penalty::{gradient_penalty, interpolate, Critic, GradientPenalty, DIRECTION_STEP, SLOPE_EPS};
pub use wasserstein::{generator_loss_by_example, wasserstein_losses, WassersteinLosses};
pub use weighted::LossWeights;
