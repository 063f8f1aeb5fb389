//! Wasserstein critic and generator losses

use crate::autograd::{mean, reshape, scale, sub, Tensor};
use crate::error::{Error, Result};

/// Scalar losses of one adversarial step
#[derive(Clone)]
pub struct WassersteinLosses {
    /// `mean(D(fake)) - mean(D(real))`
    pub critic: Tensor,
    /// `-mean(D(fake))`
    pub generator: Tensor,
}

fn scores(name: &str, d: &Tensor) -> Result<Tensor> {
    if d.is_empty() {
        return Err(Error::Config(format!("{name} critic scores are empty")));
    }
    reshape(d, &[d.len()])
}

/// Critic and generator losses from critic scores on generated and real data
pub fn wasserstein_losses(d_fake: &Tensor, d_real: &Tensor) -> Result<WassersteinLosses> {
    let fake = mean(&scores("generated", d_fake)?);
    let real = mean(&scores("real", d_real)?);
    Ok(WassersteinLosses { critic: sub(&fake, &real), generator: scale(&fake, -1.0) })
}

/// `-D(fake_i)` for each example, shaped `[B]`
pub fn generator_loss_by_example(d_fake: &Tensor) -> Result<Tensor> {
    Ok(scale(&scores("generated", d_fake)?, -1.0))
}
