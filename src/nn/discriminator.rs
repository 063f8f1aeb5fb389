//! Wasserstein critic

use super::critic::FeatureExtractor;
use super::layers::Dense;
use super::module::scoped;
use super::{Module, ModelConfig};
use crate::autograd::{Context, Tensor};
use crate::error::Result;

/// Feature extractor followed by an unbounded scalar score per example
pub struct Discriminator {
    features: FeatureExtractor,
    score: Dense,
}

impl Discriminator {
    pub fn new(config: &ModelConfig, ctx: &mut Context) -> Result<Self> {
        let features = FeatureExtractor::new(config, ctx)?;
        let score = Dense::new(features.output_width(), 1, ctx);
        Ok(Self { features, score })
    }

    /// `[B, bars, 96, 84, tracks]` -> `[B, 1]`
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.score.forward(&self.features.forward(x)?)
    }
}

impl Module for Discriminator {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut out = scoped("features", self.features.named_parameters());
        out.extend(scoped("score", self.score.named_parameters()));
        out
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut out = scoped("features", self.features.named_parameters_mut());
        out.extend(scoped("score", self.score.named_parameters_mut()));
        out
    }
}
