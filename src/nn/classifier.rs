//! Genre classifier

use super::critic::FeatureExtractor;
use super::layers::Dense;
use super::module::scoped;
use super::{Module, ModelConfig};
use crate::autograd::{softmax_rows, Context, Tensor};
use crate::error::Result;

/// Feature extractor with its own parameters, then a softmax over genres
pub struct Classifier {
    features: FeatureExtractor,
    logits: Dense,
}

impl Classifier {
    pub fn new(config: &ModelConfig, ctx: &mut Context) -> Result<Self> {
        let features = FeatureExtractor::new(config, ctx)?;
        let logits = Dense::new(features.output_width(), config.num_classes, ctx);
        Ok(Self { features, logits })
    }

    pub fn num_classes(&self) -> usize {
        self.logits.outputs()
    }

    /// `[B, bars, 96, 84, tracks]` -> class probabilities `[B, num_classes]`
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        softmax_rows(&self.logits.forward(&self.features.forward(x)?)?)
    }
}

impl Module for Classifier {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut out = scoped("features", self.features.named_parameters());
        out.extend(scoped("logits", self.logits.named_parameters()));
        out
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut out = scoped("features", self.features.named_parameters_mut());
        out.extend(scoped("logits", self.logits.named_parameters_mut()));
        out
    }
}
