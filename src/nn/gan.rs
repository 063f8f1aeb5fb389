//! The four networks bundled together

use super::module::scoped;
use super::summary::ModelSummary;
use super::{Classifier, Discriminator, Generator, Module, ModelConfig, Refiner};
use crate::autograd::{Context, Tensor};
use crate::binary::{BinaryNeuron, BinaryOutput, SamplingMode};
use crate::error::{Error, Result};
use std::fmt;

/// Generator, refiner, critic and classifier of one model
pub struct MuseGan {
    pub generator: Generator,
    pub refiner: Refiner,
    pub discriminator: Discriminator,
    pub classifier: Classifier,
    config: ModelConfig,
}

/// Output shapes of every network for one batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeReport {
    pub generator: Vec<usize>,
    pub refiner: Vec<usize>,
    pub discriminator: Vec<usize>,
    pub classifier: Vec<usize>,
}

impl fmt::Display for ShapeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "generator:     {:?}", self.generator)?;
        writeln!(f, "refiner:       {:?}", self.refiner)?;
        writeln!(f, "discriminator: {:?}", self.discriminator)?;
        write!(f, "classifier:    {:?}", self.classifier)
    }
}

/// Run `f` in evaluation mode and restore the previous mode afterwards
fn in_eval<T>(ctx: &mut Context, f: impl FnOnce(&mut Context) -> Result<T>) -> Result<T> {
    let was_training = ctx.is_training();
    ctx.eval();
    let result = f(ctx);
    if was_training {
        ctx.train();
    }
    result
}

impl MuseGan {
    /// Build all four networks; the refiner binarises with `neuron`
    pub fn new(config: &ModelConfig, neuron: BinaryNeuron, ctx: &mut Context) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            generator: Generator::new(config, ctx)?,
            refiner: Refiner::new(config, neuron, ctx)?,
            discriminator: Discriminator::new(config, ctx)?,
            classifier: Classifier::new(config, ctx)?,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// `[batch, latent_size]` draws from N(0, 1)
    pub fn sample_latent(&self, batch: usize, ctx: &mut Context) -> Tensor {
        let data = ctx.normal(batch * self.config.latent_size);
        Tensor::from_array(data, vec![batch, self.config.latent_size], false)
    }

    /// Generator followed by the refiner
    pub fn generate(
        &mut self,
        genres: &[usize],
        latent: &Tensor,
        mode: SamplingMode,
        ctx: &mut Context,
    ) -> Result<BinaryOutput> {
        if let Some(&bad) = genres.iter().find(|&&g| g >= self.config.num_classes) {
            return Err(Error::Config(format!(
                "genre id {bad} out of range for {} classes",
                self.config.num_classes
            )));
        }
        let generated = self.generator.forward(genres, latent, ctx)?;
        self.refiner.forward(&generated, mode, ctx)
    }

    /// Binary piano-rolls for the given genres, thresholded in evaluation mode
    pub fn sample(&mut self, genres: &[usize], ctx: &mut Context) -> Result<Tensor> {
        let latent = self.sample_latent(genres.len(), ctx);
        in_eval(ctx, |ctx| {
            let out = self.generate(genres, &latent, SamplingMode::Deterministic, ctx)?;
            Ok(out.values.detach())
        })
    }

    /// Push one batch through every network and report the output shapes
    pub fn describe_shapes(&mut self, batch: usize, ctx: &mut Context) -> Result<ShapeReport> {
        if batch == 0 {
            return Err(Error::Config("batch size must be positive".into()));
        }
        let genres: Vec<usize> = (0..batch).map(|i| i % self.config.num_classes).collect();
        let latent = self.sample_latent(batch, ctx);
        in_eval(ctx, |ctx| {
            let generated = self.generator.forward(&genres, &latent, ctx)?;
            let refined = self.refiner.forward(&generated, SamplingMode::Deterministic, ctx)?;
            let score = self.discriminator.forward(&refined.values)?;
            let probs = self.classifier.forward(&refined.values)?;
            Ok(ShapeReport {
                generator: generated.shape().to_vec(),
                refiner: refined.values.shape().to_vec(),
                discriminator: score.shape().to_vec(),
                classifier: probs.shape().to_vec(),
            })
        })
    }

    /// Parameter summary of all four networks
    pub fn summary(&self) -> ModelSummary {
        ModelSummary::merge([
            ModelSummary::of("generator", &self.generator),
            ModelSummary::of("refiner", &self.refiner),
            ModelSummary::of("discriminator", &self.discriminator),
            ModelSummary::of("classifier", &self.classifier),
        ])
    }
}

impl Module for MuseGan {
    fn named_parameters(&self) -> Vec<(String, &Tensor)> {
        let mut out = scoped("generator", self.generator.named_parameters());
        out.extend(scoped("refiner", self.refiner.named_parameters()));
        out.extend(scoped("discriminator", self.discriminator.named_parameters()));
        out.extend(scoped("classifier", self.classifier.named_parameters()));
        out
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, &mut Tensor)> {
        let mut out = scoped("generator", self.generator.named_parameters_mut());
        out.extend(scoped("refiner", self.refiner.named_parameters_mut()));
        out.extend(scoped("discriminator", self.discriminator.named_parameters_mut()));
        out.extend(scoped("classifier", self.classifier.named_parameters_mut()));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::{EstimatorKind, DEFAULT_LOSS_NAME};

    fn tiny() -> ModelConfig {
        ModelConfig {
            num_tracks: 1,
            num_classes: 2,
            latent_size: 4,
            residual_layers: 1,
            num_bars: 2,
            ..ModelConfig::default()
        }
    }

    fn neuron() -> BinaryNeuron {
        BinaryNeuron::new(EstimatorKind::StraightThrough, false, 1.0, DEFAULT_LOSS_NAME)
    }

    #[test]
    fn test_describe_shapes_restores_training_mode() {
        let mut ctx = Context::with_seed(0);
        let mut gan = MuseGan::new(&tiny(), neuron(), &mut ctx).unwrap();
        let report = gan.describe_shapes(2, &mut ctx).unwrap();
        assert_eq!(report.generator, vec![2, 2, 96, 84, 1]);
        assert_eq!(report.refiner, vec![2, 2, 96, 84, 1]);
        assert_eq!(report.discriminator, vec![2, 1]);
        assert_eq!(report.classifier, vec![2, 2]);
        assert!(ctx.is_training());
    }

    #[test]
    fn test_sample_is_binary_and_detached() {
        let mut ctx = Context::with_seed(1);
        let mut gan = MuseGan::new(&tiny(), neuron(), &mut ctx).unwrap();
        let rolls = gan.sample(&[1], &mut ctx).unwrap();
        assert_eq!(rolls.shape(), &[1, 2, 96, 84, 1]);
        assert!(!rolls.requires_grad());
        assert!(rolls.data().iter().all(|&v| v == 0.0 || v == 1.0));
    }

    #[test]
    fn test_rejects_unknown_genre() {
        let mut ctx = Context::with_seed(1);
        let mut gan = MuseGan::new(&tiny(), neuron(), &mut ctx).unwrap();
        assert!(matches!(gan.sample(&[2], &mut ctx), Err(Error::Config(_))));
    }

    #[test]
    fn test_network_scopes_are_disjoint() {
        let mut ctx = Context::with_seed(1);
        let gan = MuseGan::new(&tiny(), neuron(), &mut ctx).unwrap();
        let names: Vec<String> = gan.named_parameters().into_iter().map(|(n, _)| n).collect();
        let unique: std::collections::HashSet<&String> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
        let total: usize = gan.named_parameters().iter().map(|(_, t)| t.len()).sum();
        assert_eq!(gan.summary().total(), total);
    }
}
