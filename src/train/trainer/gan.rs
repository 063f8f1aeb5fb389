//! Adversarial training of the generator and refiner against the critic

use super::result::TrainResult;
use crate::autograd::{add, backward, mean, Context};
use crate::binary::{EstimatorKind, SamplingMode, DEFAULT_LOSS_NAME};
use crate::config::{HyperParams, SlopeSchedule};
use crate::data::{Batch, Dataset};
use crate::error::Result;
use crate::io::{BestCheckpoint, CheckpointMeta};
use crate::nn::{Module, MuseGan};
use crate::optim::{Adam, Optimizer};
use crate::train::loss::{
    check_finite, classifier_loss, cross_entropy_by_example, generator_loss_by_example,
    gradient_penalty, wasserstein_losses, LossHealth, LossWeights,
};
use crate::train::metrics::RunningAccuracy;
use rand::Rng;
use std::path::PathBuf;
use std::time::Instant;

/// Loss terms of one critic update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CriticStep {
    /// `mean(D(fake)) - mean(D(real))`
    pub wasserstein: f32,
    /// Unscaled gradient penalty
    pub gradient_penalty: f32,
    /// Mean critic input-gradient norm at the interpolates
    pub mean_slope: f32,
    /// Classifier cross-entropy on the real batch
    pub classification: f32,
    /// Mixed objective that was minimised
    pub total: f32,
    pub health: LossHealth,
}

/// Loss terms of one generator/refiner update
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneratorStep {
    /// `-mean(D(fake))`
    pub wasserstein: f32,
    /// Classifier cross-entropy of the fakes against their conditioning genre
    pub classification: f32,
    pub total: f32,
    /// Fraction of fakes the classifier assigns to their conditioning genre
    pub batch_accuracy: f32,
    pub health: LossHealth,
}

/// Hyperparameters of the adversarial loop
#[derive(Debug, Clone, PartialEq)]
pub struct GanTrainerConfig {
    pub learning_rate: f32,
    pub weights: LossWeights,
    pub gp_coefficient: f32,
    pub label_smoothing: f32,
    /// Binarisation used for generated batches during training
    pub mode: SamplingMode,
    pub slope: SlopeSchedule,
    pub epochs: usize,
    pub models_dir: PathBuf,
}

impl GanTrainerConfig {
    pub fn from_params(params: &HyperParams) -> Result<Self> {
        Ok(Self {
            learning_rate: params.learning_rate,
            weights: params.loss_weights()?,
            gp_coefficient: params.gp_coefficient,
            label_smoothing: params.label_smoothing,
            mode: params.training_mode(),
            slope: params.slope,
            epochs: params.gan_epochs,
            models_dir: params.models_dir.clone(),
        })
    }
}

/// Alternates critic and generator updates.
///
/// The critic step updates the discriminator and classifier on
/// `d * (W + gp * penalty) + (1 - d) * CE(real)`; the generator step updates the
/// generator and refiner on `d * W_gen + (1 - d) * CE(fake, genre)`. With a
/// REINFORCE refiner the per-example generator loss is published on the
/// context before the backward pass.
pub struct GanTrainer {
    config: GanTrainerConfig,
    critic_optimizer: Adam,
    generator_optimizer: Adam,
    conditioning: RunningAccuracy,
    checkpoints: BestCheckpoint,
    step: usize,
}

impl GanTrainer {
    pub fn new(config: GanTrainerConfig) -> Self {
        Self {
            critic_optimizer: Adam::default_params(config.learning_rate),
            generator_optimizer: Adam::default_params(config.learning_rate),
            conditioning: RunningAccuracy::new(),
            checkpoints: BestCheckpoint::new(config.models_dir.join("gan")),
            step: 0,
            config,
        }
    }

    pub fn steps(&self) -> usize {
        self.step
    }

    /// Accuracy of the classifier on generated batches since the epoch began
    pub fn conditioning_accuracy(&self) -> f32 {
        self.conditioning.value()
    }

    /// Register the loss slot a REINFORCE refiner reads from
    pub fn prepare(&self, gan: &MuseGan, ctx: &mut Context) {
        if gan.refiner.neuron().kind() == EstimatorKind::Reinforce {
            ctx.register_loss(DEFAULT_LOSS_NAME);
        }
    }

    /// Anneal the refiner slope for `epoch` and restart the conditioning accuracy
    pub fn begin_epoch(&mut self, gan: &mut MuseGan, epoch: usize) -> f32 {
        let slope = self.config.slope.at(epoch);
        gan.refiner.neuron_mut().set_slope(slope);
        self.conditioning.reset();
        slope
    }

    fn random_genres(num_classes: usize, batch: usize, ctx: &mut Context) -> Vec<usize> {
        (0..batch).map(|_| ctx.rng().random_range(0..num_classes)).collect()
    }

    /// Update the discriminator and classifier on one real batch
    pub fn critic_step(
        &mut self,
        gan: &mut MuseGan,
        real: &Batch,
        ctx: &mut Context,
    ) -> Result<CriticStep> {
        let mut params = gan.discriminator.parameters_mut();
        params.extend(gan.classifier.parameters_mut());
        self.critic_optimizer.zero_grad(&mut params);
        drop(params);

        let batch = real.size();
        let num_classes = gan.config().num_classes;
        let genres = Self::random_genres(num_classes, batch, ctx);
        let latent = gan.sample_latent(batch, ctx);
        let fake = gan.generate(&genres, &latent, self.config.mode, ctx)?.values.detach();

        let d_fake = gan.discriminator.forward(&fake)?;
        let d_real = gan.discriminator.forward(&real.rolls)?;
        let adversarial = wasserstein_losses(&d_fake, &d_real)?.critic;
        let penalty = gradient_penalty(
            &gan.discriminator,
            &real.rolls,
            &fake,
            self.config.gp_coefficient,
            ctx,
        )?;

        let probs = gan.classifier.forward(&real.rolls)?;
        let classification =
            classifier_loss(&probs, &real.labels, num_classes, self.config.label_smoothing)?;

        let mut total = self.config.weights.mix(&add(&adversarial, &penalty.term), &classification);
        let value = total.item();
        let health = check_finite("critic", value);
        backward(&mut total, None);

        let mut params = gan.discriminator.parameters_mut();
        params.extend(gan.classifier.parameters_mut());
        self.critic_optimizer.step(&mut params);

        Ok(CriticStep {
            wasserstein: adversarial.item(),
            gradient_penalty: penalty.value,
            mean_slope: penalty.mean_slope,
            classification: classification.item(),
            total: value,
            health,
        })
    }

    /// Update the generator and refiner on one generated batch
    pub fn generator_step(
        &mut self,
        gan: &mut MuseGan,
        batch: usize,
        ctx: &mut Context,
    ) -> Result<GeneratorStep> {
        let mut params = gan.generator.parameters_mut();
        params.extend(gan.refiner.parameters_mut());
        self.generator_optimizer.zero_grad(&mut params);
        drop(params);

        let num_classes = gan.config().num_classes;
        let genres = Self::random_genres(num_classes, batch, ctx);
        let latent = gan.sample_latent(batch, ctx);
        let fake = gan.generate(&genres, &latent, self.config.mode, ctx)?.values;

        let d_fake = gan.discriminator.forward(&fake)?;
        let probs = gan.classifier.forward(&fake)?;
        let adversarial = generator_loss_by_example(&d_fake)?;
        let classification =
            cross_entropy_by_example(&probs, &genres, num_classes, self.config.label_smoothing)?;
        let per_example = self.config.weights.mix(&adversarial, &classification);

        if gan.refiner.neuron().kind() == EstimatorKind::Reinforce {
            ctx.provide_loss(DEFAULT_LOSS_NAME, &per_example.detach())?;
        }

        let mut total = mean(&per_example);
        let value = total.item();
        let health = check_finite("generator", value);
        backward(&mut total, None);

        let mut params = gan.generator.parameters_mut();
        params.extend(gan.refiner.parameters_mut());
        self.generator_optimizer.step(&mut params);

        let batch_accuracy = self.conditioning.update(&probs, &genres);
        Ok(GeneratorStep {
            wasserstein: mean(&adversarial).item(),
            classification: mean(&classification).item(),
            total: value,
            batch_accuracy,
            health,
        })
    }

    /// `epochs * (N / batch_size)` alternating steps.
    ///
    /// The refiner slope follows the schedule, one value per epoch. The whole
    /// model is offered as a checkpoint after every epoch, scored by that
    /// epoch's conditioning accuracy.
    pub fn train(
        &mut self,
        gan: &mut MuseGan,
        dataset: &mut Dataset,
        ctx: &mut Context,
    ) -> Result<TrainResult> {
        let start = Instant::now();
        let steps_per_epoch = dataset.batches_per_epoch();
        let total_steps = steps_per_epoch * self.config.epochs;
        let mut result = TrainResult::empty();
        self.prepare(gan, ctx);
        ctx.train();

        tracing::info!(
            steps = total_steps,
            estimator = %gan.refiner.neuron().kind(),
            "training generator against critic"
        );

        for epoch in 0..self.config.epochs {
            let slope = self.begin_epoch(gan, epoch);

            for _ in 0..steps_per_epoch {
                let real = match dataset.next_batch() {
                    Ok(batch) => batch,
                    Err(e) => {
                        tracing::warn!(step = self.step, error = %e, "skipping batch");
                        result.skipped_steps += 1;
                        continue;
                    }
                };

                let critic = self.critic_step(gan, &real, ctx)?;
                let generator = self.generator_step(gan, real.size(), ctx)?;
                self.step += 1;

                result.final_loss = generator.total;
                let healths = [critic.health, generator.health];
                if healths.contains(&LossHealth::Diverged) {
                    result.diverged_steps += 1;
                }
                tracing::debug!(
                    step = self.step,
                    critic = critic.total,
                    wasserstein = critic.wasserstein,
                    gradient_penalty = critic.gradient_penalty,
                    mean_slope = critic.mean_slope,
                    generator = generator.total,
                    "adversarial step"
                );
            }

            let accuracy = self.conditioning_accuracy();
            tracing::info!(
                epoch = epoch + 1,
                slope,
                accuracy,
                loss = result.final_loss,
                "gan epoch complete"
            );
            let meta = CheckpointMeta {
                progress: (epoch + 1) as f32 / self.config.epochs as f32,
                accuracy,
                step: self.step,
            };
            self.checkpoints.offer(&*gan, &meta);
        }

        result.epochs = self.config.epochs;
        result.steps = self.step;
        result.accuracy = self.conditioning_accuracy();
        result.best_accuracy = self.checkpoints.best_accuracy();
        result.elapsed_secs = start.elapsed().as_secs_f64();
        Ok(result)
    }
}
