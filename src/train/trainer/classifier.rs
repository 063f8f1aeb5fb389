//! Supervised genre-classifier training on real piano-rolls

use super::result::TrainResult;
use crate::autograd::backward;
use crate::data::{Batch, Dataset};
use crate::error::Result;
use crate::io::{BestCheckpoint, CheckpointMeta};
use crate::nn::{Classifier, Module};
use crate::optim::{Adam, Optimizer};
use crate::train::loss::{check_finite, classifier_loss, LossHealth};
use crate::train::metrics::RunningAccuracy;
use std::path::PathBuf;
use std::time::Instant;

/// Loss and accuracy of one optimizer step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassifierStep {
    pub loss: f32,
    /// Accuracy on this batch alone
    pub batch_accuracy: f32,
    pub health: LossHealth,
}

/// Trains a [`Classifier`] with Adam, keeping the most accurate checkpoint.
///
/// A checkpoint is offered whenever `step * batch_size` is a multiple of the
/// corpus size (so after the very first step too) and is written only when the
/// running accuracy strictly improves.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use museforge::autograd::Context;
/// use museforge::data::Dataset;
/// use museforge::nn::{Classifier, ModelConfig};
/// use museforge::train::ClassifierTrainer;
///
/// let config = ModelConfig::default();
/// let mut ctx = Context::with_seed(0);
/// let mut classifier = Classifier::new(&config, &mut ctx)?;
/// let genres = vec!["Pop".to_string(), "Rock".to_string(), "Jazz".to_string()];
/// let shape = config.piano_roll_shape(1)[1..].to_vec();
/// let mut data = Dataset::open(Path::new("data"), &genres, 16, &shape, Some(0))?;
///
/// let mut trainer = ClassifierTrainer::new(1e-4, 0.1, 10, "saved_models");
/// let result = trainer.train(&mut classifier, &mut data)?;
/// println!("accuracy {:.3}", result.accuracy);
/// # Ok::<(), museforge::Error>(())
/// ```
pub struct ClassifierTrainer {
    optimizer: Adam,
    label_smoothing: f32,
    epochs: usize,
    accuracy: RunningAccuracy,
    checkpoints: BestCheckpoint,
    step: usize,
}

impl ClassifierTrainer {
    pub fn new(
        learning_rate: f32,
        label_smoothing: f32,
        epochs: usize,
        models_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            optimizer: Adam::default_params(learning_rate),
            label_smoothing,
            epochs,
            accuracy: RunningAccuracy::new(),
            checkpoints: BestCheckpoint::new(models_dir),
            step: 0,
        }
    }

    /// Running accuracy over every example trained on so far
    pub fn accuracy(&self) -> f32 {
        self.accuracy.value()
    }

    pub fn steps(&self) -> usize {
        self.step
    }

    pub fn checkpoints(&self) -> &BestCheckpoint {
        &self.checkpoints
    }

    /// One Adam update on `batch`
    pub fn step(&mut self, classifier: &mut Classifier, batch: &Batch) -> Result<ClassifierStep> {
        self.optimizer.zero_grad(&mut classifier.parameters_mut());

        let probs = classifier.forward(&batch.rolls)?;
        let mut loss =
            classifier_loss(&probs, &batch.labels, classifier.num_classes(), self.label_smoothing)?;
        let value = loss.item();
        let health = check_finite("classifier", value);

        backward(&mut loss, None);
        self.optimizer.step(&mut classifier.parameters_mut());
        self.step += 1;

        let batch_accuracy = self.accuracy.update(&probs, &batch.labels);
        Ok(ClassifierStep { loss: value, batch_accuracy, health })
    }

    /// `epochs * (N / batch_size)` steps over `dataset`.
    ///
    /// A batch with no readable example is logged and skipped.
    pub fn train(
        &mut self,
        classifier: &mut Classifier,
        dataset: &mut Dataset,
    ) -> Result<TrainResult> {
        let start = Instant::now();
        let steps_per_epoch = dataset.batches_per_epoch();
        let total_steps = steps_per_epoch * self.epochs;
        let mut result = TrainResult::empty();

        tracing::info!(
            steps = total_steps,
            examples = dataset.num_examples(),
            parameters = classifier.num_parameters(),
            "training classifier"
        );

        for step in 0..total_steps {
            let batch = match dataset.next_batch() {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::warn!(step, error = %e, "skipping batch");
                    result.skipped_steps += 1;
                    continue;
                }
            };

            let stats = self.step(classifier, &batch)?;
            result.final_loss = stats.loss;
            if stats.health == LossHealth::Diverged {
                result.diverged_steps += 1;
            }
            tracing::debug!(
                step,
                loss = stats.loss,
                batch_accuracy = stats.batch_accuracy,
                "classifier step"
            );

            if (step * dataset.batch_size()) % dataset.num_examples() == 0 {
                let meta = CheckpointMeta {
                    progress: step as f32 / total_steps as f32,
                    accuracy: self.accuracy(),
                    step,
                };
                self.checkpoints.offer(classifier, &meta);
            }

            if steps_per_epoch > 0 && (step + 1) % steps_per_epoch == 0 {
                tracing::info!(
                    epoch = (step + 1) / steps_per_epoch,
                    loss = stats.loss,
                    accuracy = self.accuracy(),
                    "classifier epoch complete"
                );
            }
        }

        result.epochs = self.epochs;
        result.steps = self.step;
        result.accuracy = self.accuracy();
        result.best_accuracy = self.checkpoints.best_accuracy();
        result.elapsed_secs = start.elapsed().as_secs_f64();
        Ok(result)
    }
}
