//! End-to-end training from hyperparameters and a corpus directory

use super::trainer::{ClassifierTrainer, GanTrainer, GanTrainerConfig, TrainResult};
use crate::autograd::Context;
use crate::config::HyperParams;
use crate::data::Dataset;
use crate::error::{Error, Result};
use crate::nn::{ModelSummary, MuseGan};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// File name of the JSON run report inside the models directory
pub const REPORT_FILE: &str = "report.json";

/// Outcome of both training phases
#[derive(Debug, Clone, Serialize)]
pub struct TrainReport {
    pub classifier: TrainResult,
    pub gan: TrainResult,
    pub summary: ModelSummary,
}

/// Build the model, fit the classifier, then train the generator adversarially.
///
/// Checkpoints go to `params.models_dir` (classifier) and its `gan/`
/// subdirectory (whole model).
pub fn train(params: &HyperParams, data_dir: &Path) -> Result<TrainReport> {
    params.validate()?;
    let mut ctx = match params.seed {
        Some(seed) => Context::with_seed(seed),
        None => Context::new(),
    };

    let mut dataset = Dataset::open(
        data_dir,
        &params.genres,
        params.batch_size,
        &params.example_shape(),
        params.seed,
    )?;
    let config = params.model_config();
    let mut gan = MuseGan::new(&config, params.neuron()?, &mut ctx)?;
    tracing::info!(
        tracks = config.num_tracks,
        classes = config.num_classes,
        latent = config.latent_size,
        estimator = %params.estimator,
        "model built"
    );

    let mut classifier_trainer = ClassifierTrainer::new(
        params.learning_rate,
        params.label_smoothing,
        params.classifier_epochs,
        &params.models_dir,
    );
    let classifier = classifier_trainer.train(&mut gan.classifier, &mut dataset)?;
    tracing::info!(
        accuracy = classifier.accuracy,
        best = ?classifier.best_accuracy,
        elapsed_secs = classifier.elapsed_secs,
        "classifier training finished"
    );

    let mut gan_trainer = GanTrainer::new(GanTrainerConfig::from_params(params)?);
    let adversarial = gan_trainer.train(&mut gan, &mut dataset, &mut ctx)?;
    tracing::info!(
        conditioning_accuracy = adversarial.accuracy,
        elapsed_secs = adversarial.elapsed_secs,
        "adversarial training finished"
    );

    let summary = gan.summary();
    summary.log();
    let report = TrainReport { classifier, gan: adversarial, summary };
    if let Err(e) = write_report(&report, &params.models_dir) {
        tracing::error!(error = %e, "failed to write run report");
    }
    Ok(report)
}

/// Write `report` as pretty JSON to `dir/report.json`
pub fn write_report(report: &TrainReport, dir: &Path) -> Result<PathBuf> {
    let json = serde_json::to_string_pretty(report)
        .map_err(|e| Error::Serialization(format!("JSON serialization failed: {e}")))?;
    std::fs::create_dir_all(dir)?;
    let path = dir.join(REPORT_FILE);
    std::fs::write(&path, json)?;
    tracing::info!(path = %path.display(), "run report written");
    Ok(path)
}
