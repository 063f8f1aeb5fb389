//! YAML hyperparameter schema
//!
//! Every field has a default, so a config file only lists what it changes:
//!
//! ```yaml
//! batch_size: 8
//! estimator: reinforce
//! stochastic_binarization: true
//! slope:
//!   growth: 0.2
//! ```

use crate::binary::{BinaryNeuron, EstimatorKind, SamplingMode};
use crate::error::{Error, Result};
use crate::nn::ModelConfig;
use crate::train::loss::LossWeights;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Sigmoid slope annealed once per epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SlopeSchedule {
    pub start: f32,
    /// Added after every epoch
    pub growth: f32,
    pub max: f32,
}

impl SlopeSchedule {
    /// Slope in effect during `epoch` (zero-based)
    pub fn at(&self, epoch: usize) -> f32 {
        (self.start + self.growth * epoch as f32).min(self.max)
    }
}

impl Default for SlopeSchedule {
    fn default() -> Self {
        Self { start: 1.0, growth: 0.1, max: 5.0 }
    }
}

/// Complete training configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HyperParams {
    pub num_bars: usize,
    pub beats_per_bar: usize,
    pub num_notes: usize,
    pub num_tracks: usize,

    /// Allowed genres; index in this list is the class label
    pub genres: Vec<String>,

    pub latent_size: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
    pub residual_layers: usize,

    pub classifier_epochs: usize,
    pub gan_epochs: usize,

    /// Weight of the adversarial term; the classification term gets the rest
    pub discriminator_coefficient: f32,
    pub gp_coefficient: f32,
    pub label_smoothing: f32,

    /// `straight_through` or `reinforce`
    pub estimator: String,
    /// Identity gradient through the sigmoid (straight-through only)
    pub pass_through: bool,
    /// Bernoulli sampling instead of thresholding during training; required
    /// by `reinforce`
    pub stochastic_binarization: bool,
    pub slope: SlopeSchedule,

    pub models_dir: PathBuf,
    /// Fixed seed for parameter init, sampling and shuffling
    pub seed: Option<u64>,
}

impl Default for HyperParams {
    fn default() -> Self {
        Self {
            num_bars: 4,
            beats_per_bar: 96,
            num_notes: 84,
            num_tracks: 5,
            genres: vec!["Pop".to_string(), "Rock".to_string(), "Jazz".to_string()],
            latent_size: 128,
            batch_size: 16,
            learning_rate: 1e-4,
            residual_layers: 4,
            classifier_epochs: 10,
            gan_epochs: 10,
            discriminator_coefficient: 0.5,
            gp_coefficient: 10.0,
            label_smoothing: 0.1,
            estimator: "straight_through".to_string(),
            pass_through: false,
            stochastic_binarization: false,
            slope: SlopeSchedule::default(),
            models_dir: PathBuf::from("saved_models"),
            seed: None,
        }
    }
}

impl HyperParams {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let params: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::Config(format!("Failed to parse YAML config: {e}")))?;
        params.validate()?;
        Ok(params)
    }

    /// Read, parse and validate a YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| Error::Serialization(format!("YAML serialization failed: {e}")))
    }

    /// Reject settings no network or loop can be built from
    pub fn validate(&self) -> Result<()> {
        self.model_config().validate()?;
        if self.estimator_kind()? == EstimatorKind::Reinforce && !self.stochastic_binarization {
            return Err(Error::Config(
                "estimator 'reinforce' needs stochastic_binarization: true".into(),
            ));
        }
        LossWeights::new(self.discriminator_coefficient)?;

        if self.genres.is_empty() {
            return Err(Error::Config("genres must not be empty".into()));
        }
        if let Some(dup) = self.genres.iter().enumerate().find_map(|(i, g)| {
            self.genres[..i].contains(g).then_some(g)
        }) {
            return Err(Error::Config(format!("genre '{dup}' listed twice")));
        }
        if self.genres.iter().any(|g| g.is_empty() || g.contains('-')) {
            return Err(Error::Config("genre names must be non-empty and contain no '-'".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be positive".into()));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate <= 1.0) {
            return Err(Error::Config(format!(
                "learning_rate must lie in (0, 1], got {}",
                self.learning_rate
            )));
        }
        if !(self.gp_coefficient >= 0.0 && self.gp_coefficient.is_finite()) {
            return Err(Error::Config(format!(
                "gp_coefficient must be finite and non-negative, got {}",
                self.gp_coefficient
            )));
        }
        if !(0.0..1.0).contains(&self.label_smoothing) {
            return Err(Error::Config(format!(
                "label_smoothing must lie in [0, 1), got {}",
                self.label_smoothing
            )));
        }
        let slope = &self.slope;
        if !(slope.start > 0.0 && slope.growth >= 0.0 && slope.max >= slope.start) {
            return Err(Error::Config(format!(
                "slope schedule needs start > 0, growth >= 0, max >= start; got {slope:?}"
            )));
        }
        Ok(())
    }

    pub fn estimator_kind(&self) -> Result<EstimatorKind> {
        self.estimator.parse()
    }

    /// Geometry handed to the network builders
    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            num_tracks: self.num_tracks,
            num_classes: self.genres.len(),
            latent_size: self.latent_size,
            residual_layers: self.residual_layers,
            num_bars: self.num_bars,
            beats_per_bar: self.beats_per_bar,
            num_notes: self.num_notes,
        }
    }

    /// Binary neuron of the refiner, at the schedule's starting slope
    pub fn neuron(&self) -> Result<BinaryNeuron> {
        BinaryNeuron::from_name(&self.estimator, self.pass_through, self.slope.start)
    }

    pub fn loss_weights(&self) -> Result<LossWeights> {
        LossWeights::new(self.discriminator_coefficient)
    }

    /// Binarisation mode used while training
    pub fn training_mode(&self) -> SamplingMode {
        SamplingMode::from_stochastic(self.stochastic_binarization)
    }

    /// `bar x beat x pitch x track` shape of one stored example
    pub fn example_shape(&self) -> Vec<usize> {
        vec![self.num_bars, self.beats_per_bar, self.num_notes, self.num_tracks]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let params = HyperParams::default();
        params.validate().unwrap();
        assert_eq!(params.model_config(), ModelConfig::musegan());
        assert_eq!(params.estimator_kind().unwrap(), EstimatorKind::StraightThrough);
        assert_eq!(params.training_mode(), SamplingMode::Deterministic);
        assert_eq!(params.example_shape(), vec![4, 96, 84, 5]);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let params = HyperParams::from_yaml_str(
            "batch_size: 4\nestimator: reinforce\nstochastic_binarization: true\n\
             slope:\n  growth: 0.5\nseed: 7\n",
        )
        .unwrap();
        assert_eq!(params.batch_size, 4);
        assert_eq!(params.estimator_kind().unwrap(), EstimatorKind::Reinforce);
        assert_eq!(params.training_mode(), SamplingMode::Stochastic);
        assert_eq!(params.seed, Some(7));
        assert_abs_diff_eq!(params.slope.growth, 0.5);
        assert_abs_diff_eq!(params.slope.start, 1.0);
        assert_eq!(params.latent_size, 128);
    }

    #[test]
    fn test_yaml_file_round_trip() {
        let params = HyperParams { gan_epochs: 3, ..HyperParams::default() };
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(params.to_yaml().unwrap().as_bytes()).unwrap();
        assert_eq!(HyperParams::from_yaml_file(file.path()).unwrap(), params);
    }

    #[test]
    fn test_rejections() {
        for yaml in [
            "estimator: gumbel",
            "estimator: reinforce",
            "estimator: reinforce\nstochastic_binarization: false",
            "discriminator_coefficient: 1.5",
            "num_notes: 90",
            "genres: []",
            "genres: [Pop, Pop]",
            "batch_size: 0",
            "learning_rate: 0.0",
            "label_smoothing: 1.0",
            "slope:\n  start: 2.0\n  max: 1.0",
            "unknown_field: 1",
        ] {
            assert!(
                matches!(HyperParams::from_yaml_str(yaml), Err(Error::Config(_))),
                "accepted {yaml:?}"
            );
        }
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = HyperParams::from_yaml_file("/nonexistent/museforge.yaml").unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_slope_schedule_is_capped() {
        let schedule = SlopeSchedule::default();
        assert_abs_diff_eq!(schedule.at(0), 1.0);
        assert_abs_diff_eq!(schedule.at(3), 1.3, epsilon = 1e-6);
        assert_abs_diff_eq!(schedule.at(1000), 5.0);
    }

    #[test]
    fn test_neuron_follows_estimator() {
        let params = HyperParams { estimator: "reinforce".into(), ..HyperParams::default() };
        assert_eq!(params.neuron().unwrap().kind(), EstimatorKind::Reinforce);
        assert_eq!(HyperParams::default().neuron().unwrap().slope(), Some(1.0));
    }
}
