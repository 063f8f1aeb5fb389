//! Network geometry

use crate::autograd::OCTAVE;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Beats per bar the transposed-convolution stack produces
pub const BEATS_PER_BAR: usize = 96;
/// Pitches per bar the transposed-convolution stack produces (seven octaves)
pub const NUM_NOTES: usize = 84;
/// Beat groups the chroma feature sums over
pub const CHROMA_BEAT_GROUPS: usize = 4;
/// Channels of the per-bar feature the discriminator trunk ends with
pub const FEATURE_CHANNELS: usize = 512;

/// Shape parameters shared by the four networks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Instrument tracks (last axis of a piano-roll)
    pub num_tracks: usize,
    /// Genre classes
    pub num_classes: usize,
    /// Width of the latent vector and the genre embedding
    pub latent_size: usize,
    /// Residual units per refiner track
    pub residual_layers: usize,
    pub num_bars: usize,
    pub beats_per_bar: usize,
    pub num_notes: usize,
}

impl ModelConfig {
    /// Four bars of five tracks, three genres
    pub fn musegan() -> Self {
        Self {
            num_tracks: 5,
            num_classes: 3,
            latent_size: 128,
            residual_layers: 4,
            num_bars: 4,
            beats_per_bar: BEATS_PER_BAR,
            num_notes: NUM_NOTES,
        }
    }

    /// Check the geometry the layer stacks are built for
    pub fn validate(&self) -> Result<()> {
        let counts = [
            ("num_tracks", self.num_tracks),
            ("num_classes", self.num_classes),
            ("latent_size", self.latent_size),
            ("residual_layers", self.residual_layers),
        ];
        for (name, value) in counts {
            if value == 0 {
                return Err(Error::Config(format!("{name} must be positive")));
            }
        }
        if self.num_bars < 2 {
            return Err(Error::Config(format!(
                "num_bars must be at least 2, got {}",
                self.num_bars
            )));
        }
        if self.beats_per_bar != BEATS_PER_BAR {
            return Err(Error::Config(format!(
                "beats_per_bar must be {BEATS_PER_BAR}, got {}",
                self.beats_per_bar
            )));
        }
        if self.num_notes != NUM_NOTES {
            return Err(Error::Config(format!(
                "num_notes must be {NUM_NOTES}, got {}",
                self.num_notes
            )));
        }
        if self.num_notes % OCTAVE != 0 || self.beats_per_bar % CHROMA_BEAT_GROUPS != 0 {
            return Err(Error::Config(
                "chroma needs whole octaves and whole beat groups".into(),
            ));
        }
        Ok(())
    }

    /// `[batch, bars, beats, pitches, tracks]`
    pub fn piano_roll_shape(&self, batch: usize) -> Vec<usize> {
        vec![batch, self.num_bars, self.beats_per_bar, self.num_notes, self.num_tracks]
    }

    /// Flattened width of the feature extractor output
    pub fn feature_width(&self) -> usize {
        (self.num_bars - 1) * FEATURE_CHANNELS
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::musegan()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ModelConfig::default();
        config.validate().unwrap();
        assert_eq!(config.piano_roll_shape(2), vec![2, 4, 96, 84, 5]);
        assert_eq!(config.feature_width(), 3 * 512);
    }

    #[test]
    fn test_rejects_bad_geometry() {
        let cases = [
            ModelConfig { num_notes: 80, ..ModelConfig::default() },
            ModelConfig { beats_per_bar: 48, ..ModelConfig::default() },
            ModelConfig { num_bars: 1, ..ModelConfig::default() },
            ModelConfig { num_tracks: 0, ..ModelConfig::default() },
        ];
        for config in cases {
            assert!(matches!(config.validate(), Err(Error::Config(_))), "{config:?}");
        }
    }
}
