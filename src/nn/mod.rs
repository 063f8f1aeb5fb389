//! Layers and the four MuseGAN networks
//!
//! Every network owns its parameters as named [`Tensor`](crate::Tensor)s
//! exposed through the [`Module`] trait; forward passes clone the tensor
//! handles into the graph so gradients accumulate back into the owners.

mod classifier;
mod config;
mod critic;
mod discriminator;
mod gan;
mod generator;
pub mod init;
pub mod layers;
pub(crate) mod module;
mod refiner;
mod summary;

pub use classifier::Classifier;
pub use config::{
    ModelConfig, BEATS_PER_BAR, CHROMA_BEAT_GROUPS, FEATURE_CHANNELS, NUM_NOTES,
};
pub use critic::{
    ChromaBranch, FeatureExtractor, OnsetBranch, SharedEncoder, TrackEncoder, LEAKY_ALPHA,
};
pub use discriminator::Discriminator;
pub use gan::{MuseGan, ShapeReport};
pub use generator::{
    Generator, MergeBranch, PitchTimeBranch, SharedGenerator, TimePitchBranch, TrackGenerator,
};
pub use layers::{BatchNorm, Conv3d, ConvTranspose3d, Dense, Embedding};
pub use module::Module;
pub use refiner::{Refiner, ResidualUnit, TrackRefiner};
pub use summary::{ModelSummary, ParameterRow};
