//! Training loops
//!
//! - [`ClassifierTrainer`]: supervised genre classification on the corpus
//! - [`GanTrainer`]: alternating critic and generator updates

mod classifier;
mod gan;
mod result;

pub use classifier::{ClassifierStep, ClassifierTrainer};
pub use gan::{CriticStep, GanTrainer, GanTrainerConfig, GeneratorStep};
pub use result::TrainResult;
