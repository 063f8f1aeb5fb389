//! Losses, metrics and training loops
//!
//! Training runs in two phases over the same corpus: the genre classifier is
//! first fitted to real piano-rolls, then the generator and refiner are
//! trained against the discriminator with the classifier supplying the
//! conditioning signal.
//!
//! # Example
//!
//! ```no_run
//! use museforge::config::HyperParams;
//! use museforge::train::train;
//!
//! let params = HyperParams::default();
//! let report = train(&params, "data".as_ref())?;
//! println!("classifier accuracy {:.3}", report.classifier.accuracy);
//! # Ok::<(), museforge::Error>(())
//! ```

pub mod loss;
mod metrics;
mod pipeline;
mod trainer;

pub use metrics::{argmax_rows, count_correct, Accuracy, Metric, RunningAccuracy};
pub use pipeline::{train, write_report, TrainReport, REPORT_FILE};
pub use trainer::{
    ClassifierStep, ClassifierTrainer, CriticStep, GanTrainer, GanTrainerConfig, GeneratorStep,
    TrainResult,
};
