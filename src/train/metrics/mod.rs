//! Evaluation metrics for the genre classifier

mod classification;
mod trait_def;

pub use classification::{argmax_rows, count_correct, Accuracy, RunningAccuracy};
pub use trait_def::Metric;
