//! Training configuration loaded from YAML

mod schema;

pub use schema::{HyperParams, SlopeSchedule};
