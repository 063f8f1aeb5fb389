//! On-disk example corpus
//!
//! Each example is a `<genre>-<id>.npz` archive; [`Dataset`] filters, shuffles
//! and batches them.

mod archive;
mod dataset;
pub mod npy;

pub use archive::{genre_prefix, read_example, write_example, Example, GENRE_ENTRY, PIANOROLL_ENTRY};
pub use dataset::{Batch, Dataset};
