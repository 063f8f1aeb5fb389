//! Model persistence

mod checkpoint;

pub use checkpoint::{
    checkpoint_name, from_bytes, load_checkpoint, save_checkpoint, to_bytes, BestCheckpoint,
    CheckpointMeta,
};
