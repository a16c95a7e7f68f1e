//! Pipeline state persistence
//!
//! Operator state is saved and restored as a [`Checkpoint`]: one entry per
//! operator in schedule order, tagged with the configuration it was produced
//! under.

pub mod checkpoint;

pub use checkpoint::{Checkpoint, CheckpointMetadata, OperatorCheckpoint, CHECKPOINT_VERSION};
