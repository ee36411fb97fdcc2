// Crash-safe JSON snapshots and debounced checkpointing.
//
// Every persisted entity in the engine goes through this layer: writes are
// atomic (temp file + rename) with `.bak` rotation, reads degrade to the
// backup and then to an empty document instead of failing.

pub use checkpoint::CheckpointScheduler;
pub use json_store::{JsonStore, StorageError};

mod checkpoint;
mod json_store;
