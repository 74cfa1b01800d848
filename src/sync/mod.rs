// src/sync/mod.rs

pub mod engine;
pub mod queue;

pub use engine::{SyncEngine, SyncStatus};
pub use queue::{EntryState, MutationAction, MutationEntry, MutationQueue};
