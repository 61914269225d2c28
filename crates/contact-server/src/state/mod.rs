//! Shared server state.

pub mod store;

pub use store::{AppState, CycleGuard, CycleStats, PendingWrite, SnapshotUpdate};
