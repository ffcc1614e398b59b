//! Dataset loading with an offline fallback.
//!
//! This module provides the page-side half of offline support:
//! - Prefer a live read of the published sheet, bounded by a timeout
//! - Keep the last good raw text as a durable local snapshot
//! - Fall back to that snapshot, reporting how old it is
//! - Report the dataset as unavailable when neither works

mod layer;
mod provenance;
mod storage;

pub use layer::DatasetLoader;
pub use provenance::Provenance;
pub use storage::{NoopStorage, SnapshotStore, SqliteStorage};
