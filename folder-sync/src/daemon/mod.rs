//! Long-running service pieces: the sync loop and shutdown handling.

pub mod shutdown;
pub mod sync_loop;

pub use sync_loop::{CycleReport, SyncService};
