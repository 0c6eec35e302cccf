//! Utility modules for the sync service.

pub mod errors;
pub mod logger;

pub use errors::{Result, SyncError};
