//! Folder Sync Library
//!
//! One-way periodic mirroring of a source folder into a replica folder,
//! driven by content-hash manifests of both trees.

pub mod config;
pub mod daemon;
pub mod fs;
pub mod manifest;
pub mod reconcile;
pub mod utils;

// Re-export commonly used types
pub use config::{Config, SyncTarget};
pub use daemon::SyncService;
pub use manifest::{build_manifest, FileManifest};
pub use reconcile::{reconcile, ReconcileReport, SyncOp};
pub use utils::errors::SyncError;
pub type Result<T> = std::result::Result<T, SyncError>;
