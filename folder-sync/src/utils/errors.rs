//! Custom error types for the sync service.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid sync interval: {0} (must be a positive number of seconds)")]
    InvalidInterval(u64),

    #[error("Source folder does not exist: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("Source path is not a directory: {}", .0.display())]
    SourceNotDirectory(PathBuf),

    #[error("Source and replica overlap: {} and {}", .source_root.display(), .replica_root.display())]
    OverlappingRoots {
        source_root: PathBuf,
        replica_root: PathBuf,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config file error: {0}")]
    ConfigFile(#[from] toml::de::Error),

    #[error("Logger error: {0}")]
    Logger(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;
