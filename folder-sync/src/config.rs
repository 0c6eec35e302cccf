//! Configuration management for the sync service.
//!
//! Values come from an optional TOML file, overridden by command-line
//! arguments, and are validated once into an immutable [`SyncTarget`].

use crate::utils::errors::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Folder to mirror from
    pub source: Option<PathBuf>,

    /// Folder to mirror into (created if missing)
    pub replica: Option<PathBuf>,

    /// Seconds to sleep between the end of one cycle and the start of the next
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// File receiving a copy of every console log line
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Values supplied on the command line; each one replaces the file's value.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub source: Option<PathBuf>,
    pub replica: Option<PathBuf>,
    pub interval_secs: Option<u64>,
    pub log_file: Option<PathBuf>,
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply command-line overrides on top of this configuration
    pub fn with_overrides(mut self, overrides: Overrides) -> Self {
        if overrides.source.is_some() {
            self.sync.source = overrides.source;
        }
        if overrides.replica.is_some() {
            self.sync.replica = overrides.replica;
        }
        if overrides.interval_secs.is_some() {
            self.sync.interval_secs = overrides.interval_secs;
        }
        if overrides.log_file.is_some() {
            self.log.file = overrides.log_file;
        }
        if let Some(level) = overrides.log_level {
            self.log.level = level;
        }
        self
    }

    /// Check that every required value is present and well-formed, and that
    /// the log file does not sit inside the replica. Creates nothing.
    pub fn validate(&self) -> Result<()> {
        self.source()?;
        let replica = resolve_path(self.replica()?)?;
        let log_file = resolve_log_path(self.log_file()?)?;
        ensure_log_outside_replica(&log_file, &replica)?;
        let interval = self.interval_secs()?;
        if interval == 0 {
            return Err(SyncError::InvalidInterval(interval));
        }
        Ok(())
    }

    pub fn source(&self) -> Result<&Path> {
        required(self.sync.source.as_deref(), "source folder")
    }

    pub fn replica(&self) -> Result<&Path> {
        required(self.sync.replica.as_deref(), "replica folder")
    }

    pub fn log_file(&self) -> Result<&Path> {
        required(self.log.file.as_deref(), "log file path")
    }

    pub fn interval_secs(&self) -> Result<u64> {
        self.sync
            .interval_secs
            .ok_or_else(|| SyncError::Config("missing sync interval".to_string()))
    }
}

fn required<'a>(value: Option<&'a Path>, name: &str) -> Result<&'a Path> {
    match value {
        Some(path) if !path.as_os_str().is_empty() => Ok(path),
        _ => Err(SyncError::Config(format!("missing {name}"))),
    }
}

/// Validated, immutable description of what to mirror where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    source: PathBuf,
    replica: PathBuf,
    interval: Duration,
    log_file: PathBuf,
}

impl SyncTarget {
    /// Validate the roots and prepare the replica.
    ///
    /// Fails when the interval is zero, the source is missing or not a
    /// directory, the two roots overlap, or the log file would live inside
    /// the replica (where it would be pruned). Creates the replica root,
    /// including parents, if it does not exist.
    pub fn new(
        source: &Path,
        replica: &Path,
        interval_secs: u64,
        log_file: &Path,
    ) -> Result<Self> {
        if interval_secs == 0 {
            return Err(SyncError::InvalidInterval(interval_secs));
        }

        if !source.exists() {
            return Err(SyncError::SourceMissing(source.to_path_buf()));
        }
        if !source.is_dir() {
            return Err(SyncError::SourceNotDirectory(source.to_path_buf()));
        }

        let source = source.canonicalize()?;
        let resolved_replica = resolve_path(replica)?;

        if source.starts_with(&resolved_replica) || resolved_replica.starts_with(&source) {
            return Err(SyncError::OverlappingRoots {
                source_root: source,
                replica_root: resolved_replica,
            });
        }

        let log_file = resolve_log_path(log_file)?;
        ensure_log_outside_replica(&log_file, &resolved_replica)?;

        if !replica.is_dir() {
            std::fs::create_dir_all(replica)?;
            info!(
                "Replica folder created under the following path: {}",
                replica.display()
            );
        }
        let replica = replica.canonicalize()?;

        Ok(Self {
            source,
            replica,
            interval: Duration::from_secs(interval_secs),
            log_file,
        })
    }

    /// Validate a merged configuration and build the target from it
    pub fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;
        Self::new(
            config.source()?,
            config.replica()?,
            config.interval_secs()?,
            config.log_file()?,
        )
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn replica(&self) -> &Path {
        &self.replica
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }
}

/// Resolve `path` to an absolute form without creating anything.
///
/// The deepest existing ancestor is canonicalized and the missing tail is
/// appended as given, so paths that do not exist yet compare correctly
/// against canonical roots.
fn resolve_path(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };

    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    let mut resolved = loop {
        match existing.canonicalize() {
            Ok(resolved) => break resolved,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                match (existing.parent(), existing.file_name()) {
                    (Some(parent), Some(name)) => {
                        missing.push(name);
                        existing = parent;
                    }
                    _ => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        }
    };

    for name in missing.into_iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

fn resolve_log_path(log_file: &Path) -> Result<PathBuf> {
    if log_file.file_name().is_none() {
        return Err(SyncError::Config(format!(
            "log path has no file name: {}",
            log_file.display()
        )));
    }
    resolve_path(log_file)
}

/// The prune pass would delete a log file living under the replica root.
fn ensure_log_outside_replica(log_file: &Path, replica: &Path) -> Result<()> {
    if log_file.starts_with(replica) {
        return Err(SyncError::Config(format!(
            "log file {} must not be inside the replica folder",
            log_file.display()
        )));
    }
    Ok(())
}
