//! Copying with file metadata preservation.
//!
//! Replica files carry the source's modification time and permission bits, so
//! re-scans and external tools see the source's timestamps rather than the
//! time of the copy.

use filetime::FileTime;
use std::fs;
use std::io;
use std::path::Path;
use walkdir::WalkDir;

/// Timestamps and permissions captured from a source file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMetadata {
    /// Last modification time
    pub modified: FileTime,

    /// Last access time
    pub accessed: FileTime,

    /// File permissions (Unix mode bits)
    pub permissions: Option<u32>,
}

impl FileMetadata {
    /// Extract metadata from a file path (symlinks are followed)
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let metadata = fs::metadata(path)?;

        #[cfg(unix)]
        let permissions = {
            use std::os::unix::fs::PermissionsExt;
            Some(metadata.permissions().mode())
        };

        #[cfg(not(unix))]
        let permissions = None;

        Ok(Self {
            modified: FileTime::from_last_modification_time(&metadata),
            accessed: FileTime::from_last_access_time(&metadata),
            permissions,
        })
    }

    /// Apply this metadata to a file
    pub fn apply_to_path(&self, path: &Path) -> io::Result<()> {
        #[cfg(unix)]
        if let Some(mode) = self.permissions {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
        }

        filetime::set_file_times(path, self.accessed, self.modified)
    }
}

/// Copy a single file, overwriting `destination`, and carry over timestamps
/// and permissions. Returns the number of bytes copied.
pub fn copy_file_preserving(source: &Path, destination: &Path) -> io::Result<u64> {
    let metadata = FileMetadata::from_path(source)?;

    // A read-only replica file cannot be opened for writing.
    if let Ok(existing) = fs::symlink_metadata(destination) {
        if existing.is_file() && existing.permissions().readonly() {
            fs::remove_file(destination)?;
        }
    }

    let bytes = fs::copy(source, destination)?;
    metadata.apply_to_path(destination)?;
    Ok(bytes)
}

/// Copy a directory and everything beneath it into `destination`.
///
/// Returns the number of files copied. Stops at the first failure.
pub fn copy_dir_preserving(source: &Path, destination: &Path) -> io::Result<usize> {
    let mut copied = 0;

    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let target = destination.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            copy_file_preserving(entry.path(), &target)?;
            copied += 1;
        }
    }

    Ok(copied)
}
