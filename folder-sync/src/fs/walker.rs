//! Directory traversal producing tree-relative file entries.
//!
//! Traversal is iterative (`walkdir` keeps an explicit stack of open
//! directories), so tree depth is not bounded by the call stack. Failures are
//! collected per path instead of aborting the walk.

use std::path::{Component, Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// A regular file discovered during walking
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// `/`-separated path relative to the walk root
    pub relative_path: String,
}

impl FileInfo {
    /// Create FileInfo from a DirEntry.
    /// Symlinks count as files only when they resolve to a regular file.
    fn from_entry(entry: &DirEntry, relative_path: String) -> std::io::Result<Option<Self>> {
        let raw_metadata = entry.metadata()?;
        let path = entry.path().to_path_buf();

        let is_file = if raw_metadata.is_symlink() {
            // Directory or dangling symlinks are skipped
            std::fs::metadata(&path).is_ok_and(|resolved| resolved.is_file())
        } else {
            // Sockets, FIFOs and devices are skipped too
            raw_metadata.is_file()
        };

        Ok(is_file.then_some(Self {
            path,
            relative_path,
        }))
    }
}

/// A path the walk could not read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkFailure {
    /// Full path that failed
    pub path: PathBuf,

    /// Key of the failed path relative to the root (empty for the root itself)
    pub relative_path: String,

    /// Human-readable cause
    pub message: String,
}

/// Walk a directory tree with a callback for each regular file
///
/// Symlinks are not followed into directories. Directories are descended
/// into but never reported. Returns the list of paths that could not be
/// read; the walk continues past each of them.
///
/// # Example
/// ```no_run
/// use folder_sync::fs::walker::walk_files;
/// use std::path::Path;
///
/// let mut count = 0;
/// let failures = walk_files(Path::new("/data"), |_| count += 1);
/// println!("Found {} files ({} unreadable)", count, failures.len());
/// ```
pub fn walk_files<F>(root: &Path, mut callback: F) -> Vec<WalkFailure>
where
    F: FnMut(FileInfo),
{
    let mut failures = Vec::new();

    let walker = WalkDir::new(root).sort_by_file_name();

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(root).to_path_buf();
                failures.push(failure(root, path, e.to_string()));
                continue;
            }
        };

        if entry.file_type().is_dir() {
            continue;
        }

        let Some(relative_path) = relative_key(root, entry.path()) else {
            failures.push(failure(
                root,
                entry.path().to_path_buf(),
                "path is not valid UTF-8".to_string(),
            ));
            continue;
        };

        match FileInfo::from_entry(&entry, relative_path) {
            Ok(Some(file_info)) => callback(file_info),
            Ok(None) => {}
            Err(e) => failures.push(failure(root, entry.path().to_path_buf(), e.to_string())),
        }
    }

    failures
}

fn failure(root: &Path, path: PathBuf, message: String) -> WalkFailure {
    let relative_path = relative_key(root, &path)
        .unwrap_or_else(|| lossy_key(root, &path));
    WalkFailure {
        path,
        relative_path,
        message,
    }
}

/// Convert a path under `root` into a `/`-separated relative key.
///
/// Returns None when the path is outside `root` or any component is not
/// valid UTF-8.
pub fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            _ => return None,
        }
    }
    Some(parts.join("/"))
}

fn lossy_key(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Resolve a relative key back into a filesystem path under `root`.
pub fn resolve_key(root: &Path, key: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for part in key.split('/').filter(|p| !p.is_empty()) {
        path.push(part);
    }
    path
}

/// True when `key` is `prefix` itself or lies beneath it.
/// The empty prefix covers every key.
pub fn key_is_within(key: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || key == prefix
        || (key.starts_with(prefix) && key.as_bytes().get(prefix.len()) == Some(&b'/'))
}
