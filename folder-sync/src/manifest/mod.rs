//! Content-addressed manifests of a directory tree.
//!
//! A manifest maps every regular file under a root, keyed by its `/`-separated
//! relative path, to the digest of its content. Manifests are rebuilt from
//! scratch on every cycle and never persisted.

pub mod digest;

use crate::fs::walker::{key_is_within, walk_files};
use std::collections::btree_map;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

pub use crate::fs::walker::WalkFailure as ScanFailure;
pub use digest::ContentDigest;

/// Relative path -> content digest for one tree at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileManifest {
    entries: BTreeMap<String, ContentDigest>,
    failures: Vec<ScanFailure>,
}

impl FileManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, relative_path: impl Into<String>, digest: ContentDigest) {
        self.entries.insert(relative_path.into(), digest);
    }

    pub fn get(&self, relative_path: &str) -> Option<&ContentDigest> {
        self.entries.get(relative_path)
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        self.entries.contains_key(relative_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in relative-path order
    pub fn iter(&self) -> btree_map::Iter<'_, String, ContentDigest> {
        self.entries.iter()
    }

    /// Record a path whose content could not be read during the scan
    pub fn record_failure(&mut self, failure: ScanFailure) {
        self.failures.push(failure);
    }

    /// Paths the scan could not read
    pub fn failures(&self) -> &[ScanFailure] {
        &self.failures
    }

    /// True when the scan could not see `relative_path`, either because it
    /// failed itself or because an enclosing directory did.
    pub fn is_unreadable(&self, relative_path: &str) -> bool {
        self.failures
            .iter()
            .any(|f| key_is_within(relative_path, &f.relative_path))
    }

    /// Compare file sets and digests, ignoring scan failures
    pub fn same_entries(&self, other: &FileManifest) -> bool {
        self.entries == other.entries
    }
}

/// Walk `root` and digest every regular file beneath it.
///
/// Unreadable paths are logged and recorded on the manifest; the rest of the
/// tree is still scanned.
pub fn build_manifest(root: &Path) -> FileManifest {
    let mut manifest = FileManifest::new();
    let mut hash_failures = Vec::new();

    let walk_failures = walk_files(root, |file| {
        match ContentDigest::of_file(&file.path) {
            Ok(digest) => manifest.insert(file.relative_path, digest),
            Err(e) => hash_failures.push(ScanFailure {
                path: file.path,
                relative_path: file.relative_path,
                message: e.to_string(),
            }),
        }
    });

    for failure in walk_failures.into_iter().chain(hash_failures) {
        warn!(
            path = %failure.path.display(),
            error = %failure.message,
            "Skipping unreadable path during scan"
        );
        manifest.record_failure(failure);
    }

    manifest
}
