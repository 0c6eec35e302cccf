//! Reconciliation of a replica tree against a source tree.
//!
//! Given the two manifests captured at the start of a cycle, the reconciler
//! runs two passes:
//! - **Prune**: every replica path missing from the source is removed.
//! - **Materialize**: every source path that is missing on the replica, or
//!   whose digest differs, is copied over with its metadata.
//!
//! All prunes run before any copy. A failure on one path is recorded in the
//! report and the pass moves on to the next path.

use crate::fs::metadata::{copy_dir_preserving, copy_file_preserving};
use crate::fs::walker::resolve_key;
use crate::manifest::FileManifest;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// How a source path relates to the replica manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// No replica entry at this path
    Added,
    /// Replica entry with a different digest
    Modified,
    /// Replica entry with the same digest
    Unchanged,
}

/// Pure comparison of two manifests
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ManifestDiff<'a> {
    /// Replica paths with no source counterpart
    pub removed: Vec<&'a str>,
    /// Every source path, in path order, with its classification
    pub source_paths: Vec<(&'a str, Change)>,
}

impl ManifestDiff<'_> {
    pub fn count(&self, change: Change) -> usize {
        self.source_paths.iter().filter(|(_, c)| *c == change).count()
    }
}

/// Classify every path of both manifests.
pub fn diff<'a>(source: &'a FileManifest, replica: &'a FileManifest) -> ManifestDiff<'a> {
    let removed = replica
        .iter()
        .filter(|(path, _)| !source.contains(path))
        .map(|(path, _)| path.as_str())
        .collect();

    let source_paths = source
        .iter()
        .map(|(path, digest)| {
            let change = match replica.get(path) {
                None => Change::Added,
                Some(d) if d == digest => Change::Unchanged,
                Some(_) => Change::Modified,
            };
            (path.as_str(), change)
        })
        .collect();

    ManifestDiff {
        removed,
        source_paths,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyKind {
    Create,
    Overwrite,
}

/// A filesystem mutation applied to the replica
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOp {
    RemoveFile {
        relative_path: String,
        path: PathBuf,
    },
    RemoveDir {
        relative_path: String,
        path: PathBuf,
    },
    CopyFile {
        relative_path: String,
        source: PathBuf,
        replica: PathBuf,
        kind: CopyKind,
    },
    CopyDir {
        relative_path: String,
        source: PathBuf,
        replica: PathBuf,
        files: usize,
    },
}

impl SyncOp {
    pub fn relative_path(&self) -> &str {
        match self {
            SyncOp::RemoveFile { relative_path, .. }
            | SyncOp::RemoveDir { relative_path, .. }
            | SyncOp::CopyFile { relative_path, .. }
            | SyncOp::CopyDir { relative_path, .. } => relative_path,
        }
    }

    pub fn is_removal(&self) -> bool {
        matches!(self, SyncOp::RemoveFile { .. } | SyncOp::RemoveDir { .. })
    }
}

impl fmt::Display for SyncOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOp::RemoveFile { path, .. } => write!(f, "File {} removed", path.display()),
            SyncOp::RemoveDir { path, .. } => write!(f, "Directory {} removed", path.display()),
            SyncOp::CopyFile {
                source,
                replica,
                kind: CopyKind::Create,
                ..
            } => write!(f, "File {} copied to {}", source.display(), replica.display()),
            SyncOp::CopyFile {
                source,
                replica,
                kind: CopyKind::Overwrite,
                ..
            } => write!(f, "File {} copied over {}", source.display(), replica.display()),
            SyncOp::CopyDir {
                source,
                replica,
                files,
                ..
            } => write!(
                f,
                "Directory {} copied to {} ({} files)",
                source.display(),
                replica.display(),
                files
            ),
        }
    }
}

/// Which step failed for a path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpAction {
    Remove,
    Copy,
}

/// A per-path failure. The rest of the pass is unaffected.
#[derive(Debug)]
pub struct OpFailure {
    pub relative_path: String,
    pub action: OpAction,
    pub error: io::Error,
}

impl fmt::Display for OpFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self.action {
            OpAction::Remove => "remove",
            OpAction::Copy => "copy",
        };
        write!(f, "Failed to {} {}: {}", verb, self.relative_path, self.error)
    }
}

/// Outcome of one reconciliation pass
#[derive(Debug, Default)]
pub struct ReconcileReport {
    /// Operations applied, in the order they happened
    pub applied: Vec<SyncOp>,
    pub failures: Vec<OpFailure>,
}

impl ReconcileReport {
    /// True when nothing was changed and nothing failed
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty() && self.failures.is_empty()
    }

    pub fn removed(&self) -> usize {
        self.applied.iter().filter(|op| op.is_removal()).count()
    }

    pub fn copied(&self) -> usize {
        self.applied.len() - self.removed()
    }

    fn record(&mut self, op: SyncOp) {
        info!(path = op.relative_path(), "{}", op);
        self.applied.push(op);
    }

    fn fail(&mut self, relative_path: &str, action: OpAction, error: io::Error) {
        let failure = OpFailure {
            relative_path: relative_path.to_string(),
            action,
            error,
        };
        error!("{}", failure);
        self.failures.push(failure);
    }
}

/// Bring `replica_root` in line with the captured source manifest.
pub fn reconcile(
    source: &FileManifest,
    replica: &FileManifest,
    source_root: &Path,
    replica_root: &Path,
) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    let plan = diff(source, replica);

    // Prune pass
    for relative_path in plan.removed {
        if source.is_unreadable(relative_path) {
            debug!(path = relative_path, "Keeping replica path the source scan could not read");
            continue;
        }

        let path = resolve_key(replica_root, relative_path);
        match remove_path(relative_path, &path) {
            Ok(op) => report.record(op),
            Err(e) => report.fail(relative_path, OpAction::Remove, e),
        }
    }

    // Materialize pass
    for (relative_path, change) in plan.source_paths {
        let replica_path = resolve_key(replica_root, relative_path);
        let present = fs::symlink_metadata(&replica_path).is_ok_and(|m| m.is_file());
        if change == Change::Unchanged && present {
            continue;
        }

        let source_path = resolve_key(source_root, relative_path);
        if let Err(e) = materialize(
            &mut report,
            relative_path,
            &source_path,
            &replica_path,
            replica_root,
        ) {
            report.fail(relative_path, OpAction::Copy, e);
        }
    }

    report
}

fn remove_path(relative_path: &str, path: &Path) -> io::Result<SyncOp> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)?;
        Ok(SyncOp::RemoveDir {
            relative_path: relative_path.to_string(),
            path: path.to_path_buf(),
        })
    } else {
        fs::remove_file(path)?;
        Ok(SyncOp::RemoveFile {
            relative_path: relative_path.to_string(),
            path: path.to_path_buf(),
        })
    }
}

fn materialize(
    report: &mut ReconcileReport,
    relative_path: &str,
    source_path: &Path,
    replica_path: &Path,
    replica_root: &Path,
) -> io::Result<()> {
    if let Some(parent) = replica_path.parent() {
        ensure_parent_dirs(report, replica_root, parent)?;
    }
    let existing = fs::symlink_metadata(replica_path).ok();

    // Anything other than a regular file in the way is replaced wholesale.
    let kind = match existing {
        None => CopyKind::Create,
        Some(m) if m.is_file() => CopyKind::Overwrite,
        Some(_) => {
            report.record(remove_path(relative_path, replica_path)?);
            CopyKind::Create
        }
    };

    if fs::metadata(source_path)?.is_dir() {
        let files = copy_dir_preserving(source_path, replica_path)?;
        report.record(SyncOp::CopyDir {
            relative_path: relative_path.to_string(),
            source: source_path.to_path_buf(),
            replica: replica_path.to_path_buf(),
            files,
        });
    } else {
        copy_file_preserving(source_path, replica_path)?;
        report.record(SyncOp::CopyFile {
            relative_path: relative_path.to_string(),
            source: source_path.to_path_buf(),
            replica: replica_path.to_path_buf(),
            kind,
        });
    }

    Ok(())
}

/// Create `parent` and its ancestors under the replica root. Any component
/// that is not a real directory (a file, or a symlink even to a directory) is
/// removed first, so writes never follow a link out of the replica.
fn ensure_parent_dirs(
    report: &mut ReconcileReport,
    replica_root: &Path,
    parent: &Path,
) -> io::Result<()> {
    let relative = parent
        .strip_prefix(replica_root)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    fs::create_dir_all(replica_root)?;
    let mut current = replica_root.to_path_buf();
    let mut key = String::new();
    for component in relative.components() {
        current.push(component);
        if !key.is_empty() {
            key.push('/');
        }
        key.push_str(&component.as_os_str().to_string_lossy());

        match fs::symlink_metadata(&current) {
            Ok(metadata) if metadata.is_dir() => continue,
            Ok(_) => report.record(remove_path(&key, &current)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        fs::create_dir(&current)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::walker::WalkFailure;
    use crate::manifest::{build_manifest, ContentDigest};
    use filetime::FileTime;
    use tempfile::TempDir;

    struct Trees {
        _temp: TempDir,
        source: PathBuf,
        replica: PathBuf,
    }

    fn trees() -> io::Result<Trees> {
        let temp = TempDir::new()?;
        let source = temp.path().join("source");
        let replica = temp.path().join("replica");
        fs::create_dir(&source)?;
        fs::create_dir(&replica)?;
        Ok(Trees {
            _temp: temp,
            source,
            replica,
        })
    }

    fn write(root: &Path, relative: &str, content: &str) -> io::Result<()> {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)
    }

    fn sync(t: &Trees) -> ReconcileReport {
        let source = build_manifest(&t.source);
        let replica = build_manifest(&t.replica);
        reconcile(&source, &replica, &t.source, &t.replica)
    }

    fn assert_converged(t: &Trees) {
        assert!(build_manifest(&t.source).same_entries(&build_manifest(&t.replica)));
    }

    #[test]
    fn empty_trees_produce_no_operations() -> io::Result<()> {
        let t = trees()?;
        let report = sync(&t);
        assert!(report.is_noop());
        assert!(build_manifest(&t.replica).is_empty());
        Ok(())
    }

    #[test]
    fn new_file_is_copied() -> io::Result<()> {
        let t = trees()?;
        write(&t.source, "file1.txt", "hello")?;

        let report = sync(&t);
        assert_eq!(report.applied.len(), 1);
        assert!(matches!(
            &report.applied[0],
            SyncOp::CopyFile { relative_path, kind: CopyKind::Create, .. } if relative_path == "file1.txt"
        ));
        assert_eq!(fs::read_to_string(t.replica.join("file1.txt"))?, "hello");
        Ok(())
    }

    #[test]
    fn identical_content_is_left_alone() -> io::Result<()> {
        let t = trees()?;
        write(&t.source, "file1.txt", "hello")?;
        write(&t.replica, "file1.txt", "hello")?;

        assert!(sync(&t).is_noop());
        Ok(())
    }

    #[test]
    fn changed_content_is_overwritten() -> io::Result<()> {
        let t = trees()?;
        write(&t.source, "file1.txt", "world")?;
        write(&t.replica, "file1.txt", "hello")?;

        let report = sync(&t);
        assert_eq!(report.applied.len(), 1);
        assert!(matches!(
            &report.applied[0],
            SyncOp::CopyFile { kind: CopyKind::Overwrite, .. }
        ));
        assert_eq!(fs::read_to_string(t.replica.join("file1.txt"))?, "world");
        Ok(())
    }

    #[test]
    fn stale_replica_file_is_removed() -> io::Result<()> {
        let t = trees()?;
        write(&t.replica, "stale.txt", "old")?;

        let report = sync(&t);
        assert_eq!(report.applied.len(), 1);
        assert!(matches!(&report.applied[0], SyncOp::RemoveFile { .. }));
        assert!(!t.replica.join("stale.txt").exists());
        Ok(())
    }

    #[test]
    fn nested_path_creates_parents() -> io::Result<()> {
        let t = trees()?;
        write(&t.source, "dir/nested.txt", "x")?;
        write(&t.source, "a/b/c/d.txt", "deep")?;

        let report = sync(&t);
        assert_eq!(report.copied(), 2);
        assert!(t.replica.join("dir").is_dir());
        assert_eq!(fs::read_to_string(t.replica.join("dir/nested.txt"))?, "x");
        assert_eq!(fs::read_to_string(t.replica.join("a/b/c/d.txt"))?, "deep");
        Ok(())
    }

    #[test]
    fn second_pass_is_idempotent() -> io::Result<()> {
        let t = trees()?;
        write(&t.source, "keep.txt", "1")?;
        write(&t.source, "sub/new.txt", "2")?;
        write(&t.replica, "keep.txt", "0")?;
        write(&t.replica, "gone.txt", "3")?;

        let first = sync(&t);
        assert_eq!(first.applied.len(), 3);
        assert!(first.failures.is_empty());

        assert!(sync(&t).is_noop());
        assert_converged(&t);
        Ok(())
    }

    #[test]
    fn prunes_run_before_copies() -> io::Result<()> {
        let t = trees()?;
        write(&t.source, "renamed.txt", "payload")?;
        write(&t.replica, "original.txt", "payload")?;

        let report = sync(&t);
        let kinds: Vec<bool> = report.applied.iter().map(SyncOp::is_removal).collect();
        assert_eq!(kinds, vec![true, false]);
        assert_converged(&t);
        Ok(())
    }

    #[test]
    fn touched_file_with_same_bytes_is_not_copied() -> io::Result<()> {
        let t = trees()?;
        write(&t.source, "file.txt", "same")?;
        assert_eq!(sync(&t).copied(), 1);

        write(&t.source, "file.txt", "same")?;
        filetime::set_file_mtime(t.source.join("file.txt"), FileTime::from_unix_time(42, 0))?;
        assert!(sync(&t).is_noop());
        Ok(())
    }

    #[test]
    fn copies_preserve_modification_time() -> io::Result<()> {
        let t = trees()?;
        write(&t.source, "file.txt", "content")?;
        let pinned = FileTime::from_unix_time(1_500_000_000, 0);
        filetime::set_file_mtime(t.source.join("file.txt"), pinned)?;

        sync(&t);

        let metadata = fs::metadata(t.replica.join("file.txt"))?;
        assert_eq!(FileTime::from_last_modification_time(&metadata), pinned);
        Ok(())
    }

    #[test]
    fn replica_file_deleted_after_scan_is_recopied() -> io::Result<()> {
        let t = trees()?;
        write(&t.source, "file.txt", "content")?;
        write(&t.replica, "file.txt", "content")?;

        let source = build_manifest(&t.source);
        let replica = build_manifest(&t.replica);
        fs::remove_file(t.replica.join("file.txt"))?;

        let report = reconcile(&source, &replica, &t.source, &t.replica);
        assert_eq!(report.copied(), 1);
        assert_eq!(fs::read_to_string(t.replica.join("file.txt"))?, "content");
        Ok(())
    }

    #[test]
    fn failure_on_one_path_does_not_stop_others() -> io::Result<()> {
        let t = trees()?;
        write(&t.source, "a.txt", "a")?;
        write(&t.source, "b.txt", "b")?;

        let source = build_manifest(&t.source);
        let replica = build_manifest(&t.replica);
        fs::remove_file(t.source.join("a.txt"))?;

        let report = reconcile(&source, &replica, &t.source, &t.replica);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].relative_path, "a.txt");
        assert_eq!(report.failures[0].action, OpAction::Copy);
        assert_eq!(report.copied(), 1);
        assert_eq!(fs::read_to_string(t.replica.join("b.txt"))?, "b");
        Ok(())
    }

    #[test]
    fn unreadable_source_paths_are_not_pruned() -> io::Result<()> {
        let t = trees()?;
        write(&t.replica, "locked/secret.txt", "kept")?;
        write(&t.replica, "loose.txt", "removed")?;

        let mut source = FileManifest::new();
        source.record_failure(WalkFailure {
            path: t.source.join("locked"),
            relative_path: "locked".to_string(),
            message: "permission denied".to_string(),
        });
        let replica = build_manifest(&t.replica);

        let report = reconcile(&source, &replica, &t.source, &t.replica);
        assert_eq!(report.removed(), 1);
        assert!(t.replica.join("locked/secret.txt").exists());
        assert!(!t.replica.join("loose.txt").exists());
        Ok(())
    }

    #[test]
    fn replica_directory_replaced_by_source_file() -> io::Result<()> {
        let t = trees()?;
        write(&t.source, "thing", "now a file")?;
        write(&t.replica, "thing/inner.txt", "was a directory")?;

        let report = sync(&t);
        assert!(report.failures.is_empty());
        assert_eq!(fs::read_to_string(t.replica.join("thing"))?, "now a file");
        assert_converged(&t);
        Ok(())
    }

    #[test]
    fn replica_file_replaced_by_source_directory() -> io::Result<()> {
        let t = trees()?;
        write(&t.source, "thing/inner.txt", "now a directory")?;
        write(&t.replica, "thing", "was a file")?;

        let report = sync(&t);
        assert!(report.failures.is_empty());
        assert_eq!(
            fs::read_to_string(t.replica.join("thing/inner.txt"))?,
            "now a directory"
        );
        assert_converged(&t);
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn symlinked_replica_directory_is_replaced_not_written_through() -> io::Result<()> {
        let t = trees()?;
        let outside = t._temp.path().join("outside");
        fs::create_dir(&outside)?;
        write(&t.source, "a/x.txt", "payload")?;
        std::os::unix::fs::symlink(&outside, t.replica.join("a"))?;

        let first = sync(&t);
        assert!(first.failures.is_empty());
        assert!(!outside.join("x.txt").exists());
        assert!(fs::symlink_metadata(t.replica.join("a"))?.is_dir());
        assert_eq!(fs::read_to_string(t.replica.join("a/x.txt"))?, "payload");

        assert!(sync(&t).is_noop());
        assert_converged(&t);
        Ok(())
    }

    #[test]
    fn source_entry_that_became_a_directory_is_copied_whole() -> io::Result<()> {
        let t = trees()?;
        let mut source = FileManifest::new();
        source.insert("bundle", ContentDigest::of_bytes(b"stale"));
        write(&t.source, "bundle/one.txt", "1")?;
        write(&t.source, "bundle/two/three.txt", "3")?;

        let report = reconcile(&source, &FileManifest::new(), &t.source, &t.replica);
        assert!(matches!(
            &report.applied[..],
            [SyncOp::CopyDir { files: 2, .. }]
        ));
        assert_converged(&t);
        Ok(())
    }

    #[test]
    fn copied_directory_is_pruned_as_a_unit() -> io::Result<()> {
        let t = trees()?;
        write(&t.replica, "bundle/one.txt", "1")?;
        let mut replica = FileManifest::new();
        replica.insert("bundle", ContentDigest::of_bytes(b"1"));

        let report = reconcile(&FileManifest::new(), &replica, &t.source, &t.replica);
        assert!(matches!(&report.applied[..], [SyncOp::RemoveDir { .. }]));
        assert!(!t.replica.join("bundle").exists());
        Ok(())
    }

    #[test]
    fn empty_directories_are_not_mirrored_or_pruned() -> io::Result<()> {
        let t = trees()?;
        fs::create_dir_all(t.source.join("only-in-source"))?;
        fs::create_dir_all(t.replica.join("only-in-replica/nested"))?;

        assert!(sync(&t).is_noop());
        assert!(!t.replica.join("only-in-source").exists());
        assert!(t.replica.join("only-in-replica/nested").is_dir());
        Ok(())
    }

    #[test]
    fn diff_classifies_paths() {
        let mut source = FileManifest::new();
        source.insert("same.txt", ContentDigest::of_bytes(b"same"));
        source.insert("changed.txt", ContentDigest::of_bytes(b"new"));
        source.insert("added.txt", ContentDigest::of_bytes(b"added"));

        let mut replica = FileManifest::new();
        replica.insert("same.txt", ContentDigest::of_bytes(b"same"));
        replica.insert("changed.txt", ContentDigest::of_bytes(b"old"));
        replica.insert("removed.txt", ContentDigest::of_bytes(b"removed"));

        let d = diff(&source, &replica);
        assert_eq!(d.removed, vec!["removed.txt"]);
        assert_eq!(
            d.source_paths,
            vec![
                ("added.txt", Change::Added),
                ("changed.txt", Change::Modified),
                ("same.txt", Change::Unchanged),
            ]
        );
        assert_eq!(d.count(Change::Modified), 1);
    }
}
