//! Workspace snapshot and restore.
//!
//! A snapshot is a path→content map over the files the predicate selects:
//! project source files under the configured source prefixes, plus the
//! failing artifact. Restore writes every captured file back atomically
//! and deletes any currently-matching file absent from the snapshot, so
//! repair-created files are undone too.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::config::SnapshotConfig;
use crate::workspace::Workspace;

/// Selects which files are captured and which are eligible for deletion
/// during restore.
#[derive(Debug, Clone)]
pub struct SnapshotPredicate {
    source_extension: String,
    source_prefixes: Vec<String>,
    failing_artifact: Option<String>,
}

impl SnapshotPredicate {
    pub fn new(config: &SnapshotConfig, failing_artifact: Option<String>) -> Self {
        Self {
            source_extension: config.source_extension.clone(),
            source_prefixes: config.source_prefixes.clone(),
            failing_artifact,
        }
    }

    /// Whether a workspace-relative path belongs in the snapshot.
    pub fn matches(&self, relative: &str) -> bool {
        if self
            .failing_artifact
            .as_deref()
            .map(|a| a == relative)
            .unwrap_or(false)
        {
            return true;
        }
        relative.ends_with(&self.source_extension)
            && self.source_prefixes.iter().any(|p| relative.starts_with(p))
    }
}

/// Captured state of the predicate-selected files.
#[derive(Debug, Clone)]
pub struct WorkspaceSnapshot {
    files: BTreeMap<String, String>,
    predicate: SnapshotPredicate,
}

impl WorkspaceSnapshot {
    /// Capture every matching file under the workspace root.
    pub fn capture(ws: &Workspace, predicate: SnapshotPredicate) -> Result<Self> {
        let mut files = BTreeMap::new();
        for entry in WalkDir::new(ws.root())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let relative = ws.display_path(entry.path());
            if !predicate.matches(&relative) {
                continue;
            }
            let content = fs::read_to_string(entry.path())
                .with_context(|| format!("snapshotting {relative}"))?;
            files.insert(relative, content);
        }
        info!(files = files.len(), "workspace snapshot captured");
        Ok(Self { files, predicate })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains(&self, relative: &str) -> bool {
        self.files.contains_key(relative)
    }

    /// Write every captured file back and delete matching files that were
    /// not captured. Idempotent: restoring twice yields the same file set.
    pub fn restore(&self, ws: &Workspace) -> Result<()> {
        for (relative, content) in &self.files {
            let resolved = ws
                .resolve(relative)
                .with_context(|| format!("resolving {relative} for restore"))?;
            if let Some(parent) = resolved.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating parent of {relative}"))?;
            }
            atomic_write(&resolved, content)
                .with_context(|| format!("restoring {relative}"))?;
        }

        // matching files the repair created are removed
        let stale: Vec<_> = WalkDir::new(ws.root())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| (e.path().to_path_buf(), ws.display_path(e.path())))
            .filter(|(_, rel)| self.predicate.matches(rel) && !self.files.contains_key(rel))
            .collect();
        for (path, relative) in stale {
            debug!(%relative, "removing repair-created file during restore");
            fs::remove_file(&path).with_context(|| format!("removing {relative}"))?;
        }

        info!(files = self.files.len(), "workspace restored from snapshot");
        Ok(())
    }
}

/// Temp-file-plus-rename write, bounding the blast radius of an
/// interruption to one file.
fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension("snapshot-tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workspace::tools::{read_file, write_file};
    use tempfile::tempdir;

    fn config() -> SnapshotConfig {
        SnapshotConfig {
            source_extension: ".py".into(),
            source_prefixes: vec!["src/".into()],
        }
    }

    #[test]
    fn test_predicate_selects_sources_and_artifact() {
        let pred = SnapshotPredicate::new(&config(), Some("tests/test_calc.py".into()));
        assert!(pred.matches("src/calculator.py"));
        assert!(pred.matches("tests/test_calc.py"));
        assert!(!pred.matches("tests/test_other.py"));
        assert!(!pred.matches("src/notes.txt"));
        assert!(!pred.matches("README.md"));
    }

    #[test]
    fn test_capture_and_restore_round_trip() {
        let dir = tempdir().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        write_file(&ws, "src/calculator.py", "return a * b\n").unwrap();
        write_file(&ws, "README.md", "readme\n").unwrap();

        let snapshot =
            WorkspaceSnapshot::capture(&ws, SnapshotPredicate::new(&config(), None)).unwrap();
        assert_eq!(snapshot.len(), 1);

        // corrupt the source and add a repair-created file
        write_file(&ws, "src/calculator.py", "return a / b\n").unwrap();
        write_file(&ws, "src/helper.py", "injected\n").unwrap();

        snapshot.restore(&ws).unwrap();
        assert_eq!(read_file(&ws, "src/calculator.py").unwrap(), "return a * b\n");
        assert!(read_file(&ws, "src/helper.py").is_err(), "created file must be deleted");
        assert_eq!(read_file(&ws, "README.md").unwrap(), "readme\n");
    }

    #[test]
    fn test_restore_is_idempotent() {
        let dir = tempdir().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        write_file(&ws, "src/a.py", "original\n").unwrap();

        let snapshot =
            WorkspaceSnapshot::capture(&ws, SnapshotPredicate::new(&config(), None)).unwrap();
        write_file(&ws, "src/a.py", "mutated\n").unwrap();

        snapshot.restore(&ws).unwrap();
        let first = read_file(&ws, "src/a.py").unwrap();
        snapshot.restore(&ws).unwrap();
        let second = read_file(&ws, "src/a.py").unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "original\n");
    }

    #[test]
    fn test_non_matching_repair_files_survive_restore() {
        let dir = tempdir().unwrap();
        let ws = Workspace::open(dir.path()).unwrap();
        write_file(&ws, "src/a.py", "original\n").unwrap();
        let snapshot =
            WorkspaceSnapshot::capture(&ws, SnapshotPredicate::new(&config(), None)).unwrap();

        write_file(&ws, "notes.txt", "kept\n").unwrap();
        snapshot.restore(&ws).unwrap();
        assert_eq!(read_file(&ws, "notes.txt").unwrap(), "kept\n");
    }
}
