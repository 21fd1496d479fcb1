//! Workspace-confined file access.
//!
//! Every path the executor touches is resolved under the workspace root
//! and lexically normalized first; a path that escapes the root is a tool
//! error, never an IO attempt.

pub mod runner;
pub mod tools;

pub use runner::TestRunner;

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("path escapes the workspace root: {0}")]
    PathEscapes(String),
    #[error("path is empty")]
    EmptyPath,
}

/// Handle to the directory all file IO is confined to.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    /// Open (creating if missing) the workspace root. The root must be an
    /// absolute path.
    pub fn open(root: &Path) -> Result<Self> {
        anyhow::ensure!(
            root.is_absolute(),
            "workspace root must be absolute: {}",
            root.display()
        );
        fs::create_dir_all(root)
            .with_context(|| format!("creating workspace root {}", root.display()))?;
        let root = root
            .canonicalize()
            .with_context(|| format!("resolving workspace root {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a workspace-relative path, rejecting anything that would
    /// land outside the root after lexical normalization.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, WorkspaceError> {
        let trimmed = relative.trim();
        if trimmed.is_empty() {
            return Err(WorkspaceError::EmptyPath);
        }
        let candidate = Path::new(trimmed);
        if candidate.is_absolute() {
            return match candidate.strip_prefix(&self.root) {
                Ok(rel) => self.resolve(&rel.to_string_lossy()),
                Err(_) => Err(WorkspaceError::PathEscapes(trimmed.to_string())),
            };
        }

        let mut resolved = self.root.clone();
        let mut depth = 0usize;
        for component in candidate.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    if depth == 0 {
                        return Err(WorkspaceError::PathEscapes(trimmed.to_string()));
                    }
                    resolved.pop();
                    depth -= 1;
                }
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(WorkspaceError::PathEscapes(trimmed.to_string()));
                }
            }
        }
        Ok(resolved)
    }

    /// Workspace-relative display form of an absolute path, with `/`
    /// separators.
    pub fn display_path(&self, absolute: &Path) -> String {
        let rel = absolute.strip_prefix(&self.root).unwrap_or(absolute);
        rel.to_string_lossy().replace('\\', "/")
    }
}
