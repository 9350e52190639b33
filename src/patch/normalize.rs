//! Whole-file blocks -> unified diff via a stage/diff/rewind sequence.
//!
//! The working copy is the shared mutable resource; this is the only code
//! in the agent that mutates it outside a real apply. The contract: after
//! `normalize_blocks` returns - success or failure - the tracked file set
//! and content are byte-identical to the pre-call state, with no leftover
//! backup files or staged index entries.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::block::FileBlock;
use super::PatchError;
use crate::git::GitWorkspace;

/// Suffix for sibling backups taken while blocks are materialized.
const BACKUP_SUFFIX: &str = ".agent-backup";

/// Produce the unified diff the blocks represent, restoring the working
/// copy unconditionally.
///
/// Sequence per declared file: snapshot existing content to a sibling
/// backup, write the new content (creating parent directories), stage
/// exactly the written paths, take `git diff --cached`, then rewind:
/// unstage, restore backups, delete created files and directories.
///
/// # Errors
///
/// `UnsafeBlockPath` for paths escaping the repo, `Vcs` for git/filesystem
/// failures, `EmptyDiffAfterNormalization` when no byte differs. The
/// rewind runs on every path out of this function; a rewind failure is
/// itself a `Vcs` error because the working copy can no longer be trusted.
pub(super) async fn normalize_blocks(
    git: &GitWorkspace,
    blocks: &[FileBlock],
) -> Result<String, PatchError> {
    for block in blocks {
        if !block.path_is_safe() {
            return Err(PatchError::UnsafeBlockPath {
                path: block.path.clone(),
            });
        }
    }

    let mut stage = StageGuard::new(git.root().to_path_buf());
    let materialized = materialize_and_diff(git, &mut stage, blocks).await;
    let rewound = stage.rewind(git).await;

    let diff = materialized?;
    rewound?;

    if diff.trim().is_empty() {
        return Err(PatchError::EmptyDiffAfterNormalization);
    }
    Ok(diff)
}

async fn materialize_and_diff(
    git: &GitWorkspace,
    stage: &mut StageGuard,
    blocks: &[FileBlock],
) -> Result<String, PatchError> {
    for block in blocks {
        stage.write_block(block)?;
    }

    let paths = stage.paths();
    git.add_paths(&paths)
        .await
        .map_err(|e| PatchError::vcs(e.to_string()))?;
    stage.mark_indexed();

    git.staged_diff(&paths)
        .await
        .map_err(|e| PatchError::vcs(e.to_string()))
}

/// Record of one materialized file.
#[derive(Debug)]
struct StagedFile {
    /// Repo-relative path.
    path: String,
    abs: PathBuf,
    /// Sibling backup of the pre-existing content, when there was one.
    backup: Option<PathBuf>,
    /// Parent directories that did not exist before, deepest first.
    created_dirs: Vec<PathBuf>,
}

/// Tracks everything the materialization touched so it can be undone.
#[derive(Debug)]
struct StageGuard {
    root: PathBuf,
    files: Vec<StagedFile>,
    indexed: bool,
}

impl StageGuard {
    fn new(root: PathBuf) -> Self {
        Self {
            root,
            files: Vec::new(),
            indexed: false,
        }
    }

    fn paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }

    fn mark_indexed(&mut self) {
        self.indexed = true;
    }

    /// Snapshot and overwrite one declared file.
    fn write_block(&mut self, block: &FileBlock) -> Result<(), PatchError> {
        // A later block for the same path just rewrites the content; the
        // first snapshot stays authoritative.
        if let Some(existing) = self.files.iter().find(|f| f.path == block.path) {
            fs::write(&existing.abs, &block.content)
                .map_err(|e| PatchError::vcs(format!("write {}: {e}", block.path)))?;
            return Ok(());
        }

        let abs = self.root.join(&block.path);
        if abs.exists() && !abs.is_file() {
            return Err(PatchError::UnsafeBlockPath {
                path: block.path.clone(),
            });
        }

        let created_dirs = create_missing_parents(&abs)
            .map_err(|e| PatchError::vcs(format!("mkdir for {}: {e}", block.path)))?;

        let backup = if abs.is_file() {
            let backup_path = backup_path_for(&abs);
            fs::copy(&abs, &backup_path)
                .map_err(|e| PatchError::vcs(format!("backup {}: {e}", block.path)))?;
            Some(backup_path)
        } else {
            None
        };

        fs::write(&abs, &block.content)
            .map_err(|e| PatchError::vcs(format!("write {}: {e}", block.path)))?;
        debug!(
            "materialized {} ({}, {} bytes)",
            block.path,
            if backup.is_some() { "replaced" } else { "created" },
            block.content.len()
        );

        self.files.push(StagedFile {
            path: block.path.clone(),
            abs,
            backup,
            created_dirs,
        });
        Ok(())
    }

    /// Undo everything: unstage, restore backups, delete created files and
    /// directories. Collects every failure instead of stopping at the first
    /// so as much of the working copy as possible is restored.
    async fn rewind(&mut self, git: &GitWorkspace) -> Result<(), PatchError> {
        let mut failures: Vec<String> = Vec::new();

        if self.indexed {
            if let Err(e) = git.unstage_paths(&self.paths()).await {
                failures.push(format!("unstage: {e}"));
            }
            self.indexed = false;
        }

        for file in self.files.drain(..).rev() {
            match &file.backup {
                Some(backup) => {
                    if let Err(e) = fs::copy(backup, &file.abs) {
                        failures.push(format!("restore {}: {e}", file.path));
                    }
                    if let Err(e) = fs::remove_file(backup) {
                        failures.push(format!("drop backup for {}: {e}", file.path));
                    }
                }
                None => {
                    if let Err(e) = fs::remove_file(&file.abs) {
                        failures.push(format!("remove created {}: {e}", file.path));
                    }
                }
            }
            for dir in &file.created_dirs {
                // Only empty directories go; a non-empty one means something
                // else legitimately lives there now.
                let _ = fs::remove_dir(dir);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(PatchError::vcs(format!(
                "rewind incomplete: {}",
                failures.join("; ")
            )))
        }
    }
}

fn backup_path_for(abs: &Path) -> PathBuf {
    let name = abs
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    abs.with_file_name(format!("{name}{BACKUP_SUFFIX}"))
}

/// Create missing ancestors of `abs`'s parent; returns them deepest first.
fn create_missing_parents(abs: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut created = Vec::new();
    if let Some(parent) = abs.parent() {
        let mut cursor = parent.to_path_buf();
        while !cursor.exists() {
            created.push(cursor.clone());
            match cursor.parent() {
                Some(p) => cursor = p.to_path_buf(),
                None => break,
            }
        }
        if !created.is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(created)
}
