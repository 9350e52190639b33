//! Patch ingestion: model output text in, applied working-copy change out.
//!
//! The model's only contract with the agent is textual: either a unified
//! diff or one or more whole-file blocks. This module turns that text into
//! a single validated unified diff and applies it with `git apply`, or
//! rejects it with a precise, named reason.
//!
//! Pipeline:
//!
//! ```text
//! raw text ──detect──> PatchEnvelope ──validate──> scope check ──apply──> AppliedPatch
//!              │                                                    │
//!              └── whole-file blocks are normalized to a diff       └── dry-run first
//!                  via materialize / stage / diff / rewind
//! ```
//!
//! Every rejection is terminal for the current model call; the orchestrator
//! decides whether to re-prompt.

pub mod block;
pub mod diff;

mod apply;
mod normalize;

pub use block::{parse_file_blocks, FileBlock};

use globset::{Glob, GlobSetBuilder};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info};

use crate::git::GitWorkspace;

/// Why a model response could not be turned into an applied change.
///
/// Each variant names one specific defect; nothing here is a generic
/// "failed". Terminal per call - the ingestor never retries internally.
#[derive(Error, Debug)]
pub enum PatchError {
    #[error("no usable patch found in model output")]
    NoPatchFound,

    #[error("patch contains placeholder hunk headers (@@ ... @@); hunks need real line numbers like @@ -10,5 +10,8 @@")]
    PlaceholderHunk,

    #[error("patch contains zero-length hunks; each hunk must add or remove at least one line")]
    ZeroLengthHunk,

    #[error("patch has no hunk headers; it must include line numbers like @@ -10,5 +10,8 @@")]
    MissingHunkHeader,

    #[error("patch targets placeholder file path '{path}'; real repository paths are required")]
    PlaceholderPath { path: String },

    #[error("patch targets '{path}', which does not exist in the working copy")]
    TargetFileMissing { path: String },

    #[error("patch touches no file inside the milestone's target scope (touched: {touched:?}, allowed patterns: {allowed:?})")]
    OutsideTargetScope {
        touched: Vec<String>,
        allowed: Vec<String>,
    },

    #[error("patch dry-run rejected:\n{detail}")]
    DryRunRejected { detail: String },

    #[error("patch apply rejected:\n{detail}")]
    ApplyRejected { detail: String },

    #[error("whole-file blocks produced an empty diff; content is identical to the working copy")]
    EmptyDiffAfterNormalization,

    /// A block declared a path outside the repository (absolute or `..`).
    #[error("unsafe file path in block: '{path}'")]
    UnsafeBlockPath { path: String },

    /// The underlying VCS invocation itself failed (not a patch defect).
    #[error("vcs failure during patch handling: {detail}")]
    Vcs { detail: String },
}

impl PatchError {
    pub(crate) fn vcs(detail: impl Into<String>) -> Self {
        Self::Vcs {
            detail: detail.into(),
        }
    }
}

/// Content format detected in a model response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchFormat {
    UnifiedDiff,
    FileBlocks,
    Unknown,
}

/// Per-model-call intermediate form; never persisted.
#[derive(Debug, Clone)]
pub struct PatchEnvelope {
    pub raw_text: String,
    pub detected_format: PatchFormat,
    /// Single applicable unified diff, when one could be produced.
    pub normalized_diff: Option<String>,
}

/// A successfully applied change.
#[derive(Debug, Clone)]
pub struct AppliedPatch {
    /// The unified diff that was applied.
    pub diff: String,
    /// Repo-relative paths the diff touched.
    pub touched: Vec<String>,
}

/// The ingestion pipeline, bound to one working copy.
#[derive(Debug)]
pub struct PatchIngestor<'a> {
    git: &'a GitWorkspace,
}

impl<'a> PatchIngestor<'a> {
    #[must_use]
    pub fn new(git: &'a GitWorkspace) -> Self {
        Self { git }
    }

    /// Detect the response format and normalize it into a unified diff.
    ///
    /// Whole-file blocks are tried first; the block parser is strict enough
    /// (matched start/end paths) that a false positive on diff-shaped text
    /// is not possible. Unrecognized text yields an `Unknown` envelope with
    /// no diff.
    ///
    /// # Errors
    ///
    /// Fails when block normalization cannot produce a diff - including the
    /// identical-content case - or when the VCS invocation fails. The
    /// working copy is back in its pre-call state on every error path.
    pub async fn prepare(&self, raw: &str) -> Result<PatchEnvelope, PatchError> {
        let blocks = parse_file_blocks(raw);
        if !blocks.is_empty() {
            info!("detected whole-file format ({} block(s))", blocks.len());
            let normalized = normalize::normalize_blocks(self.git, &blocks).await?;
            return Ok(PatchEnvelope {
                raw_text: raw.to_string(),
                detected_format: PatchFormat::FileBlocks,
                normalized_diff: Some(normalized),
            });
        }

        if let Some(diff) = diff::sanitize_unified_diff(raw) {
            info!("detected unified-diff format");
            return Ok(PatchEnvelope {
                raw_text: raw.to_string(),
                detected_format: PatchFormat::UnifiedDiff,
                normalized_diff: Some(diff),
            });
        }

        debug!("no recognizable patch format in model output");
        Ok(PatchEnvelope {
            raw_text: raw.to_string(),
            detected_format: PatchFormat::Unknown,
            normalized_diff: None,
        })
    }

    /// Full pipeline: detect, normalize, validate, scope-check, apply.
    ///
    /// `scope` carries the milestone's `target_files` globs; `None` (the fix
    /// flow) skips the scope check entirely.
    ///
    /// # Errors
    ///
    /// One of the [`PatchError`] variants; the apply step is never reached
    /// when validation fails, and a failed apply leaves the working copy
    /// unchanged (`git apply --check` gates the real apply).
    pub async fn ingest(
        &self,
        raw: &str,
        scope: Option<&[String]>,
    ) -> Result<AppliedPatch, PatchError> {
        let envelope = self.prepare(raw).await?;
        let normalized = envelope.normalized_diff.ok_or(PatchError::NoPatchFound)?;

        diff::validate_structure(&normalized, self.git.root())?;

        let touched = diff::touched_paths(&normalized);
        if let Some(patterns) = scope {
            if !patterns.is_empty() {
                self.check_scope(&touched, patterns).await?;
            }
        }

        apply::apply_diff(self.git, &normalized).await?;
        info!("patch applied cleanly ({} file(s))", touched.len());

        Ok(AppliedPatch {
            diff: normalized,
            touched,
        })
    }

    /// Reject diffs whose touched set has no overlap with the allowed scope.
    ///
    /// A touched path is in scope when the repository index matches it
    /// against the patterns, or when the path itself matches a pattern (a
    /// new file created inside the scope is not in the index yet).
    async fn check_scope(
        &self,
        touched: &[String],
        patterns: &[String],
    ) -> Result<(), PatchError> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern)
                .map_err(|e| PatchError::vcs(format!("invalid target_files pattern '{pattern}': {e}")))?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|e| PatchError::vcs(format!("could not build target_files matcher: {e}")))?;

        let index = self
            .git
            .ls_files(None)
            .await
            .map_err(|e| PatchError::vcs(e.to_string()))?;
        let allowed: HashSet<&String> = index.iter().filter(|p| set.is_match(p.as_str())).collect();

        let in_scope = touched
            .iter()
            .any(|t| allowed.contains(t) || set.is_match(t.as_str()));
        if !in_scope {
            return Err(PatchError::OutsideTargetScope {
                touched: touched.to_vec(),
                allowed: patterns.to_vec(),
            });
        }
        Ok(())
    }
}
