//! Validated-diff application with dry-run gating and failure enrichment.

use tracing::{debug, warn};

use super::{diff, PatchError};
use crate::git::GitWorkspace;

/// Lines of real file content shown before/after a failing hunk's range.
const CONTEXT_WINDOW: usize = 5;

/// Write the diff to a transient patch file and apply it.
///
/// `git apply --check` runs first; the real apply only happens after the
/// dry-run passes, so a rejected patch leaves the working copy untouched.
/// Rejections carry the tool's stderr plus the actual file content around
/// each hunk's claimed range.
pub(super) async fn apply_diff(git: &GitWorkspace, diff_text: &str) -> Result<(), PatchError> {
    let mut payload = diff_text.to_string();
    if !payload.ends_with('\n') {
        payload.push('\n');
    }

    let patch_file = tempfile::Builder::new()
        .prefix("reclaim-agent-")
        .suffix(".patch")
        .tempfile()
        .map_err(|e| PatchError::vcs(format!("create patch file: {e}")))?;
    std::fs::write(patch_file.path(), &payload)
        .map_err(|e| PatchError::vcs(format!("write patch file: {e}")))?;
    debug!("patch staged at {}", patch_file.path().display());

    match git
        .apply_check(patch_file.path())
        .await
        .map_err(|e| PatchError::vcs(e.to_string()))?
    {
        Ok(()) => {}
        Err(tool_error) => {
            warn!("patch dry-run rejected: {tool_error}");
            return Err(PatchError::DryRunRejected {
                detail: enrich(git, diff_text, &tool_error),
            });
        }
    }

    match git
        .apply(patch_file.path())
        .await
        .map_err(|e| PatchError::vcs(e.to_string()))?
    {
        Ok(()) => Ok(()),
        Err(tool_error) => {
            warn!("patch apply rejected after clean dry-run: {tool_error}");
            Err(PatchError::ApplyRejected {
                detail: enrich(git, diff_text, &tool_error),
            })
        }
    }
}

/// Tool stderr plus a window of actual file lines around each hunk.
fn enrich(git: &GitWorkspace, diff_text: &str, tool_error: &str) -> String {
    let context = diff::hunk_context(diff_text, git.root(), CONTEXT_WINDOW);
    if context.is_empty() {
        tool_error.to_string()
    } else {
        format!("{tool_error}\n\nActual file content around the patch's hunks:\n{context}")
    }
}
