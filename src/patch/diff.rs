//! Unified-diff scanning, structural validation, and failure diagnostics.
//!
//! Validation runs on the normalized diff regardless of origin format, so
//! a defective whole-file normalization is caught by the same rules as a
//! defective model-written diff.

use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

use super::PatchError;

/// Marker git uses for "no previous file" in created-file headers.
const NULL_PATH: &str = "/dev/null";

fn hunk_header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^@@\s+-(\d+)(?:,(\d+))?\s+\+(\d+)(?:,(\d+))?\s+@@").expect("valid regex")
    })
}

fn placeholder_hunk_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^@@\s+\.\.\..*@@").expect("valid regex"))
}

fn zero_length_hunk_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^@@\s+-\d+,0\s+\+\d+,0\s+@@").expect("valid regex"))
}

/// Cut raw model output down to the unified diff starting at the first
/// `--- ` header line. Returns `None` when no header line exists.
#[must_use]
pub fn sanitize_unified_diff(raw: &str) -> Option<String> {
    let mut offset = 0;
    for line in raw.split_inclusive('\n') {
        if line.starts_with("--- ") {
            return Some(raw[offset..].trim_end().to_string());
        }
        offset += line.len();
    }
    None
}

/// Strip the conventional `a/` / `b/` diff prefix from a header path.
fn strip_prefix(path: &str) -> &str {
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
}

/// Header path from a `--- ` or `+++ ` line, without the git prefix.
fn header_path(line: &str) -> Option<&str> {
    let rest = line
        .strip_prefix("--- ")
        .or_else(|| line.strip_prefix("+++ "))?;
    // `git diff` may append a tab plus metadata after the path.
    let path = rest.split('\t').next().unwrap_or(rest).trim();
    if path.is_empty() {
        None
    } else {
        Some(strip_prefix(path))
    }
}

/// All `--- ` header paths in order (the null marker included).
#[must_use]
pub fn old_paths(diff: &str) -> Vec<String> {
    diff.lines()
        .filter(|l| l.starts_with("--- "))
        .filter_map(header_path)
        .map(String::from)
        .collect()
}

/// Deduplicated repo-relative paths the diff touches (old and new sides,
/// null markers excluded), in first-seen order.
#[must_use]
pub fn touched_paths(diff: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for line in diff.lines() {
        if !(line.starts_with("--- ") || line.starts_with("+++ ")) {
            continue;
        }
        if let Some(path) = header_path(line) {
            if path != NULL_PATH && !seen.iter().any(|p| p == path) {
                seen.push(path.to_string());
            }
        }
    }
    seen
}

/// Whether a header path is an obvious placeholder.
///
/// `placeholder` and `dummy` are rejected as substrings; `example` only as
/// a whole path token (stem or component), so `app/src/examples.test.ts`
/// stays legal while `example.ts` and `src/example/foo.ts` do not.
fn is_placeholder_path(path: &str) -> bool {
    let lowered = path.to_lowercase();
    if lowered.contains("placeholder") || lowered.contains("dummy") {
        return true;
    }
    std::path::Path::new(&lowered).components().any(|c| {
        let Some(name) = c.as_os_str().to_str() else {
            return false;
        };
        name == "example" || name.split('.').next() == Some("example")
    })
}

/// Validate the structural and path-safety rules on a normalized diff.
///
/// Check order matters: a placeholder hunk would also fail the "has real
/// hunk headers" rule, and must be reported under its own name.
///
/// # Errors
///
/// The first matching rejection among: `NoPatchFound` (no header pair),
/// `PlaceholderHunk`, `ZeroLengthHunk`, `MissingHunkHeader`,
/// `PlaceholderPath`, `TargetFileMissing`.
pub fn validate_structure(diff: &str, repo_root: &Path) -> Result<(), PatchError> {
    let has_old = diff.lines().any(|l| l.starts_with("--- "));
    let has_new = diff.lines().any(|l| l.starts_with("+++ "));
    if !has_old || !has_new {
        return Err(PatchError::NoPatchFound);
    }

    if placeholder_hunk_re().is_match(diff) {
        return Err(PatchError::PlaceholderHunk);
    }
    if zero_length_hunk_re().is_match(diff) {
        return Err(PatchError::ZeroLengthHunk);
    }
    if !hunk_header_re().is_match(diff) {
        return Err(PatchError::MissingHunkHeader);
    }

    for path in old_paths(diff) {
        if path == NULL_PATH {
            continue;
        }
        if is_placeholder_path(&path) {
            return Err(PatchError::PlaceholderPath { path });
        }
        let on_disk = repo_root.join(&path);
        if !on_disk.is_file() {
            return Err(PatchError::TargetFileMissing { path });
        }
    }
    Ok(())
}

// =============================================================================
// Failure diagnostics
// =============================================================================

/// A hunk location extracted for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// File the hunk targets (old side).
    pub path: String,
    /// 1-based start line on the old side.
    pub old_start: usize,
    /// Line count on the old side.
    pub old_len: usize,
}

/// Extract every hunk with the file it belongs to.
#[must_use]
pub fn hunks(diff: &str) -> Vec<Hunk> {
    let mut result = Vec::new();
    let mut current_path: Option<String> = None;
    for line in diff.lines() {
        if line.starts_with("--- ") {
            current_path = header_path(line)
                .filter(|p| *p != NULL_PATH)
                .map(String::from);
        } else if let Some(caps) = hunk_header_re().captures(line) {
            if let Some(path) = &current_path {
                let old_start = caps[1].parse().unwrap_or(0);
                let old_len = caps
                    .get(2)
                    .map_or(1, |m| m.as_str().parse().unwrap_or(1));
                result.push(Hunk {
                    path: path.clone(),
                    old_start,
                    old_len,
                });
            }
        }
    }
    result
}

/// Render the actual file lines around each hunk's target range.
///
/// Line-number drift between the model's view of a file and its real state
/// is the dominant apply-failure mode; showing the true content around the
/// claimed range lets an operator see the drift at a glance.
#[must_use]
pub fn hunk_context(diff: &str, repo_root: &Path, window: usize) -> String {
    let mut sections = Vec::new();
    for hunk in hunks(diff) {
        let Ok(content) = std::fs::read_to_string(repo_root.join(&hunk.path)) else {
            continue;
        };
        let lines: Vec<&str> = content.lines().collect();
        let start = hunk.old_start.saturating_sub(window + 1);
        let end = (hunk.old_start + hunk.old_len + window - 1).min(lines.len());
        if start >= end {
            continue;
        }
        let mut section = format!(
            "{} around lines {}..{} (hunk claims -{},{}):",
            hunk.path,
            start + 1,
            end,
            hunk.old_start,
            hunk.old_len
        );
        for (idx, line) in lines[start..end].iter().enumerate() {
            section.push_str(&format!("\n{:>5} | {}", start + idx + 1, line));
        }
        sections.push(section);
    }
    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const VALID_HUNK_BODY: &str = "@@ -1,1 +1,1 @@\n-old line\n+new line";

    fn valid_diff_for(path: &str) -> String {
        format!("--- a/{path}\n+++ b/{path}\n{VALID_HUNK_BODY}\n")
    }

    fn repo_with(files: &[(&str, &str)]) -> TempDir {
        let temp = TempDir::new().unwrap();
        for (path, content) in files {
            let full = temp.path().join(path);
            std::fs::create_dir_all(full.parent().unwrap()).unwrap();
            std::fs::write(full, content).unwrap();
        }
        temp
    }

    #[test]
    fn test_sanitize_strips_leading_prose() {
        let raw = "Sure, here is the patch:\n\n--- a/x.ts\n+++ b/x.ts\n@@ -1,1 +1,1 @@\n-a\n+b";
        let diff = sanitize_unified_diff(raw).unwrap();
        assert!(diff.starts_with("--- a/x.ts"));
    }

    #[test]
    fn test_sanitize_none_without_headers() {
        assert!(sanitize_unified_diff("no diff here").is_none());
        assert!(sanitize_unified_diff("NO_PATCH").is_none());
    }

    #[test]
    fn test_touched_paths_dedup_and_null() {
        let diff = "--- /dev/null\n+++ b/new.ts\n@@ -0,0 +1,1 @@\n+x\n--- a/old.ts\n+++ b/old.ts\n@@ -1,1 +1,1 @@\n-a\n+b\n";
        assert_eq!(touched_paths(diff), vec!["new.ts", "old.ts"]);
    }

    #[test]
    fn test_placeholder_hunk_rejected() {
        let temp = repo_with(&[("x.ts", "old line\n")]);
        let diff = "--- a/x.ts\n+++ b/x.ts\n@@ ... @@\n-old\n+new\n";
        assert!(matches!(
            validate_structure(diff, temp.path()),
            Err(PatchError::PlaceholderHunk)
        ));
    }

    #[test]
    fn test_zero_length_hunk_rejected() {
        let temp = repo_with(&[("x.ts", "old line\n")]);
        let diff = "--- a/x.ts\n+++ b/x.ts\n@@ -5,0 +5,0 @@\n";
        assert!(matches!(
            validate_structure(diff, temp.path()),
            Err(PatchError::ZeroLengthHunk)
        ));
    }

    #[test]
    fn test_missing_hunk_header_rejected() {
        let temp = repo_with(&[("x.ts", "old line\n")]);
        let diff = "--- a/x.ts\n+++ b/x.ts\n-old\n+new\n";
        assert!(matches!(
            validate_structure(diff, temp.path()),
            Err(PatchError::MissingHunkHeader)
        ));
    }

    #[test]
    fn test_no_header_pair_rejected() {
        let temp = repo_with(&[]);
        assert!(matches!(
            validate_structure("just some text", temp.path()),
            Err(PatchError::NoPatchFound)
        ));
    }

    #[test]
    fn test_placeholder_path_rejected() {
        let temp = repo_with(&[]);
        let diff = valid_diff_for("app/src/placeholder.ts");
        match validate_structure(&diff, temp.path()) {
            Err(PatchError::PlaceholderPath { path }) => {
                assert_eq!(path, "app/src/placeholder.ts");
            }
            other => panic!("expected PlaceholderPath, got {other:?}"),
        }
    }

    #[test]
    fn test_dummy_path_rejected() {
        let temp = repo_with(&[]);
        let diff = valid_diff_for("src/DummyService.ts");
        assert!(matches!(
            validate_structure(&diff, temp.path()),
            Err(PatchError::PlaceholderPath { .. })
        ));
    }

    #[test]
    fn test_example_token_rejected_but_not_substring() {
        let temp = repo_with(&[("app/src/examples.test.ts", "old line\n")]);

        let token = valid_diff_for("app/src/example.ts");
        assert!(matches!(
            validate_structure(&token, temp.path()),
            Err(PatchError::PlaceholderPath { .. })
        ));

        let legit = valid_diff_for("app/src/examples.test.ts");
        assert!(validate_structure(&legit, temp.path()).is_ok());
    }

    #[test]
    fn test_target_file_missing_names_path() {
        let temp = repo_with(&[]);
        let diff = valid_diff_for("app/src/doesnotexist123.ts");
        match validate_structure(&diff, temp.path()) {
            Err(PatchError::TargetFileMissing { path }) => {
                assert_eq!(path, "app/src/doesnotexist123.ts");
            }
            other => panic!("expected TargetFileMissing, got {other:?}"),
        }
    }

    #[test]
    fn test_dev_null_header_skips_existence_check() {
        let temp = repo_with(&[]);
        let diff = "--- /dev/null\n+++ b/brand/new.ts\n@@ -0,0 +1,1 @@\n+x\n";
        assert!(validate_structure(diff, temp.path()).is_ok());
    }

    #[test]
    fn test_valid_diff_passes() {
        let temp = repo_with(&[("app/src/foo.ts", "old line\n")]);
        let diff = valid_diff_for("app/src/foo.ts");
        assert!(validate_structure(&diff, temp.path()).is_ok());
    }

    #[test]
    fn test_hunks_extraction() {
        let diff = "--- a/a.ts\n+++ b/a.ts\n@@ -10,5 +10,8 @@\n ctx\n--- a/b.ts\n+++ b/b.ts\n@@ -1 +1 @@\n-x\n+y\n";
        let hs = hunks(diff);
        assert_eq!(hs.len(), 2);
        assert_eq!(hs[0], Hunk { path: "a.ts".into(), old_start: 10, old_len: 5 });
        assert_eq!(hs[1], Hunk { path: "b.ts".into(), old_start: 1, old_len: 1 });
    }

    #[test]
    fn test_hunk_context_window() {
        let content: String = (1..=20).map(|i| format!("line {i}\n")).collect();
        let temp = repo_with(&[("f.ts", content.as_str())]);
        let diff = "--- a/f.ts\n+++ b/f.ts\n@@ -10,2 +10,2 @@\n-line 10\n+changed\n line 11\n";
        let ctx = hunk_context(diff, temp.path(), 3);
        assert!(ctx.contains("f.ts around lines 7..14"));
        assert!(ctx.contains("   10 | line 10"));
        assert!(!ctx.contains("line 15"));
    }
}
