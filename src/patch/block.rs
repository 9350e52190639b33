//! Parser for the whole-file block format.
//!
//! ```text
//! ===FILE_START: app/src/example.ts===
//! <complete file content>
//! ===FILE_END: app/src/example.ts===
//! ```
//!
//! A block is well-formed only when the start and end markers carry the
//! same path. Malformed blocks are skipped; one well-formed block is enough
//! to commit to this format.

use regex::Regex;
use std::path::Component;
use std::sync::OnceLock;

/// One declared replacement file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlock {
    /// Repo-relative path from the markers.
    pub path: String,
    /// Complete file content, normalized to end with a newline.
    pub content: String,
}

impl FileBlock {
    /// Whether the declared path stays inside the repository.
    ///
    /// Absolute paths and `..` components would let a model write outside
    /// the working copy; both are rejected before anything touches disk.
    #[must_use]
    pub fn path_is_safe(&self) -> bool {
        let path = std::path::Path::new(&self.path);
        !self.path.is_empty()
            && path.is_relative()
            && path
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
    }
}

fn block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?s)===FILE_START:\s*([^\n=]+?)\s*===\r?\n(.*?)\r?\n?===FILE_END:\s*([^\n=]+?)\s*===",
        )
        .expect("block regex is valid")
    })
}

/// Extract every well-formed block from raw model output.
///
/// Blocks whose start and end paths disagree are dropped. Returned content
/// always ends with a newline so materialized files are well-formed.
#[must_use]
pub fn parse_file_blocks(raw: &str) -> Vec<FileBlock> {
    block_regex()
        .captures_iter(raw)
        .filter_map(|caps| {
            let start_path = caps.get(1)?.as_str().trim();
            let end_path = caps.get(3)?.as_str().trim();
            if start_path != end_path {
                return None;
            }
            let mut content = caps.get(2)?.as_str().to_string();
            if !content.ends_with('\n') {
                content.push('\n');
            }
            Some(FileBlock {
                path: start_path.to_string(),
                content,
            })
        })
        .collect()
}
