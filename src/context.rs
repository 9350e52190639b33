//! Bounded repository context for milestone prompts.
//!
//! The model only sees what fits in the prompt, so context is assembled
//! under a hard character budget: the knowledge-base markdown when one has
//! been generated, otherwise a breadth-limited structure listing, and in
//! both cases a handful of the milestone's target files. Context gathering
//! never fails a run - on any error the prompt simply carries less.

use std::path::PathBuf;
use tracing::debug;

use crate::git::GitWorkspace;
use crate::milestone::Milestone;

/// Hard total character budget for the context block.
const TOTAL_BUDGET: usize = 24_000;
/// Share of the budget the knowledge base may consume.
const KB_BUDGET: usize = 12_000;
/// Maximum target files included.
const MAX_TARGET_FILES: usize = 5;
/// Character cap per included file.
const MAX_CHARS_PER_FILE: usize = 2_000;
/// Maximum paths in the structure listing fallback.
const MAX_LISTED_PATHS: usize = 200;

/// Assembles prompt context from one working copy.
#[derive(Debug)]
pub struct ContextGatherer<'a> {
    git: &'a GitWorkspace,
    kb_path: PathBuf,
}

impl<'a> ContextGatherer<'a> {
    #[must_use]
    pub fn new(git: &'a GitWorkspace, kb_path: PathBuf) -> Self {
        Self { git, kb_path }
    }

    /// Build the context block for a milestone, or `None` when nothing
    /// useful could be gathered.
    pub async fn gather(&self, milestone: &Milestone) -> Option<String> {
        let mut sections: Vec<String> = Vec::new();
        let mut spent = 0usize;

        // Knowledge base first; fall back to a breadth-limited listing.
        if let Ok(kb) = std::fs::read_to_string(&self.kb_path) {
            let clipped = clip(&kb, KB_BUDGET);
            spent += clipped.len();
            sections.push(format!("KNOWLEDGE BASE:\n{clipped}"));
        } else if let Some(listing) = self.structure_listing().await {
            let clipped = clip(&listing, KB_BUDGET);
            spent += clipped.len();
            sections.push(format!("REPOSITORY STRUCTURE:\n{clipped}"));
        }

        for (path, content) in self.target_file_snippets(milestone).await {
            let header_note = if content.len() < MAX_CHARS_PER_FILE {
                "full"
            } else {
                "truncated"
            };
            let section = format!("--- FILE: {path} ({header_note}) ---\n{content}");
            if spent + section.len() > TOTAL_BUDGET {
                debug!("context budget reached; dropping remaining target files");
                break;
            }
            spent += section.len();
            sections.push(section);
        }

        if sections.is_empty() {
            None
        } else {
            Some(sections.join("\n\n"))
        }
    }

    /// Flat listing of tracked paths, breadth-limited.
    async fn structure_listing(&self) -> Option<String> {
        let files = self.git.ls_files(None).await.ok()?;
        if files.is_empty() {
            return None;
        }
        let total = files.len();
        let mut listing: Vec<String> = files.into_iter().take(MAX_LISTED_PATHS).collect();
        if total > listing.len() {
            listing.push(format!("... and {} more files", total - listing.len()));
        }
        Some(listing.join("\n"))
    }

    /// Up to [`MAX_TARGET_FILES`] files matching the milestone's target
    /// patterns, each capped at [`MAX_CHARS_PER_FILE`] characters.
    ///
    /// Ordering bias: `types.*` files first (they anchor the data model),
    /// then files whose names share a keyword with the milestone title,
    /// then everything else in index order.
    async fn target_file_snippets(&self, milestone: &Milestone) -> Vec<(String, String)> {
        let mut matched: Vec<String> = Vec::new();
        for pattern in &milestone.target_files {
            let Ok(paths) = self.git.ls_files(Some(pattern.as_str())).await else {
                continue;
            };
            for path in paths {
                if !matched.contains(&path) {
                    matched.push(path);
                }
            }
        }

        let keywords = title_keywords(&milestone.title);
        matched.sort_by_key(|path| {
            let name = path.rsplit('/').next().unwrap_or(path).to_lowercase();
            if name.starts_with("types.") {
                0
            } else if keywords.iter().any(|kw| name.contains(kw)) {
                1
            } else {
                2
            }
        });

        let mut snippets = Vec::new();
        for path in matched.into_iter().take(MAX_TARGET_FILES) {
            let Ok(content) = std::fs::read_to_string(self.git.root().join(&path)) else {
                continue;
            };
            snippets.push((path, clip(&content, MAX_CHARS_PER_FILE)));
        }
        snippets
    }
}

fn clip(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}

/// Words from the milestone title worth matching filenames against.
fn title_keywords(title: &str) -> Vec<String> {
    title
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.len() > 3)
        .map(str::to_lowercase)
        .collect()
}
