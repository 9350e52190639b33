//! Knowledge-base generation: a markdown map of the target codebase.
//!
//! Structural analysis only - directory tree, per-module file catalog with
//! exported symbols, and key configuration files. The output is saved next
//! to the agent config and preferred by the context gatherer when present,
//! giving milestone prompts a stable, cheap overview of the repository.

use ignore::WalkBuilder;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::Result;

/// Depth shown in the directory tree section.
const TREE_DEPTH: usize = 4;
/// Exported symbols listed per file.
const MAX_SYMBOLS_PER_FILE: usize = 12;

/// Source extensions included in the catalog.
const SOURCE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx"];
/// Config files surfaced in their own section when present.
const KEY_CONFIG_FILES: &[&str] = &[
    "package.json",
    "tsconfig.json",
    "app/package.json",
    "app/tsconfig.json",
];

fn export_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^export\s+(?:default\s+)?(?:async\s+)?(?:function|const|class|interface|type|enum)\s+([A-Za-z0-9_]+)",
        )
        .expect("valid regex")
    })
}

/// Generates the knowledge-base markdown for one checkout.
#[derive(Debug)]
pub struct KnowledgeBaseGenerator {
    repo_path: PathBuf,
    /// Subtree the catalog describes (the build dir's `src`, typically).
    src_rel: PathBuf,
}

impl KnowledgeBaseGenerator {
    #[must_use]
    pub fn new(repo_path: PathBuf, build_dir: &str) -> Self {
        Self {
            repo_path,
            src_rel: PathBuf::from(build_dir).join("src"),
        }
    }

    /// Produce the complete markdown document.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut sections = vec![self.overview()];
        sections.push(self.directory_tree());
        sections.push(self.component_catalog());
        sections.push(self.key_config_files());
        sections.join("\n\n")
    }

    /// Generate and write to `output`, creating parent directories.
    pub fn save(&self, output: &Path) -> Result<()> {
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(output, self.generate())?;
        Ok(())
    }

    fn overview(&self) -> String {
        format!(
            "# Repository Knowledge Base\n\n\
             Generated map of `{}`. Use the directory structure for paths, the\n\
             component catalog for what lives where, and the exported symbols to\n\
             find the code a change should hook into.",
            self.repo_path.display()
        )
    }

    fn directory_tree(&self) -> String {
        let root = self.repo_path.join(&self.src_rel);
        if !root.is_dir() {
            return format!(
                "## Directory Structure\n\n(source path {} not found)",
                self.src_rel.display()
            );
        }
        let mut lines = vec![format!("{}/", self.src_rel.display())];
        build_tree(&root, "", TREE_DEPTH, &mut lines);
        format!("## Directory Structure\n\n```\n{}\n```", lines.join("\n"))
    }

    /// Per-directory file catalog with exported symbols.
    fn component_catalog(&self) -> String {
        let root = self.repo_path.join(&self.src_rel);
        if !root.is_dir() {
            return "## Component Catalog\n\n(no source files found)".to_string();
        }

        // module dir -> [(file, exports)]
        let mut modules: BTreeMap<String, Vec<(String, Vec<String>)>> = BTreeMap::new();
        let walker = WalkBuilder::new(&root).hidden(true).build();
        for entry in walker.flatten() {
            let path = entry.path();
            if !path.is_file() || !has_source_extension(path) {
                continue;
            }
            let Ok(rel) = path.strip_prefix(&root) else {
                continue;
            };
            let module = rel
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map_or("(root)".to_string(), |p| p.to_string_lossy().to_string());
            let exports = std::fs::read_to_string(path)
                .map(|content| {
                    export_regex()
                        .captures_iter(&content)
                        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
                        .take(MAX_SYMBOLS_PER_FILE)
                        .collect()
                })
                .unwrap_or_default();
            let file = rel
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            modules.entry(module).or_default().push((file, exports));
        }

        if modules.is_empty() {
            return "## Component Catalog\n\n(no source files found)".to_string();
        }

        let mut out = String::from("## Component Catalog");
        for (module, mut files) in modules {
            files.sort();
            out.push_str(&format!("\n\n### {module}\n"));
            for (file, exports) in files {
                if exports.is_empty() {
                    out.push_str(&format!("- `{file}`\n"));
                } else {
                    out.push_str(&format!("- `{file}`: {}\n", exports.join(", ")));
                }
            }
        }
        out
    }

    fn key_config_files(&self) -> String {
        let mut found = Vec::new();
        for candidate in KEY_CONFIG_FILES {
            if self.repo_path.join(candidate).is_file() {
                found.push(format!("- `{candidate}`"));
            }
        }
        if found.is_empty() {
            "## Key Configuration Files\n\n(none found)".to_string()
        } else {
            format!("## Key Configuration Files\n\n{}", found.join("\n"))
        }
    }
}

fn has_source_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
}

fn build_tree(dir: &Path, prefix: &str, depth_left: usize, lines: &mut Vec<String>) {
    if depth_left == 0 {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut names: Vec<(String, bool)> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || name == "node_modules" {
                return None;
            }
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            Some((name, is_dir))
        })
        .collect();
    names.sort();

    let count = names.len();
    for (idx, (name, is_dir)) in names.into_iter().enumerate() {
        let last = idx + 1 == count;
        let connector = if last { "└── " } else { "├── " };
        let suffix = if is_dir { "/" } else { "" };
        lines.push(format!("{prefix}{connector}{name}{suffix}"));
        if is_dir {
            let child_prefix = format!("{prefix}{}", if last { "    " } else { "│   " });
            build_tree(&dir.join(&name), &child_prefix, depth_left - 1, lines);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seed_repo() -> TempDir {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("app/src");
        std::fs::create_dir_all(src.join("lib/training")).unwrap();
        std::fs::create_dir_all(src.join("screens")).unwrap();
        std::fs::write(
            src.join("lib/training/engine.ts"),
            "export function startSession() {}\nexport const MAX_SETS = 5;\nconst internal = 1;\n",
        )
        .unwrap();
        std::fs::write(
            src.join("lib/training/types.ts"),
            "export interface Session {}\nexport type SetKind = 'warmup';\n",
        )
        .unwrap();
        std::fs::write(src.join("screens/Home.tsx"), "export default function Home() {}\n")
            .unwrap();
        std::fs::write(temp.path().join("app/package.json"), "{}\n").unwrap();
        temp
    }

    #[test]
    fn test_catalog_lists_modules_and_exports() {
        let temp = seed_repo();
        let kb = KnowledgeBaseGenerator::new(temp.path().to_path_buf(), "app").generate();

        assert!(kb.contains("### lib/training"));
        assert!(kb.contains("`engine.ts`: startSession, MAX_SETS"));
        assert!(kb.contains("Session"));
        assert!(!kb.contains("internal"));
    }

    #[test]
    fn test_tree_shows_directories() {
        let temp = seed_repo();
        let kb = KnowledgeBaseGenerator::new(temp.path().to_path_buf(), "app").generate();
        assert!(kb.contains("app/src/"));
        assert!(kb.contains("training/"));
        assert!(kb.contains("screens/"));
    }

    #[test]
    fn test_key_config_files_detected() {
        let temp = seed_repo();
        let kb = KnowledgeBaseGenerator::new(temp.path().to_path_buf(), "app").generate();
        assert!(kb.contains("`app/package.json`"));
    }

    #[test]
    fn test_missing_src_is_reported_not_fatal() {
        let temp = TempDir::new().unwrap();
        let kb = KnowledgeBaseGenerator::new(temp.path().to_path_buf(), "app").generate();
        assert!(kb.contains("not found"));
    }

    #[test]
    fn test_save_writes_file() {
        let temp = seed_repo();
        let out = temp.path().join("config/knowledge_base.md");
        KnowledgeBaseGenerator::new(temp.path().to_path_buf(), "app")
            .save(&out)
            .unwrap();
        let written = std::fs::read_to_string(out).unwrap();
        assert!(written.contains("# Repository Knowledge Base"));
    }
}
