//! Configuration loading and the per-run context.
//!
//! Two YAML layers live in the config directory: `default.yaml` (base
//! defaults) and `reclaim.yaml` (overrides, also the durable milestone
//! queue). Merge is shallow with recursive descent into nested mappings;
//! the override wins on conflict and lists are taken wholesale from the
//! override layer.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::checks::TruthCheck;
use crate::error::{AgentError, Result};
use crate::milestone::Milestone;

/// Base defaults layer filename.
pub const DEFAULT_LAYER: &str = "default.yaml";
/// Override layer filename; rewritten in place on milestone transitions.
pub const OVERRIDE_LAYER: &str = "reclaim.yaml";

// =============================================================================
// Env helpers
// =============================================================================

/// Parse a boolean flag from the environment ("1", "true", "yes", "y", "on").
#[must_use]
pub fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| {
            matches!(
                v.trim().to_lowercase().as_str(),
                "1" | "true" | "yes" | "y" | "on"
            )
        })
        .unwrap_or(false)
}

/// Parse an integer from the environment, falling back to `default`.
#[must_use]
pub fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parse a float from the environment, absent or unparsable -> `None`.
#[must_use]
pub fn env_f64(name: &str) -> Option<f64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

// =============================================================================
// Run mode
// =============================================================================

/// What the orchestrator should attempt this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum AgentMode {
    /// Only attempt the fix flow.
    Fix,
    /// Only attempt the milestone flow.
    Milestone,
    /// Probe health first: red repo -> fix flow, green repo -> milestone flow.
    #[default]
    Auto,
}

impl std::fmt::Display for AgentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fix => write!(f, "fix"),
            Self::Milestone => write!(f, "milestone"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

// =============================================================================
// Merged YAML config
// =============================================================================

/// Content of the merged YAML layers, validated once at load time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub truth_checks: Vec<TruthCheck>,
    #[serde(default)]
    pub milestones: Vec<Milestone>,
    /// Free-text constraint strings injected into every prompt.
    #[serde(default)]
    pub repo_rules: Vec<String>,
    #[serde(default = "default_max_files")]
    pub max_files: u32,
    #[serde(default = "default_max_lines")]
    pub max_lines: u32,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Subdirectory of the repo where truth checks run.
    #[serde(default = "default_build_dir")]
    pub build_dir: String,
}

fn default_max_files() -> u32 {
    3
}

fn default_max_lines() -> u32 {
    150
}

fn default_max_attempts() -> u32 {
    3
}

fn default_build_dir() -> String {
    "app".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            truth_checks: Vec::new(),
            milestones: Vec::new(),
            repo_rules: Vec::new(),
            max_files: default_max_files(),
            max_lines: default_max_lines(),
            max_attempts: default_max_attempts(),
            build_dir: default_build_dir(),
        }
    }
}

impl AgentConfig {
    /// Load and merge the two YAML layers from `config_dir`.
    ///
    /// A missing layer file contributes nothing; both missing yields the
    /// built-in defaults (no checks, no milestones).
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a layer exists but cannot be read
    /// or parsed, or when the merged document does not match the schema.
    pub fn load(config_dir: &Path) -> Result<Self> {
        let base = load_layer(&config_dir.join(DEFAULT_LAYER))?;
        let overlay = load_layer(&config_dir.join(OVERRIDE_LAYER))?;
        let merged = merge_values(base, overlay);
        if merged.is_null() {
            return Ok(Self::default());
        }
        serde_yaml::from_value(merged).map_err(|e| {
            AgentError::config_with_path(
                format!("merged config does not match schema: {e}"),
                config_dir.to_path_buf(),
            )
        })
    }

    /// Path of the override layer inside `config_dir`.
    #[must_use]
    pub fn override_path(config_dir: &Path) -> PathBuf {
        config_dir.join(OVERRIDE_LAYER)
    }
}

fn load_layer(path: &Path) -> Result<serde_yaml::Value> {
    if !path.exists() {
        return Ok(serde_yaml::Value::Null);
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| AgentError::config_with_path(e.to_string(), path.to_path_buf()))?;
    serde_yaml::from_str(&text)
        .map_err(|e| AgentError::config_with_path(e.to_string(), path.to_path_buf()))
}

/// Merge two YAML documents where `overlay` wins.
///
/// Nested mappings merge recursively; scalars and sequences are replaced
/// wholesale by the overlay value.
#[must_use]
pub fn merge_values(base: serde_yaml::Value, overlay: serde_yaml::Value) -> serde_yaml::Value {
    use serde_yaml::Value;
    match (base, overlay) {
        (base, Value::Null) => base,
        (Value::Mapping(mut base_map), Value::Mapping(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_val) => merge_values(base_val, overlay_val),
                    None => overlay_val,
                };
                base_map.insert(key, merged);
            }
            Value::Mapping(base_map)
        }
        (_, overlay) => overlay,
    }
}

// =============================================================================
// Run context
// =============================================================================

/// Process-wide, read-only context assembled once at startup from
/// environment variables and the merged config.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Local checkout of the target repository.
    pub repo_path: PathBuf,
    /// `owner/repo` on the remote.
    pub repo_name: String,
    pub default_branch: String,
    pub build_dir: String,
    pub mode: AgentMode,
    /// Convert terminal failures into propagated errors (non-zero exit).
    pub strict: bool,
    pub max_files: u32,
    pub max_lines: u32,
    pub max_attempts: u32,
}

impl RunContext {
    /// Build the context, validating that the repo path exists.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::RepoNotFound`] when `repo_path` is not a
    /// directory.
    pub fn new(
        repo_path: PathBuf,
        repo_name: String,
        default_branch: String,
        mode: AgentMode,
        strict: bool,
        config: &AgentConfig,
    ) -> Result<Self> {
        if !repo_path.is_dir() {
            return Err(AgentError::RepoNotFound { path: repo_path });
        }
        Ok(Self {
            repo_path,
            repo_name,
            default_branch,
            build_dir: config.build_dir.clone(),
            mode,
            strict,
            max_files: config.max_files,
            max_lines: config.max_lines,
            max_attempts: config.max_attempts,
        })
    }

    /// Directory truth checks run in.
    #[must_use]
    pub fn check_dir(&self) -> PathBuf {
        self.repo_path.join(&self.build_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_merge_scalar_override_wins() {
        let base: serde_yaml::Value = serde_yaml::from_str("max_files: 3\nmax_lines: 150").unwrap();
        let overlay: serde_yaml::Value = serde_yaml::from_str("max_files: 5").unwrap();
        let merged = merge_values(base, overlay);
        assert_eq!(merged.get("max_files").unwrap().as_u64(), Some(5));
        assert_eq!(merged.get("max_lines").unwrap().as_u64(), Some(150));
    }

    #[test]
    fn test_merge_nested_mappings_recurse() {
        let base: serde_yaml::Value =
            serde_yaml::from_str("limits:\n  files: 3\n  lines: 150").unwrap();
        let overlay: serde_yaml::Value = serde_yaml::from_str("limits:\n  files: 9").unwrap();
        let merged = merge_values(base, overlay);
        let limits = merged.get("limits").unwrap();
        assert_eq!(limits.get("files").unwrap().as_u64(), Some(9));
        assert_eq!(limits.get("lines").unwrap().as_u64(), Some(150));
    }

    #[test]
    fn test_merge_lists_taken_wholesale() {
        let base: serde_yaml::Value =
            serde_yaml::from_str("repo_rules:\n- a\n- b\n- c").unwrap();
        let overlay: serde_yaml::Value = serde_yaml::from_str("repo_rules:\n- z").unwrap();
        let merged = merge_values(base, overlay);
        let rules = merged.get("repo_rules").unwrap().as_sequence().unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].as_str(), Some("z"));
    }

    #[test]
    fn test_load_merges_layers() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(DEFAULT_LAYER),
            "max_files: 3\ntruth_checks:\n- name: lint\n  command: npm run lint\n",
        )
        .unwrap();
        std::fs::write(
            temp.path().join(OVERRIDE_LAYER),
            "max_files: 7\nmilestones:\n- id: m1\n  title: First\n",
        )
        .unwrap();

        let config = AgentConfig::load(temp.path()).unwrap();
        assert_eq!(config.max_files, 7);
        assert_eq!(config.max_lines, 150);
        assert_eq!(config.truth_checks.len(), 1);
        assert_eq!(config.truth_checks[0].name, "lint");
        assert_eq!(config.milestones.len(), 1);
        assert_eq!(config.milestones[0].id, "m1");
    }

    #[test]
    fn test_load_missing_layers_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let config = AgentConfig::load(temp.path()).unwrap();
        assert_eq!(config.max_files, 3);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.build_dir, "app");
        assert!(config.truth_checks.is_empty());
        assert!(config.milestones.is_empty());
    }

    #[test]
    fn test_load_rejects_malformed_yaml() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join(OVERRIDE_LAYER), "milestones: {not: [valid").unwrap();
        assert!(AgentConfig::load(temp.path()).is_err());
    }

    #[test]
    fn test_run_context_requires_repo_path() {
        let config = AgentConfig::default();
        let err = RunContext::new(
            PathBuf::from("/no/such/checkout"),
            "owner/repo".into(),
            "main".into(),
            AgentMode::Auto,
            false,
            &config,
        )
        .unwrap_err();
        assert!(matches!(err, AgentError::RepoNotFound { .. }));
    }

    #[test]
    fn test_env_flag_values() {
        std::env::set_var("AGENT_TEST_FLAG_A", "TRUE");
        std::env::set_var("AGENT_TEST_FLAG_B", "0");
        assert!(env_flag("AGENT_TEST_FLAG_A"));
        assert!(!env_flag("AGENT_TEST_FLAG_B"));
        assert!(!env_flag("AGENT_TEST_FLAG_UNSET"));
    }
}
