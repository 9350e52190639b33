//! Thin client over the `git` binary for the working copy.
//!
//! Every repository mutation the agent performs goes through this type, so
//! the patch pipeline and the orchestrator never shell out on their own.
//! All invocations are argv-style (no shell) with explicit timeouts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::command::{run_argv, CommandOutput};
use crate::error::{AgentError, Result};

/// Timeout for quick ref/index operations.
const FAST_TIMEOUT: Duration = Duration::from_secs(30);
/// Timeout for checkout/commit operations.
const LOCAL_TIMEOUT: Duration = Duration::from_secs(60);
/// Timeout for operations that touch the network (pull, push).
const NETWORK_TIMEOUT: Duration = Duration::from_secs(120);

/// Handle on one local checkout.
#[derive(Debug, Clone)]
pub struct GitWorkspace {
    root: PathBuf,
}

impl GitWorkspace {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Repository root this workspace operates on.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn git(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        let mut argv = vec!["git"];
        argv.extend_from_slice(args);
        let label = format!("git {}", args.first().copied().unwrap_or_default());
        run_argv(&argv, &self.root, timeout, &label)
            .await
            .map_err(|e| AgentError::git(args.join(" "), e.to_string()))
    }

    /// Run a git subcommand, mapping non-zero exit to a git error.
    async fn git_ok(&self, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
        let out = self.git(args, timeout).await?;
        if out.timed_out {
            return Err(AgentError::git(args.join(" "), "timed out"));
        }
        if !out.success() {
            return Err(AgentError::git(args.join(" "), out.stderr.trim().to_string()));
        }
        Ok(out)
    }

    // =========================================================================
    // Sync / branches
    // =========================================================================

    /// Check out an existing branch.
    pub async fn checkout(&self, branch: &str) -> Result<()> {
        self.git_ok(&["checkout", branch], LOCAL_TIMEOUT).await?;
        Ok(())
    }

    /// Pull the current branch from its upstream.
    pub async fn pull(&self) -> Result<()> {
        self.git_ok(&["pull"], NETWORK_TIMEOUT).await?;
        Ok(())
    }

    /// Whether a local branch ref exists.
    pub async fn branch_exists(&self, branch: &str) -> Result<bool> {
        let out = self
            .git(&["rev-parse", "--verify", "--quiet", branch], FAST_TIMEOUT)
            .await?;
        Ok(out.success())
    }

    /// Create a branch at HEAD and check it out.
    pub async fn checkout_new(&self, branch: &str) -> Result<()> {
        self.git_ok(&["checkout", "-b", branch], LOCAL_TIMEOUT)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Index / commits
    // =========================================================================

    /// Stage everything in the working tree.
    pub async fn add_all(&self) -> Result<()> {
        self.git_ok(&["add", "-A"], LOCAL_TIMEOUT).await?;
        Ok(())
    }

    /// Stage exactly the given paths.
    pub async fn add_paths(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.git_ok(&args, LOCAL_TIMEOUT).await?;
        Ok(())
    }

    /// Unstage the given paths (keeps working-tree content).
    pub async fn unstage_paths(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["reset", "-q", "HEAD", "--"];
        args.extend(paths.iter().map(String::as_str));
        // `git reset` exits non-zero in an empty repo (no HEAD yet); treat the
        // index as authoritative and fall back to `rm --cached`.
        let out = self.git(&args, LOCAL_TIMEOUT).await?;
        if !out.success() {
            let mut rm_args = vec!["rm", "-r", "-q", "--cached", "--ignore-unmatch", "--"];
            rm_args.extend(paths.iter().map(String::as_str));
            self.git_ok(&rm_args, LOCAL_TIMEOUT).await?;
        }
        Ok(())
    }

    /// Unified diff of the staged state, restricted to `paths` when given.
    pub async fn staged_diff(&self, paths: &[String]) -> Result<String> {
        let mut args = vec!["diff", "--cached", "--no-color"];
        if !paths.is_empty() {
            args.push("--");
            args.extend(paths.iter().map(String::as_str));
        }
        let out = self.git_ok(&args, LOCAL_TIMEOUT).await?;
        Ok(out.stdout)
    }

    /// Commit staged changes with the given message.
    pub async fn commit(&self, message: &str) -> Result<()> {
        self.git_ok(&["commit", "-m", message], LOCAL_TIMEOUT)
            .await?;
        Ok(())
    }

    /// Push the branch, setting upstream on origin.
    pub async fn push(&self, branch: &str) -> Result<()> {
        self.git_ok(&["push", "-u", "origin", branch], NETWORK_TIMEOUT)
            .await?;
        Ok(())
    }

    // =========================================================================
    // File index / patch application
    // =========================================================================

    /// Tracked paths, optionally limited to a glob pattern.
    ///
    /// `git ls-files` respects .gitignore by construction, which keeps the
    /// patch scope check and the context gatherer off generated files.
    pub async fn ls_files(&self, pattern: Option<&str>) -> Result<Vec<String>> {
        let mut args = vec!["ls-files"];
        if let Some(pattern) = pattern {
            args.push("--");
            args.push(pattern);
        }
        let out = self.git_ok(&args, LOCAL_TIMEOUT).await?;
        Ok(out
            .stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    /// Dry-run a patch file against the working copy.
    ///
    /// Returns the tool's stderr on rejection so the caller can enrich it.
    pub async fn apply_check(&self, patch_path: &Path) -> Result<std::result::Result<(), String>> {
        let path = patch_path.to_string_lossy();
        let out = self
            .git(&["apply", "--check", path.as_ref()], NETWORK_TIMEOUT)
            .await?;
        if out.success() {
            Ok(Ok(()))
        } else {
            Ok(Err(out.stderr.trim().to_string()))
        }
    }

    /// Apply a patch file to the working copy.
    pub async fn apply(&self, patch_path: &Path) -> Result<std::result::Result<(), String>> {
        let path = patch_path.to_string_lossy();
        let out = self.git(&["apply", path.as_ref()], NETWORK_TIMEOUT).await?;
        if out.success() {
            Ok(Ok(()))
        } else {
            Ok(Err(out.stderr.trim().to_string()))
        }
    }
}
