//! Truth checks: named shell commands whose exit codes define repo health.
//!
//! The prober runs every configured check in the repository's build
//! subdirectory and reports the failing ones with bounded captured output.
//! Check results are data, never errors - a red check drives mode selection,
//! it does not abort the run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::command::{run_command, truncate_output, DEFAULT_COMMAND_TIMEOUT};

/// Maximum characters of stdout/stderr captured per failing check.
const CAPTURE_LIMIT: usize = 500;

/// A named shell command whose exit code defines one dimension of repo health.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TruthCheck {
    /// Human-readable check name (e.g. "lint", "typecheck").
    pub name: String,
    /// Shell command to run in the build subdirectory.
    pub command: String,
}

/// A truth check that did not pass, with bounded diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailingCheck {
    pub name: String,
    pub command: String,
    /// Stderr prefix, timeout notice, or spawn error.
    pub error: String,
    /// Stdout prefix.
    pub output: String,
}

/// Abstraction over health probing, so runner tests can script re-probe
/// results without real subprocesses.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Run every configured check and return the failing ones.
    ///
    /// An empty vec means healthy - including the cases where no checks are
    /// configured or the build subdirectory does not exist.
    async fn run_checks(&self) -> Vec<FailingCheck>;
}

#[async_trait]
impl<T: Prober + ?Sized> Prober for std::sync::Arc<T> {
    async fn run_checks(&self) -> Vec<FailingCheck> {
        self.as_ref().run_checks().await
    }
}

/// Prober that executes the configured truth-check commands.
#[derive(Debug, Clone)]
pub struct ShellProber {
    checks: Vec<TruthCheck>,
    /// Directory the checks run in (repo_path/build_dir).
    workdir: PathBuf,
}

impl ShellProber {
    #[must_use]
    pub fn new(checks: Vec<TruthCheck>, workdir: PathBuf) -> Self {
        Self { checks, workdir }
    }
}

#[async_trait]
impl Prober for ShellProber {
    async fn run_checks(&self) -> Vec<FailingCheck> {
        if !self.workdir.is_dir() {
            debug!(
                "build directory {} does not exist - nothing to check",
                self.workdir.display()
            );
            return Vec::new();
        }

        let mut failing = Vec::new();
        for check in &self.checks {
            let result = run_command(
                &check.command,
                &self.workdir,
                DEFAULT_COMMAND_TIMEOUT,
                &check.name,
            )
            .await;

            match result {
                Ok(out) if out.success() => {
                    debug!("check '{}' passed", check.name);
                }
                Ok(out) if out.timed_out => {
                    info!("check '{}' timed out", check.name);
                    failing.push(FailingCheck {
                        name: check.name.clone(),
                        command: check.command.clone(),
                        error: "Command timed out".to_string(),
                        output: String::new(),
                    });
                }
                Ok(out) => {
                    info!(
                        "check '{}' failed with exit code {:?}",
                        check.name, out.exit_code
                    );
                    failing.push(FailingCheck {
                        name: check.name.clone(),
                        command: check.command.clone(),
                        error: truncate_output(&out.stderr, CAPTURE_LIMIT),
                        output: truncate_output(&out.stdout, CAPTURE_LIMIT),
                    });
                }
                Err(e) => {
                    info!("check '{}' could not be invoked: {}", check.name, e);
                    failing.push(FailingCheck {
                        name: check.name.clone(),
                        command: check.command.clone(),
                        error: e.to_string(),
                        output: String::new(),
                    });
                }
            }
        }
        failing
    }
}
