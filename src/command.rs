//! Bounded subprocess execution for checks, acceptance commands, and git.
//!
//! Commands come from operator-written config (truth checks, acceptance
//! commands) and may use shell syntax, or from the agent itself as argv
//! lists. Both run with an explicit timeout and captured output.

use std::path::Path;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

/// Default timeout for operator-configured commands.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Maximum characters of stdout/stderr echoed in debug logs.
const DEBUG_ECHO_LIMIT: usize = 1200;

/// Outcome of a subprocess invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code, if the process ran to completion.
    pub exit_code: Option<i32>,
    /// Captured stdout (complete; callers truncate for diagnostics).
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
    /// Whether the invocation hit its timeout.
    pub timed_out: bool,
}

impl CommandOutput {
    /// Whether the command completed with exit code 0.
    #[must_use]
    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }

    fn timed_out() -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: true,
        }
    }
}

/// Detect shell syntax that requires `bash -c` instead of direct argv exec.
///
/// `cd something` only makes sense in a shell, so it counts too.
#[must_use]
pub fn looks_like_shell(cmd: &str) -> bool {
    let s = cmd.trim();
    if s.is_empty() {
        return false;
    }
    const SHELL_TOKENS: &[&str] = &["&&", "||", ";", "|", ">", "<", "$(", "`"];
    if SHELL_TOKENS.iter().any(|tok| s.contains(tok)) {
        return true;
    }
    s.starts_with("cd ")
}

/// Run an operator-written command string in `cwd` with a timeout.
///
/// Shell syntax is dispatched through `bash -c`; plain commands are split
/// on whitespace and executed directly.
///
/// # Errors
///
/// Returns an error only when the process cannot be spawned or its output
/// cannot be collected. A non-zero exit or a timeout is reported in the
/// returned [`CommandOutput`], not as an error.
pub async fn run_command(
    cmd: &str,
    cwd: &Path,
    timeout: Duration,
    label: &str,
) -> std::io::Result<CommandOutput> {
    let mut command = if looks_like_shell(cmd) {
        let mut c = AsyncCommand::new("bash");
        c.arg("-c").arg(cmd);
        c
    } else {
        let mut parts = cmd.split_whitespace();
        let program = parts.next().unwrap_or_default();
        let mut c = AsyncCommand::new(program);
        c.args(parts);
        c
    };
    command.current_dir(cwd);
    run_prepared(command, cmd, timeout, label).await
}

/// Run an argv list (no shell interpretation) in `cwd` with a timeout.
///
/// # Errors
///
/// Same contract as [`run_command`].
pub async fn run_argv(
    argv: &[&str],
    cwd: &Path,
    timeout: Duration,
    label: &str,
) -> std::io::Result<CommandOutput> {
    let program = argv.first().copied().unwrap_or_default();
    let mut command = AsyncCommand::new(program);
    command.args(&argv[1..]).current_dir(cwd);
    run_prepared(command, &argv.join(" "), timeout, label).await
}

async fn run_prepared(
    mut command: AsyncCommand,
    display_str: &str,
    timeout: Duration,
    label: &str,
) -> std::io::Result<CommandOutput> {
    debug!("[{}] running: {}", label, display_str);

    command
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let child = command.spawn()?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => {
            debug!("[{}] timed out after {:?}", label, timeout);
            return Ok(CommandOutput::timed_out());
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !stdout.is_empty() {
        debug!("[{}] stdout: {}", label, truncate_output(&stdout, DEBUG_ECHO_LIMIT));
    }
    if !stderr.is_empty() {
        debug!("[{}] stderr: {}", label, truncate_output(&stderr, DEBUG_ECHO_LIMIT));
    }

    Ok(CommandOutput {
        exit_code: output.status.code(),
        stdout,
        stderr,
        timed_out: false,
    })
}

/// Truncate captured output to at most `max` characters on a char boundary.
#[must_use]
pub fn truncate_output(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_looks_like_shell_detects_operators() {
        assert!(looks_like_shell("npm run build && npm test"));
        assert!(looks_like_shell("echo hi | grep hi"));
        assert!(looks_like_shell("cat out > log.txt"));
        assert!(looks_like_shell("cd app; npm test"));
        assert!(looks_like_shell("cd app"));
    }

    #[test]
    fn test_looks_like_shell_plain_commands() {
        assert!(!looks_like_shell("npm test"));
        assert!(!looks_like_shell("git status"));
        assert!(!looks_like_shell(""));
        assert!(!looks_like_shell("   "));
    }

    #[test]
    fn test_truncate_output() {
        assert_eq!(truncate_output("hello", 10), "hello");
        assert_eq!(truncate_output("hello", 3), "hel");
        // Multi-byte characters must not be split mid-codepoint.
        assert_eq!(truncate_output("ééé", 2), "éé");
    }

    #[tokio::test]
    async fn test_run_command_success() {
        let out = run_command("true", Path::new("."), Duration::from_secs(5), "test")
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.exit_code, Some(0));
    }

    #[tokio::test]
    async fn test_run_command_nonzero_exit() {
        let out = run_command("false", Path::new("."), Duration::from_secs(5), "test")
            .await
            .unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, Some(1));
    }

    #[tokio::test]
    async fn test_run_command_shell_pipeline() {
        let out = run_command(
            "echo agent | tr a-z A-Z",
            Path::new("."),
            Duration::from_secs(5),
            "test",
        )
        .await
        .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "AGENT");
    }

    #[tokio::test]
    async fn test_run_command_timeout() {
        let out = run_command(
            "sleep 5",
            Path::new("."),
            Duration::from_millis(100),
            "test",
        )
        .await
        .unwrap();
        assert!(out.timed_out);
        assert!(!out.success());
    }

    #[tokio::test]
    async fn test_run_command_spawn_error() {
        let result = run_command(
            "definitely-not-a-real-binary-xyz",
            Path::new("."),
            Duration::from_secs(5),
            "test",
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_argv() {
        let out = run_argv(
            &["echo", "-n", "plain"],
            Path::new("."),
            Duration::from_secs(5),
            "test",
        )
        .await
        .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "plain");
    }
}
