//! Testing infrastructure: fixtures and mocks for the external boundaries.
//!
//! Unit and integration tests exercise the real patch pipeline against real
//! temporary git repositories, while the model, the remote repository, and
//! (when scripted re-probe results are needed) the health prober are test
//! doubles with controllable behavior.
//!
//! Shipped in the library (not `#[cfg(test)]`) so the `tests/` directory
//! can use the same doubles as inline module tests.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

use crate::checks::{FailingCheck, Prober};
use crate::command::run_argv;
use crate::error::Result;
use crate::git::GitWorkspace;
use crate::github::{Issue, PullRequest, RemoteRepo};

// =============================================================================
// Git fixture
// =============================================================================

/// A throwaway git repository with identity configured for commits and a
/// local bare `origin`, so pull/push work without a network.
///
/// Dropping the fixture removes everything.
pub struct GitFixture {
    temp: TempDir,
    repo: std::path::PathBuf,
}

impl GitFixture {
    /// Initialize an empty repository on branch `main` with a bare origin.
    ///
    /// # Panics
    ///
    /// Panics when git is unavailable; these fixtures are test-only.
    pub async fn new() -> Self {
        let temp = TempDir::new().expect("create temp dir");
        let origin = temp.path().join("origin.git");
        let repo = temp.path().join("repo");
        std::fs::create_dir_all(&origin).expect("create origin dir");
        std::fs::create_dir_all(&repo).expect("create repo dir");

        let fixture = Self { temp, repo };
        fixture
            .git_in(&fixture.temp.path().join("origin.git"), &["init", "-q", "--bare", "-b", "main"])
            .await;
        fixture.git(&["init", "-q", "-b", "main"]).await;
        fixture.git(&["config", "user.name", "Agent Test"]).await;
        fixture
            .git(&["config", "user.email", "agent-test@example.invalid"])
            .await;
        fixture
            .git(&["remote", "add", "origin", "../origin.git"])
            .await;
        fixture
    }

    pub fn path(&self) -> &Path {
        &self.repo
    }

    #[must_use]
    pub fn workspace(&self) -> GitWorkspace {
        GitWorkspace::new(self.repo.clone())
    }

    async fn git(&self, args: &[&str]) {
        self.git_in(&self.repo, args).await;
    }

    async fn git_in(&self, cwd: &Path, args: &[&str]) {
        let mut argv = vec!["git"];
        argv.extend_from_slice(args);
        let out = run_argv(&argv, cwd, Duration::from_secs(30), "fixture")
            .await
            .expect("spawn git");
        assert!(
            out.success(),
            "fixture git {:?} failed: {}",
            args,
            out.stderr
        );
    }

    /// Write a file (creating parents) and commit it.
    pub async fn write_and_commit(&self, path: &str, content: &str) {
        let full = self.repo.join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).expect("create parents");
        }
        std::fs::write(&full, content).expect("write fixture file");
        self.git(&["add", path]).await;
        self.git(&["commit", "-q", "-m", &format!("add {path}")])
            .await;
    }

    /// Push the current branch to origin with upstream tracking, so a later
    /// `git pull` has something to talk to.
    pub async fn publish(&self) {
        self.git(&["push", "-q", "-u", "origin", "main"]).await;
    }

    /// Working-tree status in porcelain form; empty string means clean.
    pub async fn status(&self) -> String {
        let out = run_argv(
            &["git", "status", "--porcelain"],
            &self.repo,
            Duration::from_secs(30),
            "fixture",
        )
        .await
        .expect("spawn git");
        out.stdout
    }

    /// Branches present on the bare origin.
    pub async fn origin_branches(&self) -> Vec<String> {
        let out = run_argv(
            &["git", "branch", "--format=%(refname:short)"],
            &self.temp.path().join("origin.git"),
            Duration::from_secs(30),
            "fixture",
        )
        .await
        .expect("spawn git");
        out.stdout
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect()
    }
}

// =============================================================================
// Remote repository double
// =============================================================================

/// Recorded call to [`MockRemoteRepo::create_pr`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedPr {
    pub title: String,
    pub body: String,
    pub head: String,
    pub base: String,
}

/// In-memory remote that records every mutation.
#[derive(Debug, Default)]
pub struct MockRemoteRepo {
    /// PRs that already exist, keyed by head branch.
    existing_prs: Mutex<Vec<(String, PullRequest)>>,
    created_branches: Mutex<Vec<String>>,
    created_prs: Mutex<Vec<RecordedPr>>,
    issues: Mutex<Vec<(String, String)>>,
    next_pr_number: AtomicUsize,
}

impl MockRemoteRepo {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_pr_number: AtomicUsize::new(1),
            ..Self::default()
        }
    }

    /// Seed a pre-existing PR for an idempotency scenario.
    #[must_use]
    pub fn with_existing_pr(self, head_branch: &str, html_url: &str) -> Self {
        self.existing_prs.lock().unwrap().push((
            head_branch.to_string(),
            PullRequest {
                number: 9000,
                html_url: html_url.to_string(),
            },
        ));
        self
    }

    pub fn created_branches(&self) -> Vec<String> {
        self.created_branches.lock().unwrap().clone()
    }

    pub fn created_prs(&self) -> Vec<RecordedPr> {
        self.created_prs.lock().unwrap().clone()
    }

    pub fn issues(&self) -> Vec<(String, String)> {
        self.issues.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteRepo for MockRemoteRepo {
    async fn create_branch(&self, branch: &str, _base: &str) -> Result<()> {
        self.created_branches.lock().unwrap().push(branch.to_string());
        Ok(())
    }

    async fn create_pr(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<Option<PullRequest>> {
        self.created_prs.lock().unwrap().push(RecordedPr {
            title: title.to_string(),
            body: body.to_string(),
            head: head.to_string(),
            base: base.to_string(),
        });
        let number = self.next_pr_number.fetch_add(1, Ordering::SeqCst) as u64;
        let pr = PullRequest {
            number,
            html_url: format!("https://github.invalid/pr/{number}"),
        };
        self.existing_prs
            .lock()
            .unwrap()
            .push((head.to_string(), pr.clone()));
        Ok(Some(pr))
    }

    async fn pr_by_branch(&self, branch: &str) -> Result<Option<PullRequest>> {
        Ok(self
            .existing_prs
            .lock()
            .unwrap()
            .iter()
            .find(|(head, _)| head == branch)
            .map(|(_, pr)| pr.clone()))
    }

    async fn create_or_update_issue(&self, title: &str, body: &str) -> Result<Option<Issue>> {
        let mut issues = self.issues.lock().unwrap();
        if let Some(entry) = issues.iter_mut().find(|(t, _)| t == title) {
            entry.1 = body.to_string();
        } else {
            issues.push((title.to_string(), body.to_string()));
        }
        Ok(Some(Issue {
            number: issues.len() as u64,
            html_url: "https://github.invalid/issue/1".to_string(),
            title: title.to_string(),
        }))
    }
}

// =============================================================================
// Prober double
// =============================================================================

/// Prober returning scripted result sets in call order.
///
/// The last scripted set repeats, so "red once, then green" is
/// `ScriptedProber::new(vec![vec![failing], vec![]])`.
#[derive(Debug, Default)]
pub struct ScriptedProber {
    results: Vec<Vec<FailingCheck>>,
    calls: AtomicUsize,
}

impl ScriptedProber {
    #[must_use]
    pub fn new(results: Vec<Vec<FailingCheck>>) -> Self {
        Self {
            results,
            calls: AtomicUsize::new(0),
        }
    }

    /// Prober that always reports green.
    #[must_use]
    pub fn green() -> Self {
        Self::new(vec![Vec::new()])
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn run_checks(&self) -> Vec<FailingCheck> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.results
            .get(call)
            .or_else(|| self.results.last())
            .cloned()
            .unwrap_or_default()
    }
}

/// Convenience constructor for a failing check record.
#[must_use]
pub fn failing_check(name: &str, command: &str, error: &str) -> FailingCheck {
    FailingCheck {
        name: name.to_string(),
        command: command.to_string(),
        error: error.to_string(),
        output: String::new(),
    }
}
