//! GitHub REST client for branch, PR, and issue operations.
//!
//! Only the handful of endpoints the agent needs, spoken over a curl
//! subprocess like the model client. Everything the orchestrator consumes
//! goes through the [`RemoteRepo`] trait so tests can record calls instead
//! of hitting the network.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{AgentError, Result};

const API_BASE: &str = "https://api.github.com";

/// The slice of a pull request the agent cares about.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PullRequest {
    pub number: u64,
    pub html_url: String,
}

/// The slice of an issue the agent cares about.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Issue {
    pub number: u64,
    pub html_url: String,
    pub title: String,
}

/// Remote repository operations the orchestrator depends on.
#[async_trait]
pub trait RemoteRepo: Send + Sync {
    /// Create `branch` from `base` on the remote. Idempotent: an
    /// already-existing branch is success.
    async fn create_branch(&self, branch: &str, base: &str) -> Result<()>;

    /// Open a pull request; `None` when the remote refuses (e.g. no diff).
    async fn create_pr(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<Option<PullRequest>>;

    /// Look up a PR (any state) by its head branch - the idempotency key
    /// for both flows.
    async fn pr_by_branch(&self, branch: &str) -> Result<Option<PullRequest>>;

    /// Create an issue, or update the body of the open/closed issue with
    /// the exact same title (used by the daily summary).
    async fn create_or_update_issue(&self, title: &str, body: &str) -> Result<Option<Issue>>;
}

#[async_trait]
impl<T: RemoteRepo + ?Sized> RemoteRepo for std::sync::Arc<T> {
    async fn create_branch(&self, branch: &str, base: &str) -> Result<()> {
        self.as_ref().create_branch(branch, base).await
    }

    async fn create_pr(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<Option<PullRequest>> {
        self.as_ref().create_pr(title, body, head, base).await
    }

    async fn pr_by_branch(&self, branch: &str) -> Result<Option<PullRequest>> {
        self.as_ref().pr_by_branch(branch).await
    }

    async fn create_or_update_issue(&self, title: &str, body: &str) -> Result<Option<Issue>> {
        self.as_ref().create_or_update_issue(title, body).await
    }
}

/// REST implementation bound to one `owner/repo`.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    token: String,
    repo: String,
    api_base: String,
}

impl GitHubClient {
    #[must_use]
    pub fn new(token: String, repo: String) -> Self {
        Self {
            token,
            repo,
            api_base: API_BASE.to_string(),
        }
    }

    /// Point at a different API base (GitHub Enterprise, test server).
    #[must_use]
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn owner(&self) -> &str {
        self.repo.split('/').next().unwrap_or(&self.repo)
    }

    /// Issue one request via curl; returns `(status, parsed_body)`.
    async fn request(
        &self,
        method: &str,
        url: &str,
        body: Option<&Value>,
    ) -> Result<(u16, Value)> {
        let auth = format!("Authorization: token {}", self.token);
        let mut args: Vec<String> = vec![
            "-sS".into(),
            "-X".into(),
            method.into(),
            url.into(),
            "-H".into(),
            auth,
            "-H".into(),
            "Accept: application/vnd.github.v3+json".into(),
            "-H".into(),
            "User-Agent: reclaim-agent".into(),
            "--connect-timeout".into(),
            "15".into(),
            "--max-time".into(),
            "60".into(),
            "-w".into(),
            "\n%{http_code}".into(),
        ];
        if let Some(body) = body {
            args.push("-H".into());
            args.push("Content-Type: application/json".into());
            args.push("-d".into());
            args.push(body.to_string());
        }

        let output = tokio::process::Command::new("curl")
            .args(&args)
            .output()
            .await
            .map_err(|e| AgentError::remote(method, format!("failed to execute curl: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(AgentError::remote(
                format!("{method} {url}"),
                stderr.trim().to_string(),
            ));
        }

        let raw = String::from_utf8_lossy(&output.stdout).to_string();
        let (body_text, status_line) = raw.rsplit_once('\n').ok_or_else(|| {
            AgentError::remote(format!("{method} {url}"), "no status line from curl")
        })?;
        let status: u16 = status_line.trim().parse().map_err(|_| {
            AgentError::remote(
                format!("{method} {url}"),
                format!("bad status line '{status_line}'"),
            )
        })?;
        let payload = serde_json::from_str(body_text.trim()).unwrap_or(Value::Null);
        debug!("{} {} -> {}", method, url, status);
        Ok((status, payload))
    }
}

#[async_trait]
impl RemoteRepo for GitHubClient {
    async fn create_branch(&self, branch: &str, base: &str) -> Result<()> {
        let ref_url = format!(
            "{}/repos/{}/git/ref/heads/{}",
            self.api_base, self.repo, base
        );
        let (status, payload) = self.request("GET", &ref_url, None).await?;
        if status != 200 {
            return Err(AgentError::remote(
                "create_branch",
                format!("could not resolve base branch '{base}' (HTTP {status})"),
            ));
        }
        let sha = payload
            .pointer("/object/sha")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::remote("create_branch", "base ref has no sha"))?;

        let create_url = format!("{}/repos/{}/git/refs", self.api_base, self.repo);
        let body = json!({ "ref": format!("refs/heads/{branch}"), "sha": sha });
        let (status, _) = self.request("POST", &create_url, Some(&body)).await?;
        // 422 means the branch already exists - fine, creation is idempotent.
        if status == 201 || status == 422 {
            Ok(())
        } else {
            Err(AgentError::remote(
                "create_branch",
                format!("HTTP {status} creating '{branch}'"),
            ))
        }
    }

    async fn create_pr(
        &self,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<Option<PullRequest>> {
        let url = format!("{}/repos/{}/pulls", self.api_base, self.repo);
        let payload = json!({ "title": title, "body": body, "head": head, "base": base });
        let (status, response) = self.request("POST", &url, Some(&payload)).await?;
        if status == 201 {
            let pr: PullRequest = serde_json::from_value(response)?;
            info!("created PR #{}: {}", pr.number, pr.html_url);
            Ok(Some(pr))
        } else {
            info!("PR creation refused (HTTP {status})");
            Ok(None)
        }
    }

    async fn pr_by_branch(&self, branch: &str) -> Result<Option<PullRequest>> {
        let url = format!(
            "{}/repos/{}/pulls?head={}:{}&state=all",
            self.api_base,
            self.repo,
            self.owner(),
            branch
        );
        let (status, response) = self.request("GET", &url, None).await?;
        if status != 200 {
            return Err(AgentError::remote(
                "pr_by_branch",
                format!("HTTP {status} listing PRs for '{branch}'"),
            ));
        }
        let prs: Vec<PullRequest> = serde_json::from_value(response).unwrap_or_default();
        Ok(prs.into_iter().next())
    }

    async fn create_or_update_issue(&self, title: &str, body: &str) -> Result<Option<Issue>> {
        // Exact-title match over the first page of issues; PRs are issues
        // too in this API and must be skipped.
        let list_url = format!(
            "{}/repos/{}/issues?state=all&per_page=100",
            self.api_base, self.repo
        );
        let (status, response) = self.request("GET", &list_url, None).await?;
        let existing = if status == 200 {
            response
                .as_array()
                .into_iter()
                .flatten()
                .find(|issue| {
                    issue.get("title").and_then(Value::as_str) == Some(title)
                        && issue.get("pull_request").is_none()
                })
                .and_then(|issue| issue.get("number").and_then(Value::as_u64))
        } else {
            None
        };

        if let Some(number) = existing {
            let url = format!("{}/repos/{}/issues/{}", self.api_base, self.repo, number);
            let (status, response) = self
                .request("PATCH", &url, Some(&json!({ "body": body })))
                .await?;
            if status == 200 {
                return Ok(serde_json::from_value(response).ok());
            }
        } else {
            let url = format!("{}/repos/{}/issues", self.api_base, self.repo);
            let (status, response) = self
                .request("POST", &url, Some(&json!({ "title": title, "body": body })))
                .await?;
            if status == 201 {
                return Ok(serde_json::from_value(response).ok());
            }
        }
        Ok(None)
    }
}
