//! The orchestrator: sync -> decide-mode -> execute -> verify -> land.
//!
//! One run performs at most one unit of work - a fix for red truth checks
//! or the next todo milestone - and lands it as a pull request. Branch
//! names are deterministic per calendar day, and an existing PR for the
//! computed branch short-circuits the run (idempotency). The strict toggle
//! decides whether terminal failures propagate or degrade to a logged
//! no-op, so the same control flow serves CI and interactive use.

use chrono::{Local, Timelike};
use colored::Colorize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::checks::{FailingCheck, Prober, ShellProber};
use crate::command::{run_command, truncate_output};
use crate::config::{AgentConfig, AgentMode, RunContext};
use crate::context::ContextGatherer;
use crate::error::{AgentError, Result};
use crate::git::GitWorkspace;
use crate::github::RemoteRepo;
use crate::milestone::{Milestone, MilestoneStatus, MilestoneStore};
use crate::model::{ModelClient, ModelOutcome};
use crate::patch::{AppliedPatch, PatchIngestor};
use crate::prompt::{build_fix_prompt, build_milestone_prompt, build_retry_prompt};
use crate::summary::post_daily_summary;

/// Timeout per acceptance command.
const ACCEPTANCE_TIMEOUT: Duration = Duration::from_secs(300);
/// Characters of acceptance output attached to a blocked reason.
const ACCEPTANCE_CAPTURE: usize = 500;
/// Local hour after which the daily summary is posted.
const SUMMARY_HOUR: u32 = 16;

/// Today's date in the compact form branch names use.
#[must_use]
pub fn today_compact() -> String {
    Local::now().format("%Y%m%d").to_string()
}

/// Deterministic fix-flow branch name for a given compact date.
#[must_use]
pub fn fix_branch_name(date_compact: &str) -> String {
    format!("agent/{date_compact}-fix-truth-checks")
}

/// Deterministic milestone branch name for a given compact date.
#[must_use]
pub fn milestone_branch_name(milestone_id: &str, date_compact: &str) -> String {
    format!("agent/{date_compact}-{}", milestone_id.replace('_', "-"))
}

/// Main runner for agent operations.
pub struct Runner {
    ctx: RunContext,
    repo_rules: Vec<String>,
    store: MilestoneStore,
    git: GitWorkspace,
    model: Box<dyn ModelClient>,
    remote: Box<dyn RemoteRepo>,
    prober: Box<dyn Prober>,
    kb_path: PathBuf,
}

impl Runner {
    /// Assemble a runner; the prober defaults to running the configured
    /// truth checks in the build subdirectory.
    #[must_use]
    pub fn new(
        ctx: RunContext,
        config: &AgentConfig,
        store: MilestoneStore,
        model: Box<dyn ModelClient>,
        remote: Box<dyn RemoteRepo>,
        kb_path: PathBuf,
    ) -> Self {
        let git = GitWorkspace::new(ctx.repo_path.clone());
        let prober = Box::new(ShellProber::new(
            config.truth_checks.clone(),
            ctx.check_dir(),
        ));
        Self {
            ctx,
            repo_rules: config.repo_rules.clone(),
            store,
            git,
            model,
            remote,
            prober,
            kb_path,
        }
    }

    /// Replace the prober (tests script re-probe results with this).
    #[must_use]
    pub fn with_prober(mut self, prober: Box<dyn Prober>) -> Self {
        self.prober = prober;
        self
    }

    /// Read access to the milestone queue, for reporting and tests.
    #[must_use]
    pub fn store(&self) -> &MilestoneStore {
        &self.store
    }

    /// Centralized failure behavior: log always, propagate only in strict
    /// mode.
    fn fail<T>(&self, err: AgentError) -> Result<Option<T>> {
        error!("{}", err.to_string().red());
        if self.ctx.strict {
            Err(err)
        } else {
            Ok(None)
        }
    }

    // =========================================================================
    // Run entry
    // =========================================================================

    /// Execute one run in the configured mode; returns the PR URL when one
    /// was created (or already existed for the deterministic branch).
    pub async fn run(&mut self) -> Result<Option<String>> {
        // Sync failures abort the run: there is no partial state to clean
        // up yet and everything downstream assumes a fresh default branch.
        if let Err(e) = self.sync().await {
            return self.fail(e);
        }

        match self.ctx.mode {
            AgentMode::Fix => self.run_fix_mode().await,
            AgentMode::Milestone => self.run_milestone_mode().await,
            AgentMode::Auto => {
                info!("Running truth checks...");
                let failing = self.prober.run_checks().await;
                if !failing.is_empty() {
                    // A red repo gets fixed before milestones are touched.
                    return self.run_fix_with(failing).await;
                }
                if self.store.next_todo().is_some() {
                    return self.run_milestone_mode().await;
                }
                info!("No work needed - repo is green and no milestones");
                Ok(None)
            }
        }
    }

    async fn sync(&self) -> Result<()> {
        self.git.checkout(&self.ctx.default_branch).await?;
        self.git.pull().await?;
        Ok(())
    }

    // =========================================================================
    // Fix flow
    // =========================================================================

    async fn run_fix_mode(&mut self) -> Result<Option<String>> {
        info!("Running truth checks...");
        let failing = self.prober.run_checks().await;
        if failing.is_empty() {
            info!("All truth checks passing - no fix needed");
            return Ok(None);
        }
        self.run_fix_with(failing).await
    }

    async fn run_fix_with(&mut self, failing: Vec<FailingCheck>) -> Result<Option<String>> {
        info!("Found {} failing checks", failing.len());
        match self.fix_inner(failing).await {
            Ok(url) => Ok(Some(url)),
            Err(e) => self.fail(e),
        }
    }

    async fn fix_inner(&mut self, failing: Vec<FailingCheck>) -> Result<String> {
        let prompt = build_fix_prompt(
            &failing,
            &self.repo_rules,
            self.ctx.max_files,
            self.ctx.max_lines,
        );

        info!("Calling model for fix patch...");
        let patch_text = self.call_model(&prompt).await?;

        let branch = fix_branch_name(&today_compact());

        // Idempotency: an existing PR for today's fix branch means the work
        // is already up for review.
        if let Some(pr) = self.remote.pr_by_branch(&branch).await? {
            info!(
                "Existing PR for fix branch found, skipping new run: {}",
                pr.html_url
            );
            return Ok(pr.html_url);
        }

        self.ensure_branch(&branch).await?;
        self.apply_model_patch(&prompt, &patch_text, None).await?;

        info!("Verifying fixes...");
        let still_failing = self.prober.run_checks().await;
        if !still_failing.is_empty() {
            for check in &still_failing {
                info!("- {}: {}", check.name, check.error);
            }
            return Err(AgentError::ChecksStillFailing {
                count: still_failing.len(),
            });
        }

        self.git.add_all().await?;
        self.git.commit("fix: resolve failing truth checks").await?;
        self.git.push(&branch).await?;

        let pr_body = fix_pr_body(&failing);
        let pr = self
            .remote
            .create_pr(
                "fix: resolve failing truth checks",
                &pr_body,
                &branch,
                &self.ctx.default_branch,
            )
            .await?
            .ok_or_else(|| AgentError::remote("create_pr", "PR creation refused"))?;

        info!("{} {}", "Created PR:".green(), pr.html_url);
        Ok(pr.html_url)
    }

    // =========================================================================
    // Milestone flow
    // =========================================================================

    async fn run_milestone_mode(&mut self) -> Result<Option<String>> {
        let Some(milestone) = self.store.next_todo() else {
            info!("No todo milestones found");
            return Ok(None);
        };
        let id = milestone.id.clone();
        let stop_feature = milestone.stop_feature;
        info!("Processing milestone: {} ({})", milestone.title, id);

        // Attempt ceiling: exceeded means blocked with no model call.
        let attempts = self.store.begin_attempt(&id)?;
        if attempts > self.ctx.max_attempts {
            self.store.transition(
                &id,
                MilestoneStatus::Blocked,
                Some(&format!(
                    "Exceeded max_attempts ({})",
                    self.ctx.max_attempts
                )),
            )?;
            self.store.persist()?;
            info!("Milestone {id} blocked due to exceeding max attempts");
            return Ok(None);
        }

        self.store.transition(&id, MilestoneStatus::InProgress, None)?;
        self.store.persist()?;

        match self.milestone_inner(&id).await {
            Ok(url) => {
                if stop_feature {
                    info!("Stop feature enabled - stopping after milestone");
                }
                Ok(Some(url))
            }
            Err(e) => {
                // Safety net: whatever failed, the milestone must not stay
                // in_progress across run boundaries.
                let reason = e.to_string();
                if let Err(persist_err) = self.block_milestone(&id, &reason) {
                    error!("could not persist blocked status for {id}: {persist_err}");
                }
                self.fail(e)
            }
        }
    }

    fn block_milestone(&mut self, id: &str, reason: &str) -> Result<()> {
        self.store
            .transition(id, MilestoneStatus::Blocked, Some(reason))?;
        self.store.persist()
    }

    async fn milestone_inner(&mut self, id: &str) -> Result<String> {
        let milestone = self
            .store
            .get(id)
            .cloned()
            .ok_or_else(|| AgentError::UnknownMilestone { id: id.to_string() })?;

        let branch = milestone_branch_name(id, &today_compact());

        // Idempotency: a PR from an earlier (possibly crashed) run means
        // this milestone already landed - self-heal by marking it done.
        if let Some(pr) = self.remote.pr_by_branch(&branch).await? {
            info!(
                "Existing PR for milestone found, marking as done: {}",
                pr.html_url
            );
            self.store.transition(id, MilestoneStatus::Done, None)?;
            self.store.persist()?;
            return Ok(pr.html_url);
        }

        let gatherer = ContextGatherer::new(&self.git, self.kb_path.clone());
        let context = gatherer.gather(&milestone).await;
        let prompt = build_milestone_prompt(
            &milestone,
            &self.repo_rules,
            self.ctx.max_files,
            self.ctx.max_lines,
            context.as_deref(),
        );

        info!("Calling model for milestone patch...");
        let patch_text = self.call_model(&prompt).await?;

        self.ensure_branch(&branch).await?;
        self.apply_model_patch(&prompt, &patch_text, Some(&milestone.target_files))
            .await?;

        info!("Verifying acceptance criteria...");
        self.run_acceptance(&milestone).await?;

        self.git.add_all().await?;
        let title = format!("{}: {}", milestone.kind.as_str(), milestone.title);
        self.git.commit(&title).await?;
        self.git.push(&branch).await?;

        let pr_body = milestone_pr_body(&milestone);
        let pr = self
            .remote
            .create_pr(&title, &pr_body, &branch, &self.ctx.default_branch)
            .await?
            .ok_or_else(|| AgentError::remote("create_pr", "PR creation refused"))?;

        info!("{} {}", "Created PR:".green(), pr.html_url);
        self.store.transition(id, MilestoneStatus::Done, None)?;
        self.store.persist()?;
        Ok(pr.html_url)
    }

    /// Run every acceptance command in order from the repo root, stopping
    /// at the first failure.
    async fn run_acceptance(&self, milestone: &Milestone) -> Result<()> {
        for cmd in &milestone.acceptance {
            let label = format!("acceptance: {cmd}");
            let result = run_command(cmd, &self.ctx.repo_path, ACCEPTANCE_TIMEOUT, &label).await;
            let failed_output = match result {
                Ok(out) if out.success() => continue,
                Ok(out) if out.timed_out => "Command timed out".to_string(),
                Ok(out) => format!(
                    "STDOUT:\n{}\nSTDERR:\n{}",
                    truncate_output(&out.stdout, ACCEPTANCE_CAPTURE),
                    truncate_output(&out.stderr, ACCEPTANCE_CAPTURE)
                ),
                Err(e) => e.to_string(),
            };
            return Err(AgentError::Acceptance {
                command: cmd.clone(),
                output: failed_output,
            });
        }
        Ok(())
    }

    // =========================================================================
    // Shared steps
    // =========================================================================

    /// One model call, mapped onto the flow's error taxonomy.
    async fn call_model(&self, prompt: &str) -> Result<String> {
        match self.model.generate(prompt).await {
            ModelOutcome::Produced(text) => Ok(text),
            ModelOutcome::Declined => Err(AgentError::model(
                "failed to generate patch: model declined (NO_PATCH)",
            )),
            ModelOutcome::TransientFailure(detail) => Err(AgentError::model(format!(
                "failed to generate patch: {detail}"
            ))),
            ModelOutcome::FatalFailure(detail) => Err(AgentError::model(format!(
                "failed to generate patch: {detail}"
            ))),
        }
    }

    /// Ingest the model's patch text; on rejection, re-prompt exactly once
    /// with the failure detail attached. Patch application is never blindly
    /// resubmitted.
    async fn apply_model_patch(
        &self,
        original_prompt: &str,
        patch_text: &str,
        scope: Option<&[String]>,
    ) -> Result<AppliedPatch> {
        let ingestor = PatchIngestor::new(&self.git);
        match ingestor.ingest(patch_text, scope).await {
            Ok(applied) => Ok(applied),
            Err(rejection) => {
                warn!("patch rejected: {rejection}; re-prompting once with failure detail");
                let retry_prompt = build_retry_prompt(original_prompt, &rejection.to_string());
                let retry_text = self.call_model(&retry_prompt).await?;
                Ok(ingestor.ingest(&retry_text, scope).await?)
            }
        }
    }

    /// Reuse an existing local branch, or create the remote ref (idempotent)
    /// and a fresh local branch from the default branch's state.
    async fn ensure_branch(&self, branch: &str) -> Result<()> {
        if self.git.branch_exists(branch).await? {
            return self.git.checkout(branch).await;
        }
        if let Err(e) = self
            .remote
            .create_branch(branch, &self.ctx.default_branch)
            .await
        {
            // Local work can proceed; the push will publish the branch.
            warn!("remote branch creation failed (continuing locally): {e}");
        }
        self.git.checkout_new(branch).await
    }

    // =========================================================================
    // Daily summary
    // =========================================================================

    /// Post the daily summary issue when the local time has passed the
    /// end-of-day threshold.
    pub async fn maybe_post_daily_summary(&self, prs_created: &[String]) -> Result<()> {
        if Local::now().hour() < SUMMARY_HOUR {
            return Ok(());
        }
        let failing = self.prober.run_checks().await;
        let date = Local::now().format("%Y-%m-%d").to_string();
        post_daily_summary(
            self.remote.as_ref(),
            &date,
            1,
            prs_created,
            &failing,
            &self.store,
        )
        .await
    }
}

fn fix_pr_body(failing: &[FailingCheck]) -> String {
    let causes = failing
        .iter()
        .map(|check| {
            let error = if check.error.is_empty() {
                "Failed"
            } else {
                check.error.as_str()
            };
            format!("- {}: {}", check.name, error)
        })
        .collect::<Vec<_>>()
        .join("\n");
    let verification = failing
        .iter()
        .map(|check| format!("- {}: PASS", check.name))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r"## Summary
Fixed failing truth checks in the repository.

## Root Cause
The following truth checks were failing:
{causes}

## Changes
- Applied model-generated patch to resolve failures
- All truth checks now passing

## Verification
{verification}

## Files Changed
See diff for details.
"
    )
}

fn milestone_pr_body(milestone: &Milestone) -> String {
    let acceptance = milestone
        .acceptance
        .iter()
        .map(|cmd| format!("- `{cmd}`: PASS"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r"## Summary
Completed milestone: {title}

## Root Cause
Milestone task: {kind} - {title}

## Changes
- Applied model-generated patch to complete milestone
- All acceptance criteria now passing

## Verification
{acceptance}

## Files Changed
See diff for details.
",
        title = milestone.title,
        kind = milestone.kind.as_str(),
    )
}
