//! Reclaim Agent - CI automation agent.
//!
//! Keeps a target repository green and advances a declarative milestone
//! queue: truth checks probe repository health, a model is asked for a
//! patch (fix or milestone), the patch is validated and applied, acceptance
//! is verified, and the change lands as a pull request.
//!
//! # Architecture
//!
//! - [`checks`] - truth-check probing with bounded output capture
//! - [`patch`] - patch ingestion: format detection, whole-file -> diff
//!   normalization, structural validation, scoped apply
//! - [`milestone`] - milestone records, state machine, and persistence
//! - [`runner`] - the orchestrator sequencing sync/probe/patch/verify/land
//! - [`model`] / [`github`] / [`git`] - external collaborators behind
//!   narrow interfaces
//! - [`config`] - two-layer YAML config and the per-run context
//! - [`error`] - structured error types
//! - [`testing`] - fixtures and mocks shared by unit and integration tests
//!
//! # Example
//!
//! ```rust,ignore
//! use reclaim_agent::config::{AgentConfig, AgentMode, RunContext};
//! use reclaim_agent::github::GitHubClient;
//! use reclaim_agent::milestone::MilestoneStore;
//! use reclaim_agent::model::OpenAiResponsesClient;
//! use reclaim_agent::runner::Runner;
//!
//! let config = AgentConfig::load(config_dir)?;
//! let ctx = RunContext::new(repo_path, repo, branch, AgentMode::Auto, false, &config)?;
//! let store = MilestoneStore::new(config.milestones.clone(), override_path);
//! let mut runner = Runner::new(ctx, &config, store, model, remote, kb_path);
//! let pr_url = runner.run().await?;
//! ```

pub mod checks;
pub mod command;
pub mod config;
pub mod context;
pub mod error;
pub mod git;
pub mod github;
pub mod knowledge_base;
pub mod milestone;
pub mod model;
pub mod patch;
pub mod prompt;
pub mod runner;
pub mod summary;
pub mod testing;

// Re-export commonly used types
pub use error::{AgentError, Result};

pub use checks::{FailingCheck, Prober, ShellProber, TruthCheck};
pub use config::{AgentConfig, AgentMode, RunContext};
pub use git::GitWorkspace;
pub use github::{GitHubClient, Issue, PullRequest, RemoteRepo};
pub use milestone::{Milestone, MilestoneKind, MilestoneStatus, MilestoneStore};
pub use model::{MockModelClient, ModelClient, ModelOutcome, OpenAiResponsesClient};
pub use patch::{AppliedPatch, PatchEnvelope, PatchError, PatchFormat, PatchIngestor};
pub use runner::{fix_branch_name, milestone_branch_name, Runner};
