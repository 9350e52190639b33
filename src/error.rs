//! Custom error types for the agent.
//!
//! This module provides structured error types that enable better
//! error handling, reporting, and recovery throughout the application.

use std::path::PathBuf;
use thiserror::Error;

use crate::patch::PatchError;

/// Main error type for agent operations
#[derive(Error, Debug)]
pub enum AgentError {
    // =========================================================================
    // Configuration / Environment Errors
    // =========================================================================
    /// Failed to load configuration
    #[error("Configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
    },

    /// Required environment variable not set
    #[error("Missing required environment variable: {var}")]
    MissingEnv { var: String },

    /// Repository path missing or not a directory
    #[error("Repository path not found: {path}")]
    RepoNotFound { path: PathBuf },

    // =========================================================================
    // Flow Errors
    // =========================================================================
    /// Git operation failed
    #[error("Git operation failed: {operation} - {message}")]
    Git { operation: String, message: String },

    /// Remote repository (GitHub) operation failed
    #[error("Remote operation failed: {operation} - {message}")]
    Remote { operation: String, message: String },

    /// Model did not produce a usable patch
    #[error("Model error: {message}")]
    Model { message: String },

    /// Patch ingestion rejected the model output
    #[error(transparent)]
    Patch(#[from] PatchError),

    /// An acceptance command exited non-zero
    #[error("Acceptance failed: {command}\n{output}")]
    Acceptance { command: String, output: String },

    /// Truth checks still failing after a fix patch was applied
    #[error("Truth checks still failing after fix patch ({count} failing)")]
    ChecksStillFailing { count: usize },

    /// Milestone state machine rejected a transition
    #[error("Illegal milestone transition for '{id}': {from} -> {to}")]
    IllegalTransition {
        id: String,
        from: String,
        to: String,
    },

    /// Milestone id not present in the store
    #[error("Unknown milestone: {id}")]
    UnknownMilestone { id: String },

    /// Generic flow failure (strict-mode propagation of a logged failure)
    #[error("{message}")]
    RunFailed { message: String },

    // =========================================================================
    // Wrapped Errors
    // =========================================================================
    /// IO error wrapper
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// YAML error wrapper
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// JSON error wrapper
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AgentError {
    // =========================================================================
    // Constructor helpers
    // =========================================================================

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
        }
    }

    /// Create a configuration error with path
    pub fn config_with_path(message: impl Into<String>, path: PathBuf) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path),
        }
    }

    /// Create a git error
    pub fn git(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Git {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a remote (GitHub) error
    pub fn remote(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a model error
    pub fn model(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
        }
    }

    /// Create a run failure
    pub fn run_failed(message: impl Into<String>) -> Self {
        Self::RunFailed {
            message: message.into(),
        }
    }

    // =========================================================================
    // Classification helpers
    // =========================================================================

    /// Check if this error is fatal at startup (before any work begins)
    pub fn is_environment(&self) -> bool {
        matches!(
            self,
            Self::MissingEnv { .. } | Self::RepoNotFound { .. } | Self::Config { .. }
        )
    }

    /// Check if this error blocks the current milestone rather than the process
    pub fn blocks_milestone(&self) -> bool {
        matches!(
            self,
            Self::Model { .. } | Self::Patch(_) | Self::Acceptance { .. } | Self::Git { .. }
        )
    }

    /// Get error code for exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } | Self::MissingEnv { .. } | Self::RepoNotFound { .. } => 7,
            Self::Git { .. } | Self::Remote { .. } => 2,
            Self::Patch(_) => 3,
            Self::Acceptance { .. } | Self::ChecksStillFailing { .. } => 4,
            Self::Model { .. } => 5,
            _ => 1,
        }
    }
}

/// Type alias for agent results
pub type Result<T> = std::result::Result<T, AgentError>;
