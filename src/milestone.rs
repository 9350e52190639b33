//! Milestone records and the state machine that owns them.
//!
//! Milestones are the durable job queue: declarative units of work loaded
//! from the override YAML layer and rewritten wholesale after every status
//! transition. The [`MilestoneStore`] is the only mutator - callers never
//! reach into the raw list.
//!
//! State machine:
//!
//! ```text
//! todo -> in_progress -> { done | blocked }
//! todo -> blocked                   (attempt ceiling, no model call)
//! blocked -> todo                   (human re-edit, external to the agent)
//! ```

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

use crate::error::{AgentError, Result};

/// Closed set of milestone states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    #[default]
    Todo,
    InProgress,
    Done,
    Blocked,
}

impl MilestoneStatus {
    /// Whether moving from `self` to `to` is a legal transition.
    ///
    /// `blocked -> todo` is legal because a human may re-queue a blocked
    /// milestone by editing the YAML; the agent itself never does it.
    #[must_use]
    pub fn can_transition(self, to: Self) -> bool {
        use MilestoneStatus::{Blocked, Done, InProgress, Todo};
        matches!(
            (self, to),
            (Todo, InProgress)
                | (Todo, Blocked)
                | (InProgress, Done)
                | (InProgress, Blocked)
                | (Blocked, Todo)
        )
    }

    /// Lowercase name as it appears in the YAML layer.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Blocked => "blocked",
        }
    }
}

impl std::fmt::Display for MilestoneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of change a milestone represents; drives commit/PR titles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MilestoneKind {
    #[default]
    Feat,
    Fix,
    Chore,
    Docs,
    Refactor,
    Test,
}

impl MilestoneKind {
    /// Conventional-commit prefix.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Feat => "feat",
            Self::Fix => "fix",
            Self::Chore => "chore",
            Self::Docs => "docs",
            Self::Refactor => "refactor",
            Self::Test => "test",
        }
    }
}

/// A declarative unit of work, round-tripped through the override YAML layer
/// including runtime-added bookkeeping fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Milestone {
    pub id: String,
    pub title: String,
    #[serde(rename = "type", default)]
    pub kind: MilestoneKind,
    /// Shell commands that must all exit 0 for the milestone to land.
    #[serde(default)]
    pub acceptance: Vec<String>,
    /// Glob patterns restricting which files the patch may touch.
    #[serde(default)]
    pub target_files: Vec<String>,
    /// Opaque structured payload forwarded verbatim into the prompt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<serde_yaml::Value>,
    /// Free-text constraints on what must NOT change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_out: Option<String>,
    #[serde(default)]
    pub status: MilestoneStatus,
    #[serde(default)]
    pub attempts: u32,
    /// Human-readable explanation of the latest blocked/done history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
    /// End the run after this milestone lands.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stop_feature: bool,
}

/// Owner of the milestone list and its persistence.
///
/// Exposes a narrow interface: selection, attempt bookkeeping, validated
/// transitions, and wholesale persistence back to the override YAML layer.
#[derive(Debug)]
pub struct MilestoneStore {
    milestones: Vec<Milestone>,
    /// Override YAML file; the `milestones` key is rewritten in place.
    override_path: PathBuf,
}

impl MilestoneStore {
    #[must_use]
    pub fn new(milestones: Vec<Milestone>, override_path: PathBuf) -> Self {
        Self {
            milestones,
            override_path,
        }
    }

    /// First milestone with status `todo`, in list order.
    ///
    /// List order is the operator-controlled priority; there is no queue.
    #[must_use]
    pub fn next_todo(&self) -> Option<&Milestone> {
        self.milestones
            .iter()
            .find(|m| m.status == MilestoneStatus::Todo)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Milestone> {
        self.milestones.iter().find(|m| m.id == id)
    }

    /// All milestones with the given status, in list order.
    #[must_use]
    pub fn by_status(&self, status: MilestoneStatus) -> Vec<&Milestone> {
        self.milestones
            .iter()
            .filter(|m| m.status == status)
            .collect()
    }

    /// Increment the attempt counter for a pickup and return the new count.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::UnknownMilestone`] if `id` is not in the store.
    pub fn begin_attempt(&mut self, id: &str) -> Result<u32> {
        let milestone = self
            .milestones
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| AgentError::UnknownMilestone { id: id.to_string() })?;
        milestone.attempts += 1;
        Ok(milestone.attempts)
    }

    /// Transition a milestone, validating legality and stamping timestamps.
    ///
    /// `in_progress` stamps `started_at`; `done`/`blocked` stamp
    /// `completed_at`. A reason, when given, replaces the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::UnknownMilestone`] for an unknown id and
    /// [`AgentError::IllegalTransition`] for a transition the state machine
    /// does not permit.
    pub fn transition(
        &mut self,
        id: &str,
        status: MilestoneStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        let milestone = self
            .milestones
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| AgentError::UnknownMilestone { id: id.to_string() })?;

        if !milestone.status.can_transition(status) {
            return Err(AgentError::IllegalTransition {
                id: id.to_string(),
                from: milestone.status.to_string(),
                to: status.to_string(),
            });
        }

        info!(
            "milestone '{}': {} -> {}{}",
            id,
            milestone.status,
            status,
            reason.map(|r| format!(" ({r})")).unwrap_or_default()
        );

        milestone.status = status;
        if let Some(reason) = reason {
            milestone.reason = Some(reason.to_string());
        }
        match status {
            MilestoneStatus::InProgress => {
                milestone.started_at = Some(now_stamp());
            }
            MilestoneStatus::Done | MilestoneStatus::Blocked => {
                milestone.completed_at = Some(now_stamp());
            }
            MilestoneStatus::Todo => {}
        }
        Ok(())
    }

    /// Rewrite the `milestones` key of the override YAML layer wholesale.
    ///
    /// Other keys in the file (truth checks, rules, knobs) are preserved.
    /// This file is the durable job queue; persistence must happen before
    /// any side effect that cannot be rolled back.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or written.
    pub fn persist(&self) -> Result<()> {
        let mut doc: serde_yaml::Value = if self.override_path.exists() {
            let text = std::fs::read_to_string(&self.override_path)?;
            serde_yaml::from_str(&text).unwrap_or(serde_yaml::Value::Null)
        } else {
            serde_yaml::Value::Null
        };

        if !doc.is_mapping() {
            doc = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());
        }
        if let Some(map) = doc.as_mapping_mut() {
            map.insert(
                serde_yaml::Value::String("milestones".to_string()),
                serde_yaml::to_value(&self.milestones)?,
            );
        }

        if let Some(parent) = self.override_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.override_path, serde_yaml::to_string(&doc)?)?;
        Ok(())
    }
}

fn now_stamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn milestone(id: &str, status: MilestoneStatus) -> Milestone {
        Milestone {
            id: id.to_string(),
            title: format!("Milestone {id}"),
            kind: MilestoneKind::Feat,
            acceptance: vec!["true".to_string()],
            target_files: Vec::new(),
            spec: None,
            scope_out: None,
            status,
            attempts: 0,
            reason: None,
            started_at: None,
            completed_at: None,
            stop_feature: false,
        }
    }

    #[test]
    fn test_legal_transitions() {
        use MilestoneStatus::{Blocked, Done, InProgress, Todo};
        assert!(Todo.can_transition(InProgress));
        assert!(Todo.can_transition(Blocked));
        assert!(InProgress.can_transition(Done));
        assert!(InProgress.can_transition(Blocked));
        assert!(Blocked.can_transition(Todo));
    }

    #[test]
    fn test_illegal_transitions() {
        use MilestoneStatus::{Blocked, Done, InProgress, Todo};
        assert!(!Done.can_transition(Todo));
        assert!(!Done.can_transition(InProgress));
        assert!(!Blocked.can_transition(Done));
        assert!(!Todo.can_transition(Done));
        assert!(!InProgress.can_transition(Todo));
    }

    #[test]
    fn test_next_todo_is_first_in_list_order() {
        let temp = TempDir::new().unwrap();
        let store = MilestoneStore::new(
            vec![
                milestone("m1", MilestoneStatus::Done),
                milestone("m2", MilestoneStatus::Todo),
                milestone("m3", MilestoneStatus::Todo),
            ],
            temp.path().join("reclaim.yaml"),
        );
        assert_eq!(store.next_todo().unwrap().id, "m2");
    }

    #[test]
    fn test_transition_rejects_illegal() {
        let temp = TempDir::new().unwrap();
        let mut store = MilestoneStore::new(
            vec![milestone("m1", MilestoneStatus::Done)],
            temp.path().join("reclaim.yaml"),
        );
        let err = store
            .transition("m1", MilestoneStatus::Todo, None)
            .unwrap_err();
        assert!(matches!(err, AgentError::IllegalTransition { .. }));
    }

    #[test]
    fn test_transition_stamps_timestamps_and_reason() {
        let temp = TempDir::new().unwrap();
        let mut store = MilestoneStore::new(
            vec![milestone("m1", MilestoneStatus::Todo)],
            temp.path().join("reclaim.yaml"),
        );

        store
            .transition("m1", MilestoneStatus::InProgress, None)
            .unwrap();
        assert!(store.get("m1").unwrap().started_at.is_some());

        store
            .transition("m1", MilestoneStatus::Blocked, Some("acceptance failed"))
            .unwrap();
        let m = store.get("m1").unwrap();
        assert_eq!(m.status, MilestoneStatus::Blocked);
        assert_eq!(m.reason.as_deref(), Some("acceptance failed"));
        assert!(m.completed_at.is_some());
    }

    #[test]
    fn test_begin_attempt_increments() {
        let temp = TempDir::new().unwrap();
        let mut store = MilestoneStore::new(
            vec![milestone("m1", MilestoneStatus::Todo)],
            temp.path().join("reclaim.yaml"),
        );
        assert_eq!(store.begin_attempt("m1").unwrap(), 1);
        assert_eq!(store.begin_attempt("m1").unwrap(), 2);
        assert!(store.begin_attempt("nope").is_err());
    }

    #[test]
    fn test_persist_round_trip_every_field() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("reclaim.yaml");

        let mut todo = milestone("m-todo", MilestoneStatus::Todo);
        todo.target_files = vec!["app/src/lib/training/**".to_string()];

        let mut in_progress = milestone("m-progress", MilestoneStatus::InProgress);
        in_progress.started_at = Some("2026-08-06T09:15:00.123456".to_string());
        in_progress.attempts = 2;

        let mut done = milestone("m-done", MilestoneStatus::Done);
        done.started_at = Some("2026-08-05T10:00:00.000001".to_string());
        done.completed_at = Some("2026-08-05T10:30:00.999999".to_string());

        let mut blocked = milestone("m-blocked", MilestoneStatus::Blocked);
        blocked.reason = Some("Acceptance failed: npm test\nSTDOUT:\nerror: expected 2, got: 1".to_string());
        blocked.completed_at = Some("2026-08-05T11:00:00.000000".to_string());

        let store = MilestoneStore::new(
            vec![todo.clone(), in_progress.clone(), done.clone(), blocked.clone()],
            path.clone(),
        );
        store.persist().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&text).unwrap();
        let reloaded: Vec<Milestone> =
            serde_yaml::from_value(doc.get("milestones").unwrap().clone()).unwrap();

        assert_eq!(reloaded.len(), 4);
        assert_eq!(reloaded[0].target_files, todo.target_files);
        assert_eq!(reloaded[1].status, MilestoneStatus::InProgress);
        assert_eq!(reloaded[1].started_at, in_progress.started_at);
        assert_eq!(reloaded[1].attempts, 2);
        assert_eq!(reloaded[2].completed_at, done.completed_at);
        assert_eq!(reloaded[3].reason, blocked.reason);
    }

    #[test]
    fn test_persist_preserves_other_keys() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("reclaim.yaml");
        std::fs::write(&path, "max_files: 5\nrepo_rules:\n- keep diffs small\n").unwrap();

        let store = MilestoneStore::new(
            vec![milestone("m1", MilestoneStatus::Todo)],
            path.clone(),
        );
        store.persist().unwrap();

        let doc: serde_yaml::Value =
            serde_yaml::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc.get("max_files").unwrap().as_u64(), Some(5));
        assert!(doc.get("milestones").is_some());
        assert!(doc.get("repo_rules").is_some());
    }

    #[test]
    fn test_status_yaml_names() {
        let yaml = serde_yaml::to_string(&MilestoneStatus::InProgress).unwrap();
        assert_eq!(yaml.trim(), "in_progress");
        let parsed: MilestoneStatus = serde_yaml::from_str("blocked").unwrap();
        assert_eq!(parsed, MilestoneStatus::Blocked);
    }
}
