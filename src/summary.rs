//! Daily summary issue: one per calendar day, updated in place.

use tracing::info;

use crate::checks::FailingCheck;
use crate::error::Result;
use crate::github::RemoteRepo;
use crate::milestone::{Milestone, MilestoneStatus, MilestoneStore};

/// Issue title for a given date; the create-or-update key.
#[must_use]
pub fn summary_title(date: &str) -> String {
    format!("Agent Daily Summary ({date})")
}

fn format_milestone_list(milestones: &[&Milestone]) -> String {
    if milestones.is_empty() {
        return "  - None".to_string();
    }
    milestones
        .iter()
        .map(|m| format!("  - [{}] {}", m.id, m.title))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render the summary body for the issue.
#[must_use]
pub fn build_summary_body(
    date: &str,
    runs_attempted: u32,
    prs_created: &[String],
    failing_checks: &[FailingCheck],
    store: &MilestoneStore,
) -> String {
    let health = if failing_checks.is_empty() {
        "GREEN"
    } else {
        "RED"
    };
    let health_detail = if failing_checks.is_empty() {
        "All truth checks passing".to_string()
    } else {
        format!("{} failing checks", failing_checks.len())
    };

    let pr_links = if prs_created.is_empty() {
        "- None".to_string()
    } else {
        prs_created
            .iter()
            .map(|pr| format!("- {pr}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let todo = store.by_status(MilestoneStatus::Todo);
    let in_progress = store.by_status(MilestoneStatus::InProgress);
    let done = store.by_status(MilestoneStatus::Done);
    let blocked = store.by_status(MilestoneStatus::Blocked);

    let mut blocked_details = String::new();
    if !blocked.is_empty() {
        blocked_details.push_str("\n\n**Blocked Items:**\n");
        for m in &blocked {
            let reason = m.reason.as_deref().unwrap_or("Unknown reason");
            blocked_details.push_str(&format!("- [{}] {}: {}\n", m.id, m.title, reason));
        }
    }

    format!(
        r"## Agent Daily Summary ({date})

### Overview
- **Runs Attempted**: {runs_attempted}
- **PRs Created**: {pr_count}
- **Repo Health**: {health}

### Repository Health
{health_detail}

### Pull Requests Created
{pr_links}

### Milestone Status

**Todo**: {todo_count}
{todo_list}

**In Progress**: {in_progress_count}
{in_progress_list}

**Done**: {done_count}
{done_list}

**Blocked**: {blocked_count}
{blocked_list}{blocked_details}

---
*Generated automatically by the agent*
",
        pr_count = prs_created.len(),
        todo_count = todo.len(),
        todo_list = format_milestone_list(&todo),
        in_progress_count = in_progress.len(),
        in_progress_list = format_milestone_list(&in_progress),
        done_count = done.len(),
        done_list = format_milestone_list(&done),
        blocked_count = blocked.len(),
        blocked_list = format_milestone_list(&blocked),
    )
}

/// Create or update the day's summary issue on the remote.
pub async fn post_daily_summary(
    remote: &dyn RemoteRepo,
    date: &str,
    runs_attempted: u32,
    prs_created: &[String],
    failing_checks: &[FailingCheck],
    store: &MilestoneStore,
) -> Result<()> {
    let title = summary_title(date);
    let body = build_summary_body(date, runs_attempted, prs_created, failing_checks, store);
    match remote.create_or_update_issue(&title, &body).await? {
        Some(issue) => info!("daily summary posted: {}", issue.html_url),
        None => info!("daily summary could not be created or updated"),
    }
    Ok(())
}
