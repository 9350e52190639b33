//! Prompt construction for the fix and milestone flows.
//!
//! The prompts define the model's output contract: the fix flow asks for a
//! strict unified diff, the milestone flow asks for whole-file blocks (the
//! format that survives line-number drift). Both carry the repo rules, the
//! size constraints, and the `NO_PATCH` escape hatch.

use crate::checks::FailingCheck;
use crate::milestone::Milestone;

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prompt for the fix flow: repair the failing truth checks.
#[must_use]
pub fn build_fix_prompt(
    failing: &[FailingCheck],
    repo_rules: &[String],
    max_files: u32,
    max_lines: u32,
) -> String {
    let check_details = failing
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

    format!(
        r#"You are a code fixing agent for the Reclaim repository. Fix the failing truth checks below.

REPO RULES (CRITICAL - MUST FOLLOW):
{rules}

FAILING CHECKS:
{check_details}

CONSTRAINTS:
- Maximum {max_files} files changed
- Maximum {max_lines} lines net change (additions - deletions)

OUTPUT FORMAT (STRICT):
- Output ONLY a valid unified diff patch that `git apply` can parse.
- Use REAL line numbers in hunk headers: @@ -10,5 +10,8 @@ NOT @@ ... @@
- Include sufficient context lines (at least 3 before and after changes).
- NO explanations, NO markdown fences, NO commentary, NO placeholders.
- Start immediately with:  --- a/path/to/file.ext

CRITICAL FILE PATH RULES:
- You MUST use REAL file paths from the repository.
- NEVER use placeholder names like "placeholder", "dummy", "example"
- All file paths must be relative to the repository root (e.g., app/src/...)

WHEN TO USE NO_PATCH (ONLY AS LAST RESORT):
- ONLY output the single token NO_PATCH if the task is fundamentally impossible.
- If you can see the failing checks and their errors, you SHOULD be able to generate a patch.

Begin now:
"#,
        rules = bullet_list(repo_rules),
    )
}

/// Prompt for the milestone flow: complete the next unit of work.
///
/// `context` is the bounded repository context assembled by the context
/// gatherer (knowledge base or structure listing plus target files).
#[must_use]
pub fn build_milestone_prompt(
    milestone: &Milestone,
    repo_rules: &[String],
    max_files: u32,
    max_lines: u32,
    context: Option<&str>,
) -> String {
    let acceptance = bullet_list(&milestone.acceptance);

    let spec_block = milestone
        .spec
        .as_ref()
        .and_then(|spec| serde_yaml::to_string(spec).ok())
        .map(|text| {
            format!("\nDETAILED SPEC (authoritative for behavior, UX, and constraints):\n{text}")
        })
        .unwrap_or_default();

    let scope_out_block = milestone
        .scope_out
        .as_ref()
        .map(|scope_out| {
            format!(
                "\nSCOPE OUT (hard constraint - do NOT change any of this):\n{scope_out}\n"
            )
        })
        .unwrap_or_default();

    let mut files_context = String::new();
    if !milestone.target_files.is_empty() {
        files_context.push_str("\nTARGET FILES (focus on these patterns):\n");
        files_context.push_str(&bullet_list(&milestone.target_files));
        files_context.push('\n');
    }
    if let Some(context) = context {
        files_context.push_str(&format!(
            "\nREPOSITORY CONTEXT (structure, patterns, and current file contents):\n{context}\n\
             \nUse the repository context to match existing code patterns, \
             and the file contents to preserve everything the milestone does not change.\n"
        ));
    }

    format!(
        r#"You are a code modification agent for the Reclaim repository. Complete the milestone below.

CRITICAL OUTPUT FORMAT - READ THIS FIRST:
You MUST output complete file content, NOT unified diffs. The format is:

===FILE_START: <file_path>===
<complete file content here>
===FILE_END: <file_path>===

RULES:
1. Output the COMPLETE modified file content for each file (not a diff!)
2. For existing files: include the ENTIRE file with your changes
3. For new files: include the COMPLETE new file content
4. NO unified diff format (no --- a/... +++ b/... or @@ line numbers)
5. You can output multiple files, one after another

PRESERVE ALL EXISTING FUNCTIONALITY:
- DO NOT remove or rename existing exports - other files depend on them
- DO NOT change existing function signatures unless the milestone requires it
- If a file has 1000 lines and you add 50, output all 1050 lines

REPO RULES (CRITICAL - MUST FOLLOW):
{rules}

MILESTONE:
Title: {title}
Type: {kind}
Acceptance commands (all must pass):
{acceptance}
{spec_block}{scope_out_block}{files_context}
CONSTRAINTS:
- Maximum {max_files} files changed
- Maximum {max_lines} lines net change (additions - deletions)

CRITICAL FILE PATH RULES:
- You MUST use REAL file paths from the TARGET FILES list above.
- NEVER use placeholder names like "placeholder", "dummy", "example"
- If creating a new file, use a path that matches the TARGET FILES patterns.

WHEN TO USE NO_PATCH (ONLY AS LAST RESORT):
- ONLY output the single token NO_PATCH if the task is fundamentally impossible
  or you have ZERO context about the codebase structure.

REMEMBER: Output complete file content using ===FILE_START: path=== ... ===FILE_END: path=== format.
DO NOT output unified diff format. Start now:
"#,
        rules = bullet_list(repo_rules),
        title = milestone.title,
        kind = milestone.kind.as_str(),
    )
}

/// Re-prompt after a patch rejection: same task, with the failure attached.
///
/// Patch application is never blindly retried; the one retry re-prompts the
/// model with the specific rejection so it can correct the defect.
#[must_use]
pub fn build_retry_prompt(original_prompt: &str, rejection: &str) -> String {
    format!(
        "{original_prompt}\n\
         PREVIOUS ATTEMPT REJECTED:\n{rejection}\n\n\
         Correct the problem above and output a new patch in the required format:\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::milestone::{MilestoneKind, MilestoneStatus};
    use crate::testing::failing_check;

    fn sample_milestone() -> Milestone {
        Milestone {
            id: "training_v2".to_string(),
            title: "Add training session summaries".to_string(),
            kind: MilestoneKind::Feat,
            acceptance: vec!["cd app && npm test".to_string()],
            target_files: vec!["app/src/lib/training/**".to_string()],
            spec: Some(serde_yaml::from_str("goal: summaries").unwrap()),
            scope_out: Some("No changes to training engine behavior".to_string()),
            status: MilestoneStatus::Todo,
            attempts: 0,
            reason: None,
            started_at: None,
            completed_at: None,
            stop_feature: false,
        }
    }

    #[test]
    fn test_fix_prompt_carries_checks_rules_and_limits() {
        let failing = vec![failing_check("lint", "npm run lint", "2 errors")];
        let rules = vec!["Never commit secrets".to_string()];
        let prompt = build_fix_prompt(&failing, &rules, 3, 150);

        assert!(prompt.contains("- lint: 2 errors"));
        assert!(prompt.contains("- Never commit secrets"));
        assert!(prompt.contains("Maximum 3 files changed"));
        assert!(prompt.contains("Maximum 150 lines"));
        assert!(prompt.contains("unified diff"));
        assert!(prompt.contains("NO_PATCH"));
    }

    #[test]
    fn test_fix_prompt_empty_error_reads_failed() {
        let failing = vec![failing_check("build", "npm run build", "")];
        let prompt = build_fix_prompt(&failing, &[], 3, 150);
        assert!(prompt.contains("- build: Failed"));
    }

    #[test]
    fn test_milestone_prompt_demands_file_blocks() {
        let milestone = sample_milestone();
        let prompt = build_milestone_prompt(&milestone, &[], 3, 150, None);

        assert!(prompt.contains("===FILE_START: <file_path>==="));
        assert!(prompt.contains("Add training session summaries"));
        assert!(prompt.contains("Type: feat"));
        assert!(prompt.contains("- cd app && npm test"));
        assert!(prompt.contains("app/src/lib/training/**"));
        assert!(prompt.contains("No changes to training engine behavior"));
        assert!(prompt.contains("goal: summaries"));
    }

    #[test]
    fn test_milestone_prompt_includes_context_when_given() {
        let milestone = sample_milestone();
        let with = build_milestone_prompt(&milestone, &[], 3, 150, Some("--- FILE: x.ts ---"));
        assert!(with.contains("REPOSITORY CONTEXT"));
        assert!(with.contains("--- FILE: x.ts ---"));

        let without = build_milestone_prompt(&milestone, &[], 3, 150, None);
        assert!(!without.contains("REPOSITORY CONTEXT"));
    }

    #[test]
    fn test_retry_prompt_attaches_rejection() {
        let retry = build_retry_prompt("ORIGINAL", "patch targets 'x', which does not exist");
        assert!(retry.starts_with("ORIGINAL"));
        assert!(retry.contains("PREVIOUS ATTEMPT REJECTED"));
        assert!(retry.contains("does not exist"));
    }
}
