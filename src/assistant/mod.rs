//! AI assistant sessions.
//!
//! Two roles: a development (or fix) session that edits the workspace, and a
//! text-only session used for local reviews and classification. Development
//! sessions are never allowed to write to version control or the hosting
//! platform; see [`DISALLOWED_TOOLS`].

pub mod claude;

use async_trait::async_trait;
use std::path::PathBuf;

use crate::errors::AssistantError;
use crate::model::{ClassificationItem, WorkItem};
use crate::review::REVIEW_MARKER;

pub use claude::ClaudeCli;

/// Tool patterns passed to `--disallowedTools` for development sessions.
pub const DISALLOWED_TOOLS: &[&str] = &[
    "Bash(git commit:*)",
    "Bash(git push:*)",
    "Bash(git merge:*)",
    "Bash(git rebase:*)",
    "Bash(git reset:*)",
    "Bash(git checkout:*)",
    "Bash(git switch:*)",
    "Bash(git branch:*)",
    "Bash(git tag:*)",
    "Bash(git worktree:*)",
    "Bash(gh pr:*)",
    "Bash(gh issue:*)",
    "Bash(gh api:*)",
    "Bash(gh release:*)",
];

/// Input for a development or fix session.
#[derive(Debug, Clone)]
pub struct DevelopmentRequest {
    pub work_item: WorkItem,
    pub workspace: PathBuf,
    /// Empty for a first implementation; otherwise the items to fix.
    pub fix_items: Vec<ClassificationItem>,
    pub project_context: String,
}

impl DevelopmentRequest {
    pub fn is_fix(&self) -> bool {
        !self.fix_items.is_empty()
    }
}

/// Result of a development session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOutcome {
    /// False when the session was cut off by the timeout.
    pub completed: bool,
    pub output: String,
    /// The assistant reported its usage limit as exhausted.
    pub budget_exhausted: bool,
}

#[async_trait]
pub trait Assistant: Send + Sync {
    /// Identifier of the model answering, part of the classification cache key.
    fn model_id(&self) -> &str;

    /// Run a development or fix session in the request's workspace.
    async fn develop(&self, request: &DevelopmentRequest) -> Result<SessionOutcome, AssistantError>;

    /// One-shot prompt, returning the assistant's text.
    async fn complete(&self, prompt: &str) -> Result<String, AssistantError>;
}

const BUDGET_PHRASES: &[&str] = &["usage limit reached", "usage limit exceeded", "rate limit reached", "out of credits"];

/// Whether session output says the assistant's budget is used up.
pub fn reports_budget_exhausted(output: &str) -> bool {
    let lower = output.to_lowercase();
    BUDGET_PHRASES.iter().any(|p| lower.contains(p))
}

/// Prompt for a development or fix session.
pub fn development_prompt(request: &DevelopmentRequest) -> String {
    let item = &request.work_item;
    let mut prompt = format!(
        "# Work item #{}: {}\n\n{}\n",
        item.id, item.title, item.description
    );
    if !request.project_context.trim().is_empty() {
        prompt.push_str(&format!("\n## Project context\n{}\n", request.project_context.trim()));
    }
    if request.is_fix() {
        prompt.push_str("\n## Review findings to address\n");
        for finding in &request.fix_items {
            prompt.push_str(&finding.to_markdown_line());
            prompt.push('\n');
            if !finding.reasoning.is_empty() {
                prompt.push_str(&format!("  {}\n", finding.reasoning));
            }
        }
        prompt.push_str("\nFix every ACTIONABLE NOW item. Address LATER items only when the fix is small and safe.\n");
    } else {
        prompt.push_str("\nImplement this work item in the current directory, with tests.\n");
    }
    prompt.push_str(
        "\nDo not commit, push, switch branches or touch the issue tracker: the workflow does that.\n",
    );
    prompt
}

/// Prompt for a local review of a branch against its base.
pub fn review_prompt(work_item: &WorkItem, diff: &str) -> String {
    format!(
        r#"Review the following change for work item #{id} ({title}).

Start your answer with exactly this header, filled in:

{marker}
## Review
Critical: <n>
High: <n>
Medium: <n>
Low: <n>

Then list each finding on its own line as `- [SEVERITY] title: explanation`.

```diff
{diff}
```
"#,
        id = work_item.id,
        title = work_item.title,
        marker = REVIEW_MARKER,
        diff = diff,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClassificationState, Severity};

    fn request(fix_items: Vec<ClassificationItem>) -> DevelopmentRequest {
        let mut work_item = WorkItem::new(12, "Add retry to uploader");
        work_item.description = "Uploads fail on flaky networks.".into();
        DevelopmentRequest {
            work_item,
            workspace: PathBuf::from("/tmp/ws"),
            fix_items,
            project_context: String::new(),
        }
    }

    #[test]
    fn development_prompt_mentions_item() {
        let prompt = development_prompt(&request(vec![]));
        assert!(prompt.contains("#12"));
        assert!(prompt.contains("flaky networks"));
        assert!(prompt.contains("Implement this work item"));
        assert!(!prompt.contains("Review findings"));
    }

    #[test]
    fn fix_prompt_lists_findings() {
        let finding = ClassificationItem::new(
            "Unbounded retry loop",
            ClassificationState::ActionableNow,
            Severity::High,
        )
        .with_reasoning("never gives up");
        let req = request(vec![finding]);
        assert!(req.is_fix());
        let prompt = development_prompt(&req);
        assert!(prompt.contains("Unbounded retry loop"));
        assert!(prompt.contains("never gives up"));
    }

    #[test]
    fn review_prompt_carries_marker() {
        let prompt = review_prompt(&WorkItem::new(3, "x"), "+fn main() {}");
        assert!(prompt.contains(REVIEW_MARKER));
        assert!(prompt.contains("+fn main() {}"));
    }

    #[test]
    fn detects_budget_exhaustion() {
        assert!(reports_budget_exhausted("Claude usage limit reached. Resets at 5pm"));
        assert!(!reports_budget_exhausted("All tests pass"));
    }
}
