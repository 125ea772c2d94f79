//! Retry-bounded assessment of a review.
//!
//! Decides between merging, another fix round, escalation to a human, and
//! rerouting to obtain a fresh review. Two structural guards keep the loop
//! finite: the retry ceiling and the reroute ceiling. Unresolved CRITICAL
//! findings are never merged silently.

use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::classify::Classifier;
use crate::errors::WorkflowError;
use crate::exit_codes;
use crate::hosting::{FOLLOWUP_LABEL, HostingPlatform, NEEDS_HUMAN_LABEL};
use crate::model::{ChangeRequest, ClassificationItem, ClassificationResult, WorkItem};
use crate::review::{ASSESSMENT_MARKER, ReviewArtifact, escalation_marker, followup_marker};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssessOutcome {
    Merge { tracking_issue: Option<u64> },
    /// NOW items first, then LATER items.
    FixAndRetry(Vec<ClassificationItem>),
    Escalate { issue: Option<u64>, reason: String },
    StaleReroute,
}

impl AssessOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Merge { .. } => exit_codes::OK,
            Self::Escalate { .. } => exit_codes::MANUAL_INTERVENTION,
            Self::FixAndRetry(_) => exit_codes::FIX_AND_LOOP,
            Self::StaleReroute => exit_codes::REVIEW_STALE,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Merge { .. } => "MERGE",
            Self::FixAndRetry(_) => "FIX_AND_RETRY",
            Self::Escalate { .. } => "ESCALATE",
            Self::StaleReroute => "STALE_REROUTE",
        }
    }
}

/// Outcome plus the classification it was based on, if one was made.
#[derive(Debug, Clone)]
pub struct AssessReport {
    pub outcome: AssessOutcome,
    pub classification: Option<ClassificationResult>,
}

#[derive(Debug, Clone, Copy)]
pub struct AssessInput<'a> {
    pub work_item: &'a WorkItem,
    pub change_request: &'a ChangeRequest,
    pub review: &'a ReviewArtifact,
    /// Result of the currency rule, evaluated against live state by the caller.
    pub review_current: bool,
    pub retry_count: u32,
    /// Consecutive stale reroutes so far.
    pub reroute_count: u32,
}

pub struct AssessmentLoop {
    hosting: Arc<dyn HostingPlatform>,
    classifier: Arc<Classifier>,
    project_context: String,
    max_retries: u32,
    max_reroutes: u32,
}

impl AssessmentLoop {
    pub fn new(
        hosting: Arc<dyn HostingPlatform>,
        classifier: Arc<Classifier>,
        project_context: &str,
        max_retries: u32,
        max_reroutes: u32,
    ) -> Self {
        Self {
            hosting,
            classifier,
            project_context: project_context.to_string(),
            max_retries,
            max_reroutes,
        }
    }

    #[instrument(skip(self, input), fields(work_item = input.work_item.id, retry = input.retry_count))]
    pub async fn assess(&self, input: AssessInput<'_>) -> Result<AssessReport, WorkflowError> {
        if !input.review_current {
            if input.reroute_count < self.max_reroutes {
                info!(reroutes = input.reroute_count, "Review is stale; rerouting for a fresh one");
                return Ok(AssessReport {
                    outcome: AssessOutcome::StaleReroute,
                    classification: None,
                });
            }
            let reason = format!(
                "review still stale after {} consecutive reroutes",
                input.reroute_count
            );
            let issue = self.escalate(&input, &[], &reason).await?;
            return Ok(AssessReport {
                outcome: AssessOutcome::Escalate { issue: Some(issue), reason },
                classification: None,
            });
        }

        if input.review.reports_no_findings() {
            info!("Review reports no findings");
            return Ok(AssessReport {
                outcome: AssessOutcome::Merge { tracking_issue: None },
                classification: None,
            });
        }

        let classification = self
            .classifier
            .classify(&input.review.review_text(), &self.project_context)
            .await;
        let counts = classification.counts();
        self.post_assessment(&input, &classification).await;

        let outcome = if counts.now == 0 && counts.later == 0 {
            AssessOutcome::Merge { tracking_issue: None }
        } else if counts.now == 0 {
            let issue = self.ensure_tracking_issue(&input, &classification.actionable()).await?;
            AssessOutcome::Merge {
                tracking_issue: Some(issue),
            }
        } else if input.retry_count < self.max_retries {
            AssessOutcome::FixAndRetry(classification.actionable())
        } else if classification.has_critical_now() {
            let reason = format!(
                "{} ACTIONABLE_NOW item(s), including CRITICAL, remain after {} fix rounds",
                counts.now, input.retry_count
            );
            let issue = self.escalate(&input, &classification.actionable(), &reason).await?;
            AssessOutcome::Escalate {
                issue: Some(issue),
                reason,
            }
        } else {
            warn!(now = counts.now, "Retry ceiling reached; deferring remaining items to a follow-up");
            let issue = self.ensure_tracking_issue(&input, &classification.actionable()).await?;
            AssessOutcome::Merge {
                tracking_issue: Some(issue),
            }
        };

        info!(outcome = outcome.label(), now = counts.now, later = counts.later, "Assessment complete");
        Ok(AssessReport {
            outcome,
            classification: Some(classification),
        })
    }

    /// Post the classification summary; failures only warn.
    async fn post_assessment(&self, input: &AssessInput<'_>, classification: &ClassificationResult) {
        let counts = classification.counts();
        let mut body = format!(
            "{}\n### Review assessment (round {})\n\nNOW: {} · LATER: {} · DISMISSED: {}{}\n",
            ASSESSMENT_MARKER,
            input.retry_count + 1,
            counts.now,
            counts.later,
            counts.dismissed,
            if classification.is_fallback() { " (severity fallback)" } else { "" },
        );
        for item in classification.actionable() {
            body.push_str(&item.to_markdown_line());
            body.push('\n');
        }
        if let Err(e) = self.hosting.post_comment(input.change_request.id, &body).await {
            warn!(error = %e, "Failed to post assessment comment");
        }
    }

    /// The follow-up issue for deferred items, created at most once per work item.
    async fn ensure_tracking_issue(
        &self,
        input: &AssessInput<'_>,
        items: &[ClassificationItem],
    ) -> Result<u64, WorkflowError> {
        let marker = followup_marker(input.work_item.id);
        if let Some(existing) = self.hosting.find_issue_by_marker(FOLLOWUP_LABEL, &marker).await? {
            info!(issue = existing, "Follow-up issue already open");
            self.record_items(existing, &format!("Deferred review items from #{}:", input.change_request.id), items)
                .await?;
            return Ok(existing);
        }

        let body = format!(
            "{}\nDeferred review items from #{} (work item #{}).\n\n{}",
            marker,
            input.change_request.id,
            input.work_item.id,
            item_list(items)
        );
        let issue = self
            .hosting
            .create_issue(
                &format!("Follow-up: deferred review items for #{}", input.work_item.id),
                &body,
                &[FOLLOWUP_LABEL],
            )
            .await?;
        info!(issue, items = items.len(), "Created tracking issue");

        let note = format!("{}\nDeferred items are tracked in #{}.", marker, issue);
        if let Err(e) = self.hosting.post_comment(input.change_request.id, &note).await {
            warn!(error = %e, "Failed to link tracking issue on the change request");
        }
        Ok(issue)
    }

    /// Open (or reuse) a manual-intervention issue.
    async fn escalate(
        &self,
        input: &AssessInput<'_>,
        items: &[ClassificationItem],
        reason: &str,
    ) -> Result<u64, WorkflowError> {
        let marker = escalation_marker(input.work_item.id);
        if let Some(existing) = self.hosting.find_issue_by_marker(NEEDS_HUMAN_LABEL, &marker).await? {
            warn!(issue = existing, %reason, "Escalated again; updating the open issue");
            self.record_items(existing, &format!("Escalated again: {}.", reason), items)
                .await?;
            return Ok(existing);
        }
        let body = format!(
            "{}\nWork item #{} needs a human: {}.\n\nChange request: #{}\n\n{}",
            marker,
            input.work_item.id,
            reason,
            input.change_request.id,
            item_list(items)
        );
        let issue = self
            .hosting
            .create_issue(
                &format!("Manual intervention required for #{}", input.work_item.id),
                &body,
                &[NEEDS_HUMAN_LABEL],
            )
            .await?;
        warn!(issue, %reason, "Escalated to manual intervention");
        Ok(issue)
    }

    /// Comment the current items on a reused issue unless it already lists them.
    async fn record_items(
        &self,
        issue: u64,
        heading: &str,
        items: &[ClassificationItem],
    ) -> Result<(), WorkflowError> {
        let list = item_list(items);
        if list.is_empty() {
            return Ok(());
        }
        let listed = self.hosting.work_item(issue).await?.description.contains(&list)
            || self
                .hosting
                .comments(issue)
                .await?
                .iter()
                .any(|c| c.body.contains(&list));
        if !listed {
            self.hosting
                .post_comment(issue, &format!("{}\n\n{}", heading, list))
                .await?;
        }
        Ok(())
    }
}

fn item_list(items: &[ClassificationItem]) -> String {
    items
        .iter()
        .map(|item| format!("{}\n", item.to_markdown_line()))
        .collect()
}

/// Write fix items for a later `develop` invocation.
pub fn write_fix_items(path: &Path, items: &[ClassificationItem]) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(items)?;
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

/// Fix items left by `assess`; empty when there are none.
pub fn read_fix_items(path: &Path) -> anyhow::Result<Vec<ClassificationItem>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Invalid fix items in {}", path.display()))
}
