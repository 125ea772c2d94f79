//! Reconstructs a work item's real-world position from live queries.
//!
//! Nothing here is trusted from local bookkeeping: the change request comes
//! from the hosting platform, the workspace from `git worktree list`, and the
//! latest local work time from the local commit log. Each sub-query that
//! fails is logged and reported as unknown; the caller treats unknown as the
//! more conservative, not-yet-ready position.

use chrono::{DateTime, Utc};
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::classify::Classifier;
use crate::hosting::{FOLLOWUP_LABEL, HostingPlatform, linked_work_items, title_similarity};
use crate::model::{ChangeRequest, ClassificationResult, WorkItem};
use crate::review::{
    ArtifactKind, ReviewArtifact, artifacts_from_comments, followup_marker, is_review_current,
    latest_of_kind, requested_review_heads,
};
use crate::vcs::{Vcs, branch_mentions_item, latest_work_time};

/// Minimum title similarity for the last-resort change-request match.
pub const TITLE_MATCH_THRESHOLD: f64 = 0.6;

/// Everything the orchestrator needs to pick a resume point.
#[derive(Debug, Clone, Default)]
pub struct RemoteState {
    pub work_item_id: u64,
    pub work_item: Option<WorkItem>,
    pub change_request: Option<ChangeRequest>,
    /// Branch of the change request, or of a local workspace for the item.
    pub branch: Option<String>,
    pub workspace: Option<PathBuf>,
    pub latest_review: Option<ReviewArtifact>,
    pub review_current: bool,
    /// Cached classification of the latest review, if any.
    pub latest_classification: Option<ClassificationResult>,
    /// A follow-up marker was posted on the change request.
    pub has_followup: bool,
    pub tracking_issue: Option<u64>,
    pub local_head: Option<String>,
    pub remote_head: Option<String>,
    pub latest_local_work: Option<DateTime<Utc>>,
    /// `None` when the local log could not be read.
    pub has_implementation: Option<bool>,
    pub has_unpushed_work: bool,
    pub has_uncommitted_changes: bool,
    pub review_requested_for_head: bool,
}

impl RemoteState {
    pub fn latest_review_time(&self) -> Option<DateTime<Utc>> {
        self.latest_review.as_ref().map(|r| r.created_at)
    }

    /// Deferred items exist in the cached classification but nothing tracks them.
    pub fn deferred_items_untracked(&self) -> bool {
        let deferred = self
            .latest_classification
            .as_ref()
            .is_some_and(|c| c.counts().later > 0);
        deferred && !self.has_followup && self.tracking_issue.is_none()
    }
}

/// Log a failed sub-query and collapse it to `None`.
fn known<T, E: Display>(what: &str, result: Result<T, E>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(query = what, error = %e, "State query failed; treating as unknown");
            None
        }
    }
}

pub struct Inspector {
    hosting: Arc<dyn HostingPlatform>,
    vcs: Arc<dyn Vcs>,
    classifier: Arc<Classifier>,
    project_context: String,
}

impl Inspector {
    pub fn new(
        hosting: Arc<dyn HostingPlatform>,
        vcs: Arc<dyn Vcs>,
        classifier: Arc<Classifier>,
        project_context: &str,
    ) -> Self {
        Self {
            hosting,
            vcs,
            classifier,
            project_context: project_context.to_string(),
        }
    }

    #[instrument(skip(self))]
    pub async fn inspect(&self, work_item_id: u64) -> RemoteState {
        let mut state = RemoteState {
            work_item_id,
            ..Default::default()
        };

        known("fetch", self.vcs.fetch());
        state.work_item = known("work item", self.hosting.work_item(work_item_id).await);
        let title = state.work_item.as_ref().map(|w| w.title.clone());

        if let Some(open) = known("open change requests", self.hosting.open_change_requests().await) {
            state.change_request = resolve_change_request(open, work_item_id, title.as_deref());
        }

        let worktrees = known("worktrees", self.vcs.worktrees()).unwrap_or_default();
        state.branch = match &state.change_request {
            Some(cr) => Some(cr.branch.clone()),
            None => worktrees
                .iter()
                .filter_map(|w| w.branch.as_deref())
                .find(|b| branch_mentions_item(b, work_item_id))
                .map(str::to_string),
        };
        if let Some(branch) = &state.branch {
            state.workspace = worktrees
                .iter()
                .find(|w| w.branch.as_deref() == Some(branch))
                .map(|w| w.path.clone());
        }

        if let Some(branch) = state.branch.clone() {
            self.inspect_branch(&mut state, &branch);
        }

        if let Some(cr) = state.change_request.clone() {
            self.inspect_reviews(&mut state, &cr).await;
        }

        state.tracking_issue = known(
            "tracking issue",
            self.hosting
                .find_issue_by_marker(FOLLOWUP_LABEL, &followup_marker(work_item_id))
                .await,
        )
        .flatten();

        debug!(
            change_request = ?state.change_request.as_ref().map(|c| c.id),
            workspace = ?state.workspace,
            review_current = state.review_current,
            "Inspected remote state"
        );
        state
    }

    fn inspect_branch(&self, state: &mut RemoteState, branch: &str) {
        state.local_head = known("local head", self.vcs.local_head(branch)).flatten();
        state.remote_head = known("remote head", self.vcs.remote_head(branch)).flatten();

        if state.local_head.is_some() {
            if let Some(commits) = known("local log", self.vcs.local_work_commits(branch)) {
                state.latest_local_work = latest_work_time(&commits);
                state.has_implementation = Some(commits.iter().any(|c| !c.is_sync_merge));
            }
        } else if state.remote_head.is_some() {
            // Pushed from elsewhere; the workspace will be recreated from the remote.
            state.has_implementation = Some(true);
        }

        state.has_unpushed_work = match (&state.local_head, &state.remote_head) {
            (Some(local), Some(remote)) => local != remote,
            (Some(_), None) => state.has_implementation == Some(true),
            _ => false,
        };

        if let Some(ws) = &state.workspace {
            state.has_uncommitted_changes =
                known("workspace status", self.vcs.has_uncommitted_changes(ws)).unwrap_or(false);
        }
    }

    async fn inspect_reviews(&self, state: &mut RemoteState, cr: &ChangeRequest) {
        let Some(comments) = known("comments", self.hosting.comments(cr.id).await) else {
            return;
        };
        let artifacts = artifacts_from_comments(&comments);
        state.has_followup = latest_of_kind(&artifacts, ArtifactKind::FollowupMarker).is_some();
        state.latest_review = latest_of_kind(&artifacts, ArtifactKind::Review).cloned();

        if let Some(head) = &state.local_head {
            state.review_requested_for_head = requested_review_heads(&comments).contains(head);
        }

        if let Some(review) = &state.latest_review {
            state.review_current = is_review_current(
                review.created_at,
                state.latest_local_work,
                state.local_head.as_deref(),
                state.remote_head.as_deref(),
            );
            if state.review_current {
                state.latest_classification =
                    self.classifier.cached(&review.review_text(), &self.project_context);
            }
        }
    }
}

/// Pick the change request for a work item: explicit linkage, then branch
/// name, then title similarity.
pub fn resolve_change_request(
    open: Vec<ChangeRequest>,
    work_item_id: u64,
    title: Option<&str>,
) -> Option<ChangeRequest> {
    if let Some(idx) = open
        .iter()
        .position(|cr| linked_work_items(&cr.body).contains(&work_item_id))
    {
        return open.into_iter().nth(idx);
    }
    if let Some(idx) = open
        .iter()
        .position(|cr| branch_mentions_item(&cr.branch, work_item_id))
    {
        return open.into_iter().nth(idx);
    }
    let title = title?;
    open.into_iter()
        .map(|cr| (title_similarity(&cr.title, title), cr))
        .filter(|(score, _)| *score >= TITLE_MATCH_THRESHOLD)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, cr)| cr)
}
