//! Reconciles a branch whose push was rejected because the remote moved on.
//!
//! Below the threshold the remote branch and mainline are merged in and the
//! result is pushed without force; local commits are never discarded. At or
//! above it the change request is abandoned (unsupervised) or the operator
//! picks a way forward (supervised).

use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::errors::WorkflowError;
use crate::hosting::HostingPlatform;
use crate::operator::Operator;
use crate::phase::Mode;
use crate::vcs::{CommitInfo, MergeOutcome, PushOutcome, REMOTE, Vcs};

/// Shape of the divergence between a local branch and its remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Divergence {
    pub remote_only: usize,
    /// Some remote-only commit is more than a mainline sync.
    pub has_foreign_edits: bool,
}

impl Divergence {
    pub fn of(remote_only: &[CommitInfo]) -> Self {
        Self {
            remote_only: remote_only.len(),
            has_foreign_edits: remote_only.iter().any(|c| !c.is_sync_merge),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Merged and pushed; the existing review still describes the change.
    Resolved,
    /// Merged and pushed, but someone else's edits came in: review again.
    NeedsReReview,
    /// Could not reconcile; the branch is unchanged apart from clean merges.
    Unresolved(String),
    /// The change request was abandoned; start over from mainline.
    RestartFresh,
    /// The operator chose to leave the branch diverged.
    ContinueAsIs,
    Aborted,
}

/// Which branch to reconcile and where it is checked out.
#[derive(Debug, Clone, Copy)]
pub struct ReconcileRequest<'a> {
    pub work_item_id: u64,
    pub branch: &'a str,
    pub workspace: &'a Path,
    pub change_request: Option<u64>,
    pub mode: Mode,
}

const SUPERVISED_CHOICES: [&str; 4] = [
    "Restart fresh (abandon the change request)",
    "Merge anyway",
    "Continue as-is",
    "Abort",
];

pub struct Reconciler {
    vcs: Arc<dyn Vcs>,
    hosting: Arc<dyn HostingPlatform>,
    operator: Arc<dyn Operator>,
    threshold: usize,
}

impl Reconciler {
    pub fn new(
        vcs: Arc<dyn Vcs>,
        hosting: Arc<dyn HostingPlatform>,
        operator: Arc<dyn Operator>,
        threshold: usize,
    ) -> Self {
        Self {
            vcs,
            hosting,
            operator,
            threshold,
        }
    }

    #[instrument(skip(self, req), fields(branch = req.branch, work_item = req.work_item_id))]
    pub async fn reconcile(&self, req: ReconcileRequest<'_>) -> Result<ReconcileOutcome, WorkflowError> {
        self.vcs.fetch()?;
        let divergence = Divergence::of(&self.vcs.remote_only_commits(req.branch)?);
        info!(
            remote_only = divergence.remote_only,
            foreign = divergence.has_foreign_edits,
            threshold = self.threshold,
            "Branch diverged from remote"
        );

        if divergence.remote_only < self.threshold {
            return self.merge_and_push(&req, divergence);
        }

        match req.mode {
            Mode::Unsupervised => {
                self.abandon(&req, divergence).await;
                Ok(ReconcileOutcome::RestartFresh)
            }
            Mode::Supervised => {
                let choice = self
                    .operator
                    .choose(
                        &format!(
                            "{} is {} commits behind its remote (threshold {}). What now?",
                            req.branch, divergence.remote_only, self.threshold
                        ),
                        &SUPERVISED_CHOICES,
                        SUPERVISED_CHOICES.len() - 1,
                    )
                    .map_err(WorkflowError::Other)?;
                match choice {
                    0 => {
                        self.abandon(&req, divergence).await;
                        Ok(ReconcileOutcome::RestartFresh)
                    }
                    1 => self.merge_and_push(&req, divergence),
                    2 => Ok(ReconcileOutcome::ContinueAsIs),
                    _ => Ok(ReconcileOutcome::Aborted),
                }
            }
        }
    }

    fn merge_and_push(
        &self,
        req: &ReconcileRequest<'_>,
        divergence: Divergence,
    ) -> Result<ReconcileOutcome, WorkflowError> {
        let refs = [
            format!("{}/{}", REMOTE, req.branch),
            format!("{}/{}", REMOTE, self.vcs.mainline()),
        ];
        for refname in &refs {
            if let MergeOutcome::Conflict { paths } = self.vcs.merge_ref(req.workspace, refname)? {
                warn!(refname = %refname, ?paths, "Merge conflict; merge aborted");
                return Ok(ReconcileOutcome::Unresolved(format!(
                    "conflict merging {}: {}",
                    refname,
                    paths.join(", ")
                )));
            }
        }

        match self.vcs.push(req.workspace, req.branch)? {
            PushOutcome::Pushed if divergence.has_foreign_edits => {
                info!("Pushed after merging foreign edits; review must be redone");
                Ok(ReconcileOutcome::NeedsReReview)
            }
            PushOutcome::Pushed => Ok(ReconcileOutcome::Resolved),
            PushOutcome::Rejected { reason } => Ok(ReconcileOutcome::Unresolved(format!(
                "push rejected again after merge: {}",
                reason
            ))),
        }
    }

    /// Close the change request and remove the branch and workspace.
    /// Every step is best effort.
    async fn abandon(&self, req: &ReconcileRequest<'_>, divergence: Divergence) {
        if let Some(cr) = req.change_request {
            let summary = format!(
                "Abandoning this change request: `{}` diverged from its remote by {} commits \
                 (threshold {}{}). Work item #{} will restart from `{}`; the history stays \
                 attached to this closed request.",
                req.branch,
                divergence.remote_only,
                self.threshold,
                if divergence.has_foreign_edits { ", including edits by others" } else { "" },
                req.work_item_id,
                self.vcs.mainline(),
            );
            if let Err(e) = self.hosting.post_comment(cr, &summary).await {
                warn!(error = %e, "Failed to post abandonment summary");
            }
            if let Err(e) = self.hosting.close_change_request(cr).await {
                warn!(error = %e, "Failed to close change request");
            }
        }
        if let Err(e) = self.vcs.remove_workspace(req.workspace) {
            warn!(error = %e, "Failed to remove workspace");
        }
        if let Err(e) = self.vcs.delete_branch(req.branch, true) {
            warn!(error = %e, "Failed to delete branch");
        }
    }
}
