//! Phase orchestrator.
//!
//! Drives one work item through PRE_START, DEVELOPMENT, PUSH_REVIEW,
//! ASSESS_RESOLVE, MERGE and COMPLETION. The starting phase comes from live
//! state (see [`resume`]); the snapshot on disk is advisory and only carries
//! counters forward. Every phase is safe to re-run: change requests, review
//! requests, tracking issues and notifications are all looked up before they
//! are created.

pub mod interrupt;
pub mod resume;

use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::assess::{AssessInput, AssessOutcome, AssessmentLoop, read_fix_items, write_fix_items};
use crate::assistant::{Assistant, DevelopmentRequest, review_prompt};
use crate::blocker::{BlockerContext, BlockerGate, GateResult};
use crate::classify::Classifier;
use crate::config::Config;
use crate::divergence::{ReconcileOutcome, ReconcileRequest, Reconciler};
use crate::errors::{HostingError, VcsError, WorkflowError};
use crate::exit_codes;
use crate::hosting::{
    BLOCKED_LABEL, HostingPlatform, MergeResult, NEEDS_HUMAN_LABEL, ensure_change_request, work_item_marker,
};
use crate::inspector::{Inspector, RemoteState};
use crate::model::{
    ChangeRequest, ChangeState, ClassificationItem, ClassificationResult, NewChangeRequest, Urgency, WorkItem,
};
use crate::notes::NotesStore;
use crate::notify::{Notification, Notifier};
use crate::operator::Operator;
use crate::phase::{Mode, Phase};
use crate::poll::{PollOutcome, poll_until};
use crate::review::{
    ArtifactKind, REVIEW_MARKER, ReviewArtifact, artifacts_from_comments, is_review_current, latest_of_kind,
    requested_review_heads, review_request_marker,
};
use crate::snapshot::{SnapshotStore, VcsStatus, WorkflowSnapshot};
use crate::vcs::{PushOutcome, Vcs, branch_name_for, latest_work_time};

use interrupt::InterruptFlag;
use resume::ResumePoint;

/// Fresh restarts allowed per run after a divergence abandons the branch.
const MAX_RESTARTS: u32 = 1;

/// Trips from MERGE back to PUSH_REVIEW allowed per run.
const MAX_MERGE_REROUTES: u32 = 3;

/// External collaborators, injected so tests can swap in fakes.
pub struct Collaborators {
    pub hosting: Arc<dyn HostingPlatform>,
    pub vcs: Arc<dyn Vcs>,
    pub assistant: Arc<dyn Assistant>,
    pub operator: Arc<dyn Operator>,
    pub notifier: Arc<Notifier>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub mode: Mode,
    pub bypass_blockers: bool,
    /// Run a single phase and stop; MERGE always runs through COMPLETION.
    pub only: Option<Phase>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { merge_sha: Option<String> },
    /// A single-phase run finished; `next` is where a full run would continue.
    PhaseDone { phase: Phase, next: Phase },
    /// A single ASSESS_RESOLVE run, reported with its assessment.
    Assessed(AssessOutcome),
    Escalated { issue: Option<u64>, reason: String },
    Blocked { reason: String },
    /// No current review arrived within the polling budget.
    ReviewPending,
    Aborted { reason: String },
    Interrupted,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed { .. } | Self::PhaseDone { .. } => exit_codes::OK,
            Self::Assessed(outcome) => outcome.exit_code(),
            Self::Escalated { .. } | Self::Aborted { .. } => exit_codes::MANUAL_INTERVENTION,
            Self::Blocked { .. } => exit_codes::BLOCKED,
            Self::ReviewPending => exit_codes::REVIEW_STALE,
            Self::Interrupted => exit_codes::INTERRUPTED,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            Self::Completed { merge_sha: Some(sha) } => format!("merged as {}", sha),
            Self::Completed { merge_sha: None } => "completed".to_string(),
            Self::PhaseDone { phase, next } => format!("{} done; next phase is {}", phase, next),
            Self::Assessed(outcome) => match outcome {
                AssessOutcome::Merge {
                    tracking_issue: Some(issue),
                } => format!("MERGE (deferred items tracked in #{})", issue),
                AssessOutcome::FixAndRetry(items) => format!("FIX_AND_RETRY ({} item(s))", items.len()),
                AssessOutcome::Escalate { reason, .. } => format!("ESCALATE: {}", reason),
                other => other.label().to_string(),
            },
            Self::Escalated { issue: Some(issue), reason } => {
                format!("escalated to #{}: {}", issue, reason)
            }
            Self::Escalated { issue: None, reason } => format!("escalated: {}", reason),
            Self::Blocked { reason } => format!("blocked: {}", reason),
            Self::ReviewPending => "waiting for a review of the current head".to_string(),
            Self::Aborted { reason } => format!("aborted: {}", reason),
            Self::Interrupted => "interrupted; progress saved".to_string(),
        }
    }
}

/// What `undo` removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UndoSummary {
    pub closed_change_request: Option<u64>,
    pub removed_workspace: Option<PathBuf>,
    pub deleted_branch: Option<String>,
}

/// Live state, snapshot and the phase a run would start from.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub state: RemoteState,
    pub snapshot: Option<WorkflowSnapshot>,
    pub resume: ResumePoint,
}

enum Step {
    Goto(Phase),
    Finish(RunOutcome),
}

struct RunContext {
    work_item: WorkItem,
    branch: String,
    workspace: PathBuf,
    change_request: Option<ChangeRequest>,
    retry_count: u32,
    reroute_count: u32,
    restarts: u32,
    /// MERGE found the head uncovered by a current review or moved on the platform.
    merge_reroutes: u32,
    fix_items: Vec<ClassificationItem>,
    classification: Option<ClassificationResult>,
    last_assessment: Option<AssessOutcome>,
    merge_sha: Option<String>,
}

pub struct Orchestrator {
    config: Config,
    options: RunOptions,
    hosting: Arc<dyn HostingPlatform>,
    vcs: Arc<dyn Vcs>,
    assistant: Arc<dyn Assistant>,
    operator: Arc<dyn Operator>,
    notifier: Arc<Notifier>,
    classifier: Arc<Classifier>,
    inspector: Inspector,
    assessment: AssessmentLoop,
    reconciler: Reconciler,
    gate: BlockerGate,
    snapshots: SnapshotStore,
    notes: NotesStore,
    interrupt: InterruptFlag,
    project_context: String,
    session_budget_exhausted: bool,
}

impl Orchestrator {
    pub fn new(config: Config, deps: Collaborators, options: RunOptions, interrupt: InterruptFlag) -> Self {
        let project_context = config.project_context();
        let classifier = Arc::new(Classifier::new(deps.assistant.clone(), &config.cache_dir));
        let notes = NotesStore::new(&config.notes_file());
        let inspector = Inspector::new(
            deps.hosting.clone(),
            deps.vcs.clone(),
            classifier.clone(),
            &project_context,
        );
        let assessment = AssessmentLoop::new(
            deps.hosting.clone(),
            classifier.clone(),
            &project_context,
            config.max_retries(),
            config.max_reroutes(),
        );
        let reconciler = Reconciler::new(
            deps.vcs.clone(),
            deps.hosting.clone(),
            deps.operator.clone(),
            config.divergence_threshold(),
        );
        let gate = BlockerGate::new(
            deps.hosting.clone(),
            deps.operator.clone(),
            deps.notifier.clone(),
            notes.clone(),
            config.sensitivity_rules(),
            options.mode,
            options.bypass_blockers,
        );
        Self {
            snapshots: SnapshotStore::new(&config.state_dir),
            config,
            options,
            hosting: deps.hosting,
            vcs: deps.vcs,
            assistant: deps.assistant,
            operator: deps.operator,
            notifier: deps.notifier,
            classifier,
            inspector,
            assessment,
            reconciler,
            gate,
            notes,
            interrupt,
            project_context,
            session_budget_exhausted: false,
        }
    }

    pub fn snapshots(&self) -> &SnapshotStore {
        &self.snapshots
    }

    /// Whether an assistant session reported its budget as spent.
    pub fn session_budget_exhausted(&self) -> bool {
        self.session_budget_exhausted
    }

    #[instrument(skip(self), fields(mode = %self.options.mode, run_id = %Uuid::new_v4()))]
    pub async fn run(&mut self, work_item_id: u64) -> anyhow::Result<RunOutcome> {
        let state = self.inspector.inspect(work_item_id).await;
        let snapshot = self.snapshots.load(work_item_id);
        let point = resume::resume_point(&state, snapshot.as_ref());

        if !self
            .hosting
            .credentials_valid()
            .await
            .context("Failed to verify hosting credentials")?
        {
            return Ok(RunOutcome::Blocked {
                reason: "hosting credentials are missing or expired".to_string(),
            });
        }

        let mut ctx = self
            .prepare(work_item_id, &state)
            .await
            .with_context(|| format!("PRE_START failed for #{}", work_item_id))?;
        ctx.retry_count = point.retry_count;
        ctx.reroute_count = point.reroute_count;

        let mut phase = self.options.only.unwrap_or(point.phase);
        info!(
            work_item = work_item_id,
            phase = %phase,
            retry = ctx.retry_count,
            branch = %ctx.branch,
            "Starting workflow"
        );

        loop {
            if self.interrupt.is_raised() {
                return self.on_interrupt(&ctx, phase).await;
            }
            let step = match phase {
                Phase::PreStart => Ok(Step::Goto(Phase::Development)),
                Phase::Development => self.development(&mut ctx).await,
                Phase::PushReview => self.push_review(&mut ctx).await,
                Phase::AssessResolve => self.assess_resolve(&mut ctx).await,
                Phase::Merge => self.merge(&mut ctx).await,
                Phase::Completion => self.completion(&ctx).await,
            };
            match step {
                Ok(Step::Goto(next)) => {
                    debug!(from = %phase, to = %next, "Phase transition");
                    if self.interrupt.is_raised() {
                        return self.on_interrupt(&ctx, next).await;
                    }
                    if let Some(only) = self.options.only
                        && !(only == Phase::Merge && next == Phase::Completion)
                    {
                        return Ok(match (only, &ctx.last_assessment) {
                            (Phase::AssessResolve, Some(outcome)) => RunOutcome::Assessed(outcome.clone()),
                            _ => RunOutcome::PhaseDone { phase, next },
                        });
                    }
                    phase = next;
                }
                Ok(Step::Finish(outcome)) => {
                    info!(outcome = %outcome.summary(), "Workflow stopped");
                    return Ok(outcome);
                }
                Err(e) => {
                    if let Err(save) = self.save_snapshot(&ctx, phase, false) {
                        warn!(error = %save, "Failed to save snapshot after error");
                    }
                    return Err(anyhow::Error::from(e).context(format!(
                        "{} failed for #{}; resume with `steward run {}`",
                        phase, work_item_id, work_item_id
                    )));
                }
            }
        }
    }

    /// PRE_START: validate the work item and make sure a workspace exists.
    async fn prepare(&self, work_item_id: u64, state: &RemoteState) -> Result<RunContext, WorkflowError> {
        let work_item = match &state.work_item {
            Some(item) => item.clone(),
            None => self.hosting.work_item(work_item_id).await.map_err(|e| match e {
                HostingError::NotFound { .. } => WorkflowError::WorkItemNotFound { id: work_item_id },
                other => other.into(),
            })?,
        };
        if !work_item.is_open() {
            return Err(WorkflowError::WorkItemClosed { id: work_item_id });
        }

        let branch = state
            .branch
            .clone()
            .unwrap_or_else(|| branch_name_for(work_item_id, &work_item.title));
        let workspace = match &state.workspace {
            Some(ws) => ws.clone(),
            None => {
                let path = self.config.workspaces_dir.join(format!("issue-{}", work_item_id));
                self.vcs.create_workspace(&branch, &path)?;
                info!(branch = %branch, path = %path.display(), "Created workspace");
                path
            }
        };

        let fix_items = if state.change_request.is_some() {
            read_fix_items(&self.config.fix_items_file(work_item_id)).unwrap_or_else(|e| {
                warn!(error = %e, "Ignoring unreadable fix items");
                Vec::new()
            })
        } else {
            Vec::new()
        };

        Ok(RunContext {
            work_item,
            branch,
            workspace,
            change_request: state.change_request.clone(),
            retry_count: 0,
            reroute_count: 0,
            restarts: 0,
            merge_reroutes: 0,
            fix_items,
            classification: state.latest_classification.clone(),
            last_assessment: None,
            merge_sha: None,
        })
    }

    async fn development(&mut self, ctx: &mut RunContext) -> Result<Step, WorkflowError> {
        let id = ctx.work_item.id;
        let request = DevelopmentRequest {
            work_item: ctx.work_item.clone(),
            workspace: ctx.workspace.clone(),
            fix_items: ctx.fix_items.clone(),
            project_context: self.project_context.clone(),
        };
        info!(fix = request.is_fix(), items = request.fix_items.len(), "Starting development session");
        let session = self.assistant.develop(&request).await?;
        if session.budget_exhausted {
            self.session_budget_exhausted = true;
        }

        let message = if !session.completed {
            format!("WIP: #{} session stopped before finishing", id)
        } else if request.is_fix() {
            format!("Address review findings for #{} (round {})", id, ctx.retry_count)
        } else {
            format!("Implement #{}: {}", id, ctx.work_item.title)
        };
        let commit = self.vcs.commit_all(&ctx.workspace, &message)?;

        if !session.completed {
            self.save_snapshot(ctx, Phase::Development, false)?;
            let outcome = if session.budget_exhausted {
                RunOutcome::Blocked {
                    reason: "assistant session budget exhausted".to_string(),
                }
            } else {
                RunOutcome::Aborted {
                    reason: "development session timed out; partial work committed".to_string(),
                }
            };
            return Ok(Step::Finish(outcome));
        }

        if commit.is_none() {
            let has_work = self
                .vcs
                .local_work_commits(&ctx.branch)
                .map(|commits| commits.iter().any(|c| !c.is_sync_merge))
                .unwrap_or(false);
            if !has_work {
                return Ok(Step::Finish(RunOutcome::Aborted {
                    reason: "development session made no changes".to_string(),
                }));
            }
            debug!("Session left no new changes; continuing with existing commits");
        }

        ctx.fix_items.clear();
        remove_if_present(&self.config.fix_items_file(id));
        Ok(Step::Goto(Phase::PushReview))
    }

    async fn push_review(&mut self, ctx: &mut RunContext) -> Result<Step, WorkflowError> {
        let id = ctx.work_item.id;
        if self.vcs.has_uncommitted_changes(&ctx.workspace)? {
            self.vcs
                .commit_all(&ctx.workspace, &format!("WIP: uncommitted changes for #{}", id))?;
        }

        let mut foreign_edits = false;
        if let PushOutcome::Rejected { reason } = self.vcs.push(&ctx.workspace, &ctx.branch)? {
            debug!(%reason, "Push rejected");
            let request = ReconcileRequest {
                work_item_id: id,
                branch: &ctx.branch,
                workspace: &ctx.workspace,
                change_request: ctx.change_request.as_ref().map(|c| c.id),
                mode: self.options.mode,
            };
            let stop = |reason: String| Step::Finish(RunOutcome::Aborted { reason });
            match self.reconciler.reconcile(request).await? {
                ReconcileOutcome::Resolved => {}
                ReconcileOutcome::NeedsReReview => foreign_edits = true,
                ReconcileOutcome::RestartFresh => return self.restart_fresh(ctx),
                ReconcileOutcome::Unresolved(reason) => {
                    self.save_snapshot(ctx, Phase::PushReview, false)?;
                    return Ok(stop(reason));
                }
                ReconcileOutcome::ContinueAsIs => {
                    self.save_snapshot(ctx, Phase::PushReview, false)?;
                    return Ok(stop("branch left diverged; reconcile it and run again".to_string()));
                }
                ReconcileOutcome::Aborted => {
                    self.save_snapshot(ctx, Phase::PushReview, false)?;
                    return Ok(stop("stopped by operator".to_string()));
                }
            }
        }

        let (cr, _) = ensure_change_request(&*self.hosting, &self.new_change_request(ctx)).await?;
        let cr_id = cr.id;
        ctx.change_request = Some(cr);

        let head = self
            .vcs
            .local_head(&ctx.branch)?
            .ok_or_else(|| VcsError::NotFound(format!("refs/heads/{}", ctx.branch)))?;
        let (_, current) = self.review_status(cr_id, &ctx.branch).await?;
        if current && !foreign_edits {
            debug!("Existing review already covers the head");
        } else if self.config.toml.workflow.local_review {
            self.post_local_review(ctx, cr_id).await?;
        } else {
            self.request_review(cr_id, &head).await?;
        }

        let this: &Self = self;
        let branch = ctx.branch.as_str();
        let outcome = poll_until(self.config.poll_backoff(), &self.interrupt, move || {
            this.current_review(cr_id, branch)
        })
        .await?;
        match outcome {
            PollOutcome::Ready(_) => Ok(Step::Goto(Phase::AssessResolve)),
            PollOutcome::Interrupted => Ok(Step::Goto(Phase::PushReview)),
            PollOutcome::TimedOut => {
                self.save_snapshot(ctx, Phase::PushReview, false)?;
                Ok(Step::Finish(RunOutcome::ReviewPending))
            }
        }
    }

    async fn assess_resolve(&mut self, ctx: &mut RunContext) -> Result<Step, WorkflowError> {
        let id = ctx.work_item.id;
        let cr = ctx
            .change_request
            .clone()
            .ok_or(WorkflowError::NoChangeRequest { id })?;
        let (review, current) = self.review_status(cr.id, &ctx.branch).await?;
        let Some(review) = review else {
            info!("No review yet");
            return Ok(Step::Goto(Phase::PushReview));
        };

        let report = self
            .assessment
            .assess(AssessInput {
                work_item: &ctx.work_item,
                change_request: &cr,
                review: &review,
                review_current: current,
                retry_count: ctx.retry_count,
                reroute_count: ctx.reroute_count,
            })
            .await?;
        ctx.classification = report.classification;
        ctx.last_assessment = Some(report.outcome.clone());

        match report.outcome {
            AssessOutcome::Merge { tracking_issue } => {
                if let Some(issue) = tracking_issue {
                    info!(issue, "Merging with deferred items tracked");
                }
                ctx.reroute_count = 0;
                Ok(Step::Goto(Phase::Merge))
            }
            AssessOutcome::FixAndRetry(items) => {
                // Saved before the increment: a resume re-assesses this round.
                self.save_snapshot(ctx, Phase::AssessResolve, false)?;
                ctx.retry_count += 1;
                ctx.reroute_count = 0;
                if let Err(e) = write_fix_items(&self.config.fix_items_file(id), &items) {
                    warn!(error = %e, "Failed to persist fix items");
                }
                ctx.fix_items = items;
                Ok(Step::Goto(Phase::Development))
            }
            AssessOutcome::Escalate { issue, reason } => {
                if let Err(e) = self.hosting.add_label(id, NEEDS_HUMAN_LABEL).await {
                    warn!(error = %e, "Failed to label work item");
                }
                self.notifier
                    .notify(&Notification {
                        work_item_id: id,
                        title: format!("#{} needs manual intervention", id),
                        body: match issue {
                            Some(issue) => format!("{} (see #{})", reason, issue),
                            None => reason.clone(),
                        },
                        urgency: Urgency::High,
                    })
                    .await;
                self.save_snapshot(ctx, Phase::AssessResolve, false)?;
                Ok(Step::Finish(RunOutcome::Escalated { issue, reason }))
            }
            AssessOutcome::StaleReroute => {
                ctx.reroute_count += 1;
                self.save_snapshot(ctx, Phase::PushReview, false)?;
                Ok(Step::Goto(Phase::PushReview))
            }
        }
    }

    async fn merge(&mut self, ctx: &mut RunContext) -> Result<Step, WorkflowError> {
        let id = ctx.work_item.id;
        let cr = ctx
            .change_request
            .clone()
            .ok_or(WorkflowError::NoChangeRequest { id })?;
        let head = self
            .vcs
            .local_head(&ctx.branch)?
            .ok_or_else(|| VcsError::NotFound(format!("refs/heads/{}", ctx.branch)))?;

        let review = match self.review_status(cr.id, &ctx.branch).await? {
            (Some(review), true) => review,
            _ => {
                if self.options.only == Some(Phase::Merge) {
                    info!("No current review covers the head; not merging");
                    self.save_snapshot(ctx, Phase::PushReview, false)?;
                    return Ok(Step::Finish(RunOutcome::Assessed(AssessOutcome::StaleReroute)));
                }
                return self.reroute_from_merge(ctx, "no current review covers the head");
            }
        };

        let hosting: &dyn HostingPlatform = &*self.hosting;
        let sha = head.as_str();
        let checks = poll_until(self.config.poll_backoff(), &self.interrupt, move || {
            hosting.checks_passing(sha)
        })
        .await?;
        if checks == PollOutcome::Interrupted {
            return Ok(Step::Goto(Phase::Merge));
        }

        let classification = ctx
            .classification
            .clone()
            .or_else(|| self.classifier.cached(&review.review_text(), &self.project_context));
        let changed_paths = self.vcs.changed_paths(&ctx.branch).unwrap_or_else(|e| {
            warn!(error = %e, "Could not list changed paths");
            Vec::new()
        });

        let gate = self
            .gate
            .check_blockers(&BlockerContext {
                work_item_id: id,
                head_sha: Some(&head),
                classification: classification.as_ref(),
                changed_paths: &changed_paths,
                session_budget_exhausted: self.session_budget_exhausted,
            })
            .await?;
        if let GateResult::Blocked { blocker_type, details } = gate {
            if let Err(e) = self.hosting.add_label(id, BLOCKED_LABEL).await {
                warn!(error = %e, "Failed to label work item");
            }
            self.save_snapshot(ctx, Phase::Merge, false)?;
            return Ok(Step::Finish(RunOutcome::Blocked {
                reason: format!("{}: {}", blocker_type, details),
            }));
        }

        let title = format!("{} (#{})", ctx.work_item.title, cr.id);
        match self.hosting.merge_change_request(cr.id, &head, &title).await? {
            MergeResult::Merged { sha } => {
                info!(change_request = cr.id, %sha, "Merged");
                if let Err(e) = self.hosting.close_work_item(id).await {
                    warn!(error = %e, "Merged, but failed to close the work item");
                }
                ctx.merge_sha = Some(sha);
                Ok(Step::Goto(Phase::Completion))
            }
            MergeResult::HeadChanged => {
                warn!("Change request head moved; pushing and reviewing again");
                self.reroute_from_merge(ctx, "the change request head kept moving")
            }
            MergeResult::NotMergeable { reason } => {
                self.save_snapshot(ctx, Phase::Merge, false)?;
                Ok(Step::Finish(RunOutcome::Blocked { reason }))
            }
        }
    }

    /// COMPLETION: every cleanup step is best effort.
    async fn completion(&self, ctx: &RunContext) -> Result<Step, WorkflowError> {
        let id = ctx.work_item.id;
        if let Err(e) = self.vcs.remove_workspace(&ctx.workspace) {
            warn!(error = %e, "Failed to remove workspace");
        }
        if let Err(e) = self.vcs.delete_branch(&ctx.branch, true) {
            warn!(error = %e, "Failed to delete branch");
        }
        if let Err(e) = self.snapshots.delete(id) {
            warn!(error = %e, "Failed to delete snapshot");
        }
        remove_if_present(&self.config.fix_items_file(id));

        let summary = match &ctx.merge_sha {
            Some(sha) => format!("Merged as {} after {} fix round(s)", sha, ctx.retry_count),
            None => "Completed".to_string(),
        };
        if let Err(e) = self.notes.append(id, &summary) {
            warn!(error = %e, "Failed to record completion note");
        }
        self.notifier
            .notify(&Notification {
                work_item_id: id,
                title: format!("#{} merged", id),
                body: summary,
                urgency: Urgency::Normal,
            })
            .await;
        Ok(Step::Finish(RunOutcome::Completed {
            merge_sha: ctx.merge_sha.clone(),
        }))
    }

    fn reroute_from_merge(&self, ctx: &mut RunContext, why: &str) -> Result<Step, WorkflowError> {
        ctx.merge_reroutes += 1;
        if ctx.merge_reroutes > MAX_MERGE_REROUTES {
            self.save_snapshot(ctx, Phase::Merge, false)?;
            return Ok(Step::Finish(RunOutcome::Blocked {
                reason: format!("{} after {} attempts to merge", why, MAX_MERGE_REROUTES),
            }));
        }
        info!(attempt = ctx.merge_reroutes, "{}; reviewing again", why);
        Ok(Step::Goto(Phase::PushReview))
    }

    fn restart_fresh(&self, ctx: &mut RunContext) -> Result<Step, WorkflowError> {
        ctx.restarts += 1;
        if ctx.restarts > MAX_RESTARTS {
            return Ok(Step::Finish(RunOutcome::Aborted {
                reason: "branch diverged again after a fresh restart".to_string(),
            }));
        }
        let id = ctx.work_item.id;
        info!(restart = ctx.restarts, "Restarting from mainline");
        ctx.change_request = None;
        ctx.retry_count = 0;
        ctx.reroute_count = 0;
        ctx.fix_items.clear();
        ctx.classification = None;
        ctx.last_assessment = None;
        if let Err(e) = self.snapshots.delete(id) {
            warn!(error = %e, "Failed to delete snapshot");
        }
        if let Err(e) = self.notes.forget_work_item(id) {
            warn!(error = %e, "Failed to clear notes");
        }
        remove_if_present(&self.config.fix_items_file(id));
        self.vcs.create_workspace(&ctx.branch, &ctx.workspace)?;
        Ok(Step::Goto(Phase::Development))
    }

    async fn on_interrupt(&self, ctx: &RunContext, phase: Phase) -> anyhow::Result<RunOutcome> {
        let dirty = self.vcs.has_uncommitted_changes(&ctx.workspace).unwrap_or_else(|e| {
            warn!(error = %e, "Could not check workspace status");
            false
        });
        if dirty {
            let commit = match self.options.mode {
                Mode::Unsupervised => true,
                Mode::Supervised => self
                    .operator
                    .confirm("Commit work in progress before stopping?", true)
                    .unwrap_or_else(|e| {
                        warn!(error = %e, "Prompt failed; leaving changes uncommitted");
                        false
                    }),
            };
            if commit {
                let message = format!("WIP: interrupted during {} (#{})", phase, ctx.work_item.id);
                match self.vcs.commit_all(&ctx.workspace, &message) {
                    Ok(Some(sha)) => info!(%sha, "Committed work in progress"),
                    Ok(None) => {}
                    Err(e) => warn!(error = %e, "Failed to commit work in progress"),
                }
                if self.options.mode.is_auto() {
                    match self.vcs.push(&ctx.workspace, &ctx.branch) {
                        Ok(PushOutcome::Pushed) => info!("Pushed work in progress"),
                        Ok(PushOutcome::Rejected { reason }) => warn!(%reason, "WIP push rejected"),
                        Err(e) => warn!(error = %e, "WIP push failed"),
                    }
                }
            }
        }
        self.save_snapshot(ctx, phase, true)
            .context("Failed to save snapshot on interrupt")?;
        warn!(phase = %phase, "Interrupted; resume with `steward run {}`", ctx.work_item.id);
        Ok(RunOutcome::Interrupted)
    }

    fn new_change_request(&self, ctx: &RunContext) -> NewChangeRequest {
        let item = &ctx.work_item;
        let mut body = String::new();
        if !item.description.trim().is_empty() {
            body.push_str(item.description.trim());
            body.push_str("\n\n");
        }
        body.push_str(&format!("Closes #{}\n\n{}", item.id, work_item_marker(item.id)));
        NewChangeRequest {
            title: item.title.clone(),
            body,
            branch: ctx.branch.clone(),
            base: self.vcs.mainline().to_string(),
            draft: self.config.toml.workflow.draft_change_requests,
        }
    }

    async fn post_local_review(&self, ctx: &RunContext, cr_id: u64) -> Result<(), WorkflowError> {
        let diff = self.vcs.diff_against_mainline(&ctx.workspace)?;
        info!(diff_bytes = diff.len(), "Requesting local review");
        let text = self.assistant.complete(&review_prompt(&ctx.work_item, &diff)).await?;
        let body = if text.contains(REVIEW_MARKER) {
            text
        } else {
            format!("{}\n{}", REVIEW_MARKER, text)
        };
        self.hosting.post_comment(cr_id, &body).await?;
        Ok(())
    }

    /// Ask for an external review of `head`, once per head.
    async fn request_review(&self, cr_id: u64, head: &str) -> Result<(), WorkflowError> {
        let comments = self.hosting.comments(cr_id).await?;
        if requested_review_heads(&comments).iter().any(|h| h == head) {
            debug!(head, "Review already requested");
            return Ok(());
        }
        let short = &head[..head.len().min(8)];
        self.hosting
            .post_comment(
                cr_id,
                &format!("{}\nReview requested for `{}`.", review_request_marker(head), short),
            )
            .await?;
        Ok(())
    }

    /// Latest review on the change request and whether it covers the branch.
    async fn review_status(
        &self,
        cr_id: u64,
        branch: &str,
    ) -> Result<(Option<ReviewArtifact>, bool), WorkflowError> {
        let comments = self.hosting.comments(cr_id).await?;
        let artifacts = artifacts_from_comments(&comments);
        let Some(review) = latest_of_kind(&artifacts, ArtifactKind::Review).cloned() else {
            return Ok((None, false));
        };
        let local = self.vcs.local_head(branch)?;
        let remote = self.vcs.remote_head(branch)?;
        let work = latest_work_time(&self.vcs.local_work_commits(branch)?);
        let current = is_review_current(review.created_at, work, local.as_deref(), remote.as_deref());
        Ok((Some(review), current))
    }

    async fn current_review(&self, cr_id: u64, branch: &str) -> Result<Option<ReviewArtifact>, WorkflowError> {
        let (review, current) = self.review_status(cr_id, branch).await?;
        Ok(review.filter(|_| current))
    }

    fn save_snapshot(&self, ctx: &RunContext, phase: Phase, interrupted: bool) -> Result<(), WorkflowError> {
        let mut snapshot = WorkflowSnapshot::new(ctx.work_item.id, phase, self.options.mode);
        snapshot.retry_count = ctx.retry_count;
        snapshot.reroute_count = ctx.reroute_count;
        snapshot.pr_id = ctx.change_request.as_ref().map(|c| c.id);
        snapshot.workspace_path = Some(ctx.workspace.clone());
        snapshot.interrupted = interrupted;
        snapshot.vcs_status = VcsStatus {
            branch: Some(ctx.branch.clone()),
            local_head: self.vcs.local_head(&ctx.branch).ok().flatten(),
            remote_head: self.vcs.remote_head(&ctx.branch).ok().flatten(),
            uncommitted_changes: self.vcs.has_uncommitted_changes(&ctx.workspace).unwrap_or(false),
        };
        self.snapshots.save(&snapshot)
    }

    /// Tear down everything the workflow created for a work item.
    ///
    /// Refuses once the change request has been merged.
    #[instrument(skip(self))]
    pub async fn undo(&self, work_item_id: u64) -> Result<UndoSummary, WorkflowError> {
        let state = self.inspector.inspect(work_item_id).await;
        let snapshot = self.snapshots.load(work_item_id);

        if state.change_request.is_none()
            && let Some(pr) = snapshot.as_ref().and_then(|s| s.pr_id)
            && let Ok(cr) = self.hosting.change_request(pr).await
            && cr.state == ChangeState::Merged
        {
            return Err(WorkflowError::AlreadyMerged { id: pr });
        }

        let mut summary = UndoSummary::default();
        if let Some(cr) = &state.change_request {
            if let Err(e) = self
                .hosting
                .post_comment(cr.id, "Closed by `steward undo`; the branch has been deleted.")
                .await
            {
                warn!(error = %e, "Failed to comment before closing");
            }
            self.hosting.close_change_request(cr.id).await?;
            summary.closed_change_request = Some(cr.id);
        }
        let workspace = state
            .workspace
            .clone()
            .or_else(|| snapshot.as_ref().and_then(|s| s.workspace_path.clone()));
        if let Some(ws) = workspace {
            match self.vcs.remove_workspace(&ws) {
                Ok(()) => summary.removed_workspace = Some(ws),
                Err(e) => warn!(error = %e, "Failed to remove workspace"),
            }
        }
        if let Some(branch) = &state.branch {
            match self.vcs.delete_branch(branch, true) {
                Ok(()) => summary.deleted_branch = Some(branch.clone()),
                Err(e) => warn!(error = %e, "Failed to delete branch"),
            }
        }
        if let Err(e) = self.snapshots.delete(work_item_id) {
            warn!(error = %e, "Failed to delete snapshot");
        }
        if let Err(e) = self.notes.forget_work_item(work_item_id) {
            warn!(error = %e, "Failed to clear notes");
        }
        remove_if_present(&self.config.fix_items_file(work_item_id));
        info!(?summary, "Undone");
        Ok(summary)
    }

    pub async fn status(&self, work_item_id: u64) -> StatusReport {
        let state = self.inspector.inspect(work_item_id).await;
        let snapshot = self.snapshots.load(work_item_id);
        let resume = resume::resume_point(&state, snapshot.as_ref());
        StatusReport {
            state,
            snapshot,
            resume,
        }
    }
}

fn remove_if_present(path: &std::path::Path) {
    if let Err(e) = std::fs::remove_file(path)
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to remove file");
    }
}
