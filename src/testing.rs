//! In-memory fakes of the external collaborators, for unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::assistant::{Assistant, DevelopmentRequest, SessionOutcome};
use crate::errors::{AssistantError, HostingError, VcsError};
use crate::hosting::{HostingPlatform, MergeResult};
use crate::model::{ChangeRequest, ChangeState, Comment, ItemState, NewChangeRequest, WorkItem};
use crate::notify::{Notification, NotifyChannel};
use crate::operator::Operator;
use crate::vcs::{CommitInfo, MergeOutcome, PushOutcome, Vcs, Worktree};

type Hook = Arc<dyn Fn() + Send + Sync>;

// ---------------------------------------------------------------------------
// Assistant
// ---------------------------------------------------------------------------

#[derive(Default)]
struct AssistantState {
    completions: VecDeque<String>,
    prompts: Vec<String>,
    sessions: VecDeque<SessionOutcome>,
    requests: Vec<DevelopmentRequest>,
}

pub struct FakeAssistant {
    model: String,
    state: Mutex<AssistantState>,
    on_develop: Option<Hook>,
}

impl FakeAssistant {
    pub fn new(model: &str) -> Self {
        Self {
            model: model.to_string(),
            state: Mutex::new(AssistantState::default()),
            on_develop: None,
        }
    }

    /// Answers for `complete`, consumed in order.
    pub fn with_completions(self, completions: Vec<String>) -> Self {
        self.state.lock().unwrap().completions = completions.into();
        self
    }

    /// Outcomes for `develop`, consumed in order; a completed session after that.
    pub fn with_sessions(self, sessions: Vec<SessionOutcome>) -> Self {
        self.state.lock().unwrap().sessions = sessions.into();
        self
    }

    /// Run `hook` during every development session, e.g. to dirty a fake workspace.
    pub fn on_develop(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_develop = Some(Arc::new(hook));
        self
    }

    pub fn push_completion(&self, completion: &str) {
        self.state.lock().unwrap().completions.push_back(completion.to_string());
    }

    pub fn complete_calls(&self) -> usize {
        self.state.lock().unwrap().prompts.len()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.state.lock().unwrap().prompts.clone()
    }

    pub fn develop_calls(&self) -> usize {
        self.state.lock().unwrap().requests.len()
    }

    pub fn develop_requests(&self) -> Vec<DevelopmentRequest> {
        self.state.lock().unwrap().requests.clone()
    }
}

#[async_trait]
impl Assistant for FakeAssistant {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn develop(&self, request: &DevelopmentRequest) -> Result<SessionOutcome, AssistantError> {
        if let Some(hook) = &self.on_develop {
            hook();
        }
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());
        Ok(state.sessions.pop_front().unwrap_or(SessionOutcome {
            completed: true,
            output: "done".into(),
            budget_exhausted: false,
        }))
    }

    async fn complete(&self, prompt: &str) -> Result<String, AssistantError> {
        let mut state = self.state.lock().unwrap();
        state.prompts.push(prompt.to_string());
        state.completions.pop_front().ok_or(AssistantError::EmptyResponse)
    }
}

// ---------------------------------------------------------------------------
// Hosting platform
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedIssue {
    pub id: u64,
    pub title: String,
    pub body: String,
    pub labels: Vec<String>,
}

struct HostingState {
    next_id: u64,
    work_items: HashMap<u64, WorkItem>,
    change_requests: BTreeMap<u64, ChangeRequest>,
    comments: HashMap<u64, Vec<Comment>>,
    issues: Vec<CreatedIssue>,
    labels: Vec<(u64, String)>,
    merge_results: VecDeque<MergeResult>,
    checks: Option<bool>,
    credentials: bool,
    fail_comments: bool,
    merges: usize,
}

pub struct FakeHosting {
    state: Mutex<HostingState>,
}

impl Default for FakeHosting {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeHosting {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HostingState {
                next_id: 100,
                work_items: HashMap::new(),
                change_requests: BTreeMap::new(),
                comments: HashMap::new(),
                issues: Vec::new(),
                labels: Vec::new(),
                merge_results: VecDeque::new(),
                checks: Some(true),
                credentials: true,
                fail_comments: false,
                merges: 0,
            }),
        }
    }

    pub fn add_work_item(&self, item: WorkItem) {
        self.state.lock().unwrap().work_items.insert(item.id, item);
    }

    pub fn add_change_request(&self, cr: ChangeRequest) {
        self.state.lock().unwrap().change_requests.insert(cr.id, cr);
    }

    /// Add a comment with an explicit timestamp.
    pub fn add_comment(&self, id: u64, body: &str, created_at: DateTime<Utc>) {
        self.state.lock().unwrap().comments.entry(id).or_default().push(Comment {
            author: "reviewer".into(),
            body: body.to_string(),
            created_at,
        });
    }

    pub fn set_checks(&self, checks: Option<bool>) {
        self.state.lock().unwrap().checks = checks;
    }

    pub fn set_credentials(&self, valid: bool) {
        self.state.lock().unwrap().credentials = valid;
    }

    pub fn set_head(&self, cr_id: u64, sha: &str) {
        if let Some(cr) = self.state.lock().unwrap().change_requests.get_mut(&cr_id) {
            cr.head_sha = sha.to_string();
        }
    }

    /// Make comment listing fail, as a flaky API would.
    pub fn fail_comments(&self) {
        self.state.lock().unwrap().fail_comments = true;
    }

    pub fn push_merge_result(&self, result: MergeResult) {
        self.state.lock().unwrap().merge_results.push_back(result);
    }

    pub fn open_change_request_count(&self) -> usize {
        self.state.lock().unwrap().change_requests.values().filter(|cr| cr.is_open()).count()
    }

    pub fn change_request_state(&self, id: u64) -> Option<ChangeState> {
        self.state.lock().unwrap().change_requests.get(&id).map(|cr| cr.state)
    }

    pub fn created_issues(&self) -> Vec<CreatedIssue> {
        self.state.lock().unwrap().issues.clone()
    }

    pub fn comments_on(&self, id: u64) -> Vec<Comment> {
        self.state.lock().unwrap().comments.get(&id).cloned().unwrap_or_default()
    }

    pub fn labels_on(&self, id: u64) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .labels
            .iter()
            .filter(|(i, _)| *i == id)
            .map(|(_, l)| l.clone())
            .collect()
    }

    pub fn work_item_state(&self, id: u64) -> Option<ItemState> {
        self.state.lock().unwrap().work_items.get(&id).map(|w| w.state)
    }

    pub fn merge_calls(&self) -> usize {
        self.state.lock().unwrap().merges
    }
}

#[async_trait]
impl HostingPlatform for FakeHosting {
    async fn credentials_valid(&self) -> Result<bool, HostingError> {
        Ok(self.state.lock().unwrap().credentials)
    }

    async fn work_item(&self, id: u64) -> Result<WorkItem, HostingError> {
        self.state
            .lock()
            .unwrap()
            .work_items
            .get(&id)
            .cloned()
            .ok_or(HostingError::NotFound {
                what: format!("issue #{}", id),
            })
    }

    async fn close_work_item(&self, id: u64) -> Result<(), HostingError> {
        if let Some(item) = self.state.lock().unwrap().work_items.get_mut(&id) {
            item.state = ItemState::Closed;
        }
        Ok(())
    }

    async fn create_issue(&self, title: &str, body: &str, labels: &[&str]) -> Result<u64, HostingError> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        let mut item = WorkItem::new(id, title);
        item.description = body.to_string();
        state.work_items.insert(id, item);
        state.issues.push(CreatedIssue {
            id,
            title: title.to_string(),
            body: body.to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
        });
        Ok(id)
    }

    async fn find_issue_by_marker(&self, label: &str, marker: &str) -> Result<Option<u64>, HostingError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .issues
            .iter()
            .filter(|i| state.work_items.get(&i.id).is_some_and(|w| w.is_open()))
            .find(|i| i.labels.iter().any(|l| l == label) && i.body.contains(marker))
            .map(|i| i.id))
    }

    async fn open_change_requests(&self) -> Result<Vec<ChangeRequest>, HostingError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .change_requests
            .values()
            .filter(|cr| cr.is_open())
            .cloned()
            .collect())
    }

    async fn change_request(&self, id: u64) -> Result<ChangeRequest, HostingError> {
        self.state
            .lock()
            .unwrap()
            .change_requests
            .get(&id)
            .cloned()
            .ok_or(HostingError::NotFound {
                what: format!("pull request #{}", id),
            })
    }

    async fn create_change_request(&self, new: &NewChangeRequest) -> Result<ChangeRequest, HostingError> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let cr = ChangeRequest {
            id: state.next_id,
            title: new.title.clone(),
            body: new.body.clone(),
            branch: new.branch.clone(),
            base: new.base.clone(),
            head_sha: String::new(),
            state: ChangeState::Open,
            draft: new.draft,
            mergeable: Some(true),
        };
        state.change_requests.insert(cr.id, cr.clone());
        Ok(cr)
    }

    async fn close_change_request(&self, id: u64) -> Result<(), HostingError> {
        if let Some(cr) = self.state.lock().unwrap().change_requests.get_mut(&id) {
            cr.state = ChangeState::Closed;
        }
        Ok(())
    }

    async fn merge_change_request(
        &self,
        id: u64,
        expected_head: &str,
        _title: &str,
    ) -> Result<MergeResult, HostingError> {
        let mut state = self.state.lock().unwrap();
        state.merges += 1;
        if let Some(result) = state.merge_results.pop_front() {
            return Ok(result);
        }
        let Some(cr) = state.change_requests.get_mut(&id) else {
            return Err(HostingError::NotFound {
                what: format!("pull request #{}", id),
            });
        };
        if !cr.head_sha.is_empty() && cr.head_sha != expected_head {
            return Ok(MergeResult::HeadChanged);
        }
        cr.state = ChangeState::Merged;
        Ok(MergeResult::Merged {
            sha: format!("squash-{}", id),
        })
    }

    async fn comments(&self, id: u64) -> Result<Vec<Comment>, HostingError> {
        let state = self.state.lock().unwrap();
        if state.fail_comments {
            return Err(HostingError::Status {
                status: 502,
                body: "bad gateway".into(),
            });
        }
        Ok(state.comments.get(&id).cloned().unwrap_or_default())
    }

    async fn post_comment(&self, id: u64, body: &str) -> Result<(), HostingError> {
        self.state.lock().unwrap().comments.entry(id).or_default().push(Comment {
            author: "steward".into(),
            body: body.to_string(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn add_label(&self, id: u64, label: &str) -> Result<(), HostingError> {
        self.state.lock().unwrap().labels.push((id, label.to_string()));
        Ok(())
    }

    async fn checks_passing(&self, _sha: &str) -> Result<Option<bool>, HostingError> {
        Ok(self.state.lock().unwrap().checks)
    }
}

// ---------------------------------------------------------------------------
// Version control
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct BranchState {
    local_head: Option<String>,
    remote_head: Option<String>,
    /// Newest first.
    local_commits: Vec<CommitInfo>,
    remote_only: Vec<CommitInfo>,
    changed_paths: Vec<String>,
}

#[derive(Default)]
struct VcsState {
    branches: HashMap<String, BranchState>,
    worktrees: Vec<Worktree>,
    dirty: bool,
    push_outcomes: VecDeque<PushOutcome>,
    merge_outcomes: VecDeque<MergeOutcome>,
    next_sha: u64,
    calls: Vec<String>,
}

/// A repository where every branch is a list of synthetic commits.
pub struct FakeVcs {
    mainline: String,
    state: Mutex<VcsState>,
}

/// A commit `minutes_ago` minutes in the past.
pub fn commit(sha: &str, minutes_ago: i64) -> CommitInfo {
    CommitInfo {
        sha: sha.to_string(),
        time: Utc::now() - Duration::minutes(minutes_ago),
        parent_count: 1,
        summary: format!("commit {}", sha),
        is_sync_merge: false,
    }
}

/// A pure mainline-sync merge `minutes_ago` minutes in the past.
pub fn sync_merge(sha: &str, minutes_ago: i64) -> CommitInfo {
    CommitInfo {
        parent_count: 2,
        is_sync_merge: true,
        summary: "Merge main".into(),
        ..commit(sha, minutes_ago)
    }
}

impl FakeVcs {
    pub fn new() -> Self {
        Self {
            mainline: "main".into(),
            state: Mutex::new(VcsState::default()),
        }
    }

    /// A branch with pushed local work, checked out at `workspace`.
    pub fn with_branch(self, branch: &str, workspace: &Path, commits: Vec<CommitInfo>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let head = commits.first().map(|c| c.sha.clone());
            state.branches.insert(
                branch.to_string(),
                BranchState {
                    local_head: head.clone(),
                    remote_head: head.clone(),
                    local_commits: commits,
                    ..Default::default()
                },
            );
            state.worktrees.push(Worktree {
                path: workspace.to_path_buf(),
                head: head.unwrap_or_default(),
                branch: Some(branch.to_string()),
            });
        }
        self
    }

    pub fn set_remote_head(&self, branch: &str, sha: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        state.branches.entry(branch.to_string()).or_default().remote_head = sha.map(str::to_string);
    }

    pub fn set_remote_only(&self, branch: &str, commits: Vec<CommitInfo>) {
        let mut state = self.state.lock().unwrap();
        state.branches.entry(branch.to_string()).or_default().remote_only = commits;
    }

    pub fn set_changed_paths(&self, branch: &str, paths: &[&str]) {
        let mut state = self.state.lock().unwrap();
        state.branches.entry(branch.to_string()).or_default().changed_paths =
            paths.iter().map(|p| p.to_string()).collect();
    }

    pub fn push_outcome(&self, outcome: PushOutcome) {
        self.state.lock().unwrap().push_outcomes.push_back(outcome);
    }

    pub fn merge_outcome(&self, outcome: MergeOutcome) {
        self.state.lock().unwrap().merge_outcomes.push_back(outcome);
    }

    /// Leave uncommitted edits in every workspace.
    pub fn make_dirty(&self) {
        self.state.lock().unwrap().dirty = true;
    }

    pub fn local_commit_count(&self, branch: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .branches
            .get(branch)
            .map(|b| b.local_commits.len())
            .unwrap_or(0)
    }

    pub fn head_summary(&self, branch: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .branches
            .get(branch)
            .and_then(|b| b.local_commits.first())
            .map(|c| c.summary.clone())
    }

    /// Names of the mutating calls made so far, e.g. `push steward/issue-1`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    fn branch_at(state: &VcsState, workspace: &Path) -> Result<String, VcsError> {
        state
            .worktrees
            .iter()
            .find(|w| w.path == workspace)
            .and_then(|w| w.branch.clone())
            .ok_or_else(|| VcsError::NotFound(workspace.display().to_string()))
    }

    fn new_commit(state: &mut VcsState, branch: &str, summary: &str, sync: bool) -> String {
        state.next_sha += 1;
        let sha = format!("f{:07}", state.next_sha);
        let entry = state.branches.entry(branch.to_string()).or_default();
        entry.local_commits.insert(
            0,
            CommitInfo {
                sha: sha.clone(),
                time: Utc::now(),
                parent_count: if sync { 2 } else { 1 },
                summary: summary.to_string(),
                is_sync_merge: sync,
            },
        );
        entry.local_head = Some(sha.clone());
        sha
    }
}

impl Default for FakeVcs {
    fn default() -> Self {
        Self::new()
    }
}

impl Vcs for FakeVcs {
    fn mainline(&self) -> &str {
        &self.mainline
    }

    fn fetch(&self) -> Result<(), VcsError> {
        Ok(())
    }

    fn branch_exists(&self, branch: &str) -> Result<bool, VcsError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .branches
            .get(branch)
            .is_some_and(|b| b.local_head.is_some() || !b.local_commits.is_empty()))
    }

    fn local_head(&self, branch: &str) -> Result<Option<String>, VcsError> {
        Ok(self.state.lock().unwrap().branches.get(branch).and_then(|b| b.local_head.clone()))
    }

    fn remote_head(&self, branch: &str) -> Result<Option<String>, VcsError> {
        Ok(self.state.lock().unwrap().branches.get(branch).and_then(|b| b.remote_head.clone()))
    }

    fn local_work_commits(&self, branch: &str) -> Result<Vec<CommitInfo>, VcsError> {
        self.state
            .lock()
            .unwrap()
            .branches
            .get(branch)
            .map(|b| b.local_commits.clone())
            .ok_or_else(|| VcsError::NotFound(format!("refs/heads/{}", branch)))
    }

    fn remote_only_commits(&self, branch: &str) -> Result<Vec<CommitInfo>, VcsError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .branches
            .get(branch)
            .map(|b| b.remote_only.clone())
            .unwrap_or_default())
    }

    fn worktrees(&self) -> Result<Vec<Worktree>, VcsError> {
        Ok(self.state.lock().unwrap().worktrees.clone())
    }

    fn create_workspace(&self, branch: &str, path: &Path) -> Result<(), VcsError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("create_workspace {}", branch));
        let entry = state.branches.entry(branch.to_string()).or_default();
        if entry.local_head.is_none() {
            entry.local_head = Some("base".into());
        }
        state.worktrees.push(Worktree {
            path: path.to_path_buf(),
            head: "base".into(),
            branch: Some(branch.to_string()),
        });
        Ok(())
    }

    fn remove_workspace(&self, path: &Path) -> Result<(), VcsError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("remove_workspace {}", path.display()));
        state.worktrees.retain(|w| w.path != path);
        Ok(())
    }

    fn delete_branch(&self, branch: &str, remote: bool) -> Result<(), VcsError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("delete_branch {} remote={}", branch, remote));
        state.branches.remove(branch);
        Ok(())
    }

    fn has_uncommitted_changes(&self, _workspace: &Path) -> Result<bool, VcsError> {
        Ok(self.state.lock().unwrap().dirty)
    }

    fn commit_all(&self, workspace: &Path, message: &str) -> Result<Option<String>, VcsError> {
        let mut state = self.state.lock().unwrap();
        if !state.dirty {
            return Ok(None);
        }
        state.dirty = false;
        let branch = Self::branch_at(&state, workspace)?;
        state.calls.push(format!("commit {}", branch));
        Ok(Some(Self::new_commit(&mut state, &branch, message, false)))
    }

    fn push(&self, _workspace: &Path, branch: &str) -> Result<PushOutcome, VcsError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("push {}", branch));
        let outcome = state.push_outcomes.pop_front().unwrap_or(PushOutcome::Pushed);
        if outcome == PushOutcome::Pushed {
            let entry = state.branches.entry(branch.to_string()).or_default();
            entry.remote_head = entry.local_head.clone();
        }
        Ok(outcome)
    }

    fn merge_ref(&self, workspace: &Path, refname: &str) -> Result<MergeOutcome, VcsError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("merge {}", refname));
        let outcome = state.merge_outcomes.pop_front().unwrap_or(MergeOutcome::Merged);
        if outcome != MergeOutcome::Merged {
            return Ok(outcome);
        }
        let branch = Self::branch_at(&state, workspace)?;
        let from_mainline = refname.ends_with(&self.mainline);
        if !from_mainline {
            let entry = state.branches.entry(branch.clone()).or_default();
            let mut pulled = std::mem::take(&mut entry.remote_only);
            pulled.append(&mut entry.local_commits);
            entry.local_commits = pulled;
        }
        Self::new_commit(&mut state, &branch, &format!("Merge {}", refname), from_mainline);
        Ok(outcome)
    }

    fn diff_against_mainline(&self, _workspace: &Path) -> Result<String, VcsError> {
        Ok("+fn retry() {}\n".into())
    }

    fn changed_paths(&self, branch: &str) -> Result<Vec<String>, VcsError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .branches
            .get(branch)
            .map(|b| b.changed_paths.clone())
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Operator and notifications
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct ScriptedOperator {
    confirms: Mutex<VecDeque<bool>>,
    choices: Mutex<VecDeque<usize>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedOperator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn confirming(self, answers: Vec<bool>) -> Self {
        *self.confirms.lock().unwrap() = answers.into();
        self
    }

    pub fn choosing(self, answers: Vec<usize>) -> Self {
        *self.choices.lock().unwrap() = answers.into();
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl Operator for ScriptedOperator {
    fn confirm(&self, prompt: &str, default: bool) -> anyhow::Result<bool> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.confirms.lock().unwrap().pop_front().unwrap_or(default))
    }

    fn choose(&self, prompt: &str, _options: &[&str], default: usize) -> anyhow::Result<usize> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(self.choices.lock().unwrap().pop_front().unwrap_or(default))
    }
}

#[derive(Default)]
pub struct RecordingChannel {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingChannel {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotifyChannel for RecordingChannel {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, notification: &Notification) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Workspace path used by fakes; never touched on disk.
pub fn workspace(name: &str) -> PathBuf {
    PathBuf::from("/fake/workspaces").join(name)
}

/// An open change request for `branch` linked to `work_item_id`.
pub fn open_change_request(id: u64, work_item_id: u64, branch: &str, head: &str) -> ChangeRequest {
    ChangeRequest {
        id,
        title: format!("Work item {}", work_item_id),
        body: crate::hosting::work_item_marker(work_item_id),
        branch: branch.to_string(),
        base: "main".into(),
        head_sha: head.to_string(),
        state: ChangeState::Open,
        draft: false,
        mergeable: Some(true),
    }
}
