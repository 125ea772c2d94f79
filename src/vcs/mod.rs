//! Version-control adapter.
//!
//! Reads (heads, logs, diffs) and local commits go through `git2`; operations
//! that touch remotes or worktrees shell out to `git`, the same way the user
//! would.

pub mod git;

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::errors::VcsError;

pub use git::GitRepo;

pub const REMOTE: &str = "origin";

/// One commit on a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub sha: String,
    pub time: DateTime<Utc>,
    pub parent_count: usize,
    pub summary: String,
    /// A merge that only brings mainline in: second parent is on mainline and
    /// every path it changes relative to the first parent also changed on
    /// mainline.
    pub is_sync_merge: bool,
}

impl CommitInfo {
    pub fn is_merge(&self) -> bool {
        self.parent_count > 1
    }
}

/// Latest commit time among `commits`, ignoring sync merges.
pub fn latest_work_time(commits: &[CommitInfo]) -> Option<DateTime<Utc>> {
    commits
        .iter()
        .filter(|c| !c.is_sync_merge)
        .map(|c| c.time)
        .max()
}

/// An entry of `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Worktree {
    pub path: PathBuf,
    pub head: String,
    pub branch: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Pushed,
    /// The remote has commits the local branch lacks.
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged,
    UpToDate,
    /// The merge was aborted; the branch is as it was.
    Conflict { paths: Vec<String> },
}

/// Branch naming shared by workspace creation and change-request lookup.
pub fn branch_name_for(work_item_id: u64, title: &str) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .take(6)
        .collect::<Vec<_>>()
        .join("-");
    if slug.is_empty() {
        format!("steward/issue-{}", work_item_id)
    } else {
        format!("steward/issue-{}-{}", work_item_id, slug)
    }
}

/// Whether a branch name refers to the given work item.
pub fn branch_mentions_item(branch: &str, work_item_id: u64) -> bool {
    let id = work_item_id.to_string();
    branch.split('/').any(|segment| {
        segment
            .strip_prefix("issue-")
            .unwrap_or(segment)
            .split('-')
            .next()
            .is_some_and(|first| first == id)
    })
}

pub trait Vcs: Send + Sync {
    fn mainline(&self) -> &str;

    /// Update remote-tracking refs.
    fn fetch(&self) -> Result<(), VcsError>;

    fn branch_exists(&self, branch: &str) -> Result<bool, VcsError>;

    fn local_head(&self, branch: &str) -> Result<Option<String>, VcsError>;

    /// Head of the remote-tracking ref as of the last fetch.
    fn remote_head(&self, branch: &str) -> Result<Option<String>, VcsError>;

    /// Commits on the local branch that are not on mainline, newest first.
    fn local_work_commits(&self, branch: &str) -> Result<Vec<CommitInfo>, VcsError>;

    /// Commits on the remote branch that the local branch lacks.
    fn remote_only_commits(&self, branch: &str) -> Result<Vec<CommitInfo>, VcsError>;

    fn worktrees(&self) -> Result<Vec<Worktree>, VcsError>;

    /// Create a worktree for `branch`, creating the branch from mainline if needed.
    fn create_workspace(&self, branch: &str, path: &Path) -> Result<(), VcsError>;

    fn remove_workspace(&self, path: &Path) -> Result<(), VcsError>;

    /// Delete the local branch and, when `remote` is set, the remote one.
    fn delete_branch(&self, branch: &str, remote: bool) -> Result<(), VcsError>;

    fn has_uncommitted_changes(&self, workspace: &Path) -> Result<bool, VcsError>;

    /// Commit everything in the workspace. `None` when there was nothing to commit.
    fn commit_all(&self, workspace: &Path, message: &str) -> Result<Option<String>, VcsError>;

    /// Push without force.
    fn push(&self, workspace: &Path, branch: &str) -> Result<PushOutcome, VcsError>;

    /// Merge a ref into the workspace's branch, aborting on conflict.
    fn merge_ref(&self, workspace: &Path, refname: &str) -> Result<MergeOutcome, VcsError>;

    /// Unified diff of the workspace branch against mainline.
    fn diff_against_mainline(&self, workspace: &Path) -> Result<String, VcsError>;

    /// Paths touched by the branch relative to mainline.
    fn changed_paths(&self, branch: &str) -> Result<Vec<String>, VcsError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn branch_names_are_slugged() {
        assert_eq!(
            branch_name_for(42, "Fix: crash on empty INPUT!"),
            "steward/issue-42-fix-crash-on-empty-input"
        );
        assert_eq!(branch_name_for(7, "???"), "steward/issue-7");
    }

    #[test]
    fn branch_mentions_item_matches_common_shapes() {
        assert!(branch_mentions_item("steward/issue-42-fix-crash", 42));
        assert!(branch_mentions_item("issue-42", 42));
        assert!(branch_mentions_item("42-fix-crash", 42));
        assert!(branch_mentions_item("feature/42-thing", 42));
        assert!(!branch_mentions_item("steward/issue-420-other", 42));
        assert!(!branch_mentions_item("fix-42", 42));
    }

    #[test]
    fn latest_work_time_skips_sync_merges() {
        let at = |s: i64| Utc.timestamp_opt(s, 0).unwrap();
        let commits = vec![
            CommitInfo {
                sha: "m".into(),
                time: at(300),
                parent_count: 2,
                summary: "Merge main".into(),
                is_sync_merge: true,
            },
            CommitInfo {
                sha: "w".into(),
                time: at(200),
                parent_count: 1,
                summary: "work".into(),
                is_sync_merge: false,
            },
        ];
        assert_eq!(latest_work_time(&commits), Some(at(200)));
        assert_eq!(latest_work_time(&commits[..1]), None);
    }
}
