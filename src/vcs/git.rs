use chrono::{DateTime, TimeZone, Utc};
use git2::{Commit, DiffOptions, Oid, Repository, Signature, Sort};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, instrument, warn};

use super::{CommitInfo, MergeOutcome, PushOutcome, REMOTE, Vcs, Worktree};
use crate::errors::VcsError;

/// A local clone, opened fresh for each query so worktrees stay consistent.
#[derive(Debug, Clone)]
pub struct GitRepo {
    root: PathBuf,
    mainline: String,
}

impl GitRepo {
    pub fn new(root: &Path, mainline: &str) -> Self {
        Self {
            root: root.to_path_buf(),
            mainline: mainline.to_string(),
        }
    }

    fn open(&self) -> Result<Repository, VcsError> {
        Ok(Repository::open(&self.root)?)
    }

    fn run(&self, dir: &Path, args: &[&str]) -> Result<Output, VcsError> {
        debug!(args = ?args, dir = %dir.display(), "git");
        Ok(Command::new("git").args(args).current_dir(dir).output()?)
    }

    fn run_checked(&self, dir: &Path, args: &[&str]) -> Result<String, VcsError> {
        let out = self.run(dir, args)?;
        if !out.status.success() {
            return Err(VcsError::Command {
                command: args.join(" "),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&out.stdout).to_string())
    }

    fn resolve(repo: &Repository, refname: &str) -> Option<Oid> {
        repo.refname_to_id(refname).ok()
    }

    /// Remote-tracking mainline if fetched, else the local mainline branch.
    fn mainline_oid(&self, repo: &Repository) -> Option<Oid> {
        Self::resolve(repo, &format!("refs/remotes/{}/{}", REMOTE, self.mainline))
            .or_else(|| Self::resolve(repo, &format!("refs/heads/{}", self.mainline)))
    }

    /// Commits reachable from `include` but not from any of `exclude`.
    fn commits_between(
        &self,
        repo: &Repository,
        include: Oid,
        exclude: &[Oid],
    ) -> Result<Vec<CommitInfo>, VcsError> {
        let mainline = self.mainline_oid(repo);
        let mut walk = repo.revwalk()?;
        walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
        walk.push(include)?;
        for oid in exclude {
            walk.hide(*oid)?;
        }
        let mut commits = Vec::new();
        for oid in walk {
            let commit = repo.find_commit(oid?)?;
            let sync = match mainline {
                Some(main) => is_sync_merge(repo, &commit, main)?,
                None => false,
            };
            commits.push(CommitInfo {
                sha: commit.id().to_string(),
                time: commit_time(&commit),
                parent_count: commit.parent_count(),
                summary: commit.summary().unwrap_or_default().to_string(),
                is_sync_merge: sync,
            });
        }
        Ok(commits)
    }
}

fn commit_time(commit: &Commit<'_>) -> DateTime<Utc> {
    Utc.timestamp_opt(commit.time().seconds(), 0)
        .single()
        .unwrap_or_default()
}

fn paths_between(repo: &Repository, old: Oid, new: Oid) -> Result<HashSet<String>, VcsError> {
    let old_tree = repo.find_commit(old)?.tree()?;
    let new_tree = repo.find_commit(new)?.tree()?;
    let mut opts = DiffOptions::new();
    let diff = repo.diff_tree_to_tree(Some(&old_tree), Some(&new_tree), Some(&mut opts))?;
    let mut paths = HashSet::new();
    for delta in diff.deltas() {
        for file in [delta.old_file(), delta.new_file()] {
            if let Some(path) = file.path() {
                paths.insert(path.to_string_lossy().to_string());
            }
        }
    }
    Ok(paths)
}

/// A merge whose second parent is on mainline and whose first-parent diff
/// only touches paths mainline itself changed since the merge base.
fn is_sync_merge(repo: &Repository, commit: &Commit<'_>, mainline: Oid) -> Result<bool, VcsError> {
    if commit.parent_count() != 2 {
        return Ok(false);
    }
    let first = commit.parent_id(0)?;
    let second = commit.parent_id(1)?;
    let on_mainline = second == mainline || repo.graph_descendant_of(mainline, second)?;
    if !on_mainline {
        return Ok(false);
    }
    let base = repo.merge_base(first, second)?;
    let merged_paths = paths_between(repo, first, commit.id())?;
    let mainline_paths = paths_between(repo, base, second)?;
    Ok(merged_paths.is_subset(&mainline_paths))
}

/// Parse `git worktree list --porcelain`.
pub fn parse_worktrees(output: &str) -> Vec<Worktree> {
    let mut trees = Vec::new();
    for block in output.split("\n\n") {
        let mut path = None;
        let mut head = String::new();
        let mut branch = None;
        for line in block.lines() {
            if let Some(p) = line.strip_prefix("worktree ") {
                path = Some(PathBuf::from(p));
            } else if let Some(h) = line.strip_prefix("HEAD ") {
                head = h.to_string();
            } else if let Some(b) = line.strip_prefix("branch ") {
                branch = Some(b.trim_start_matches("refs/heads/").to_string());
            }
        }
        if let Some(path) = path {
            trees.push(Worktree { path, head, branch });
        }
    }
    trees
}

fn is_rejection(stderr: &str) -> bool {
    ["[rejected]", "non-fast-forward", "fetch first"]
        .iter()
        .any(|needle| stderr.contains(needle))
}

impl Vcs for GitRepo {
    fn mainline(&self) -> &str {
        &self.mainline
    }

    #[instrument(skip(self))]
    fn fetch(&self) -> Result<(), VcsError> {
        self.run_checked(&self.root, &["fetch", REMOTE, "--prune"])?;
        Ok(())
    }

    fn branch_exists(&self, branch: &str) -> Result<bool, VcsError> {
        let repo = self.open()?;
        Ok(Self::resolve(&repo, &format!("refs/heads/{}", branch)).is_some())
    }

    fn local_head(&self, branch: &str) -> Result<Option<String>, VcsError> {
        let repo = self.open()?;
        Ok(Self::resolve(&repo, &format!("refs/heads/{}", branch)).map(|o| o.to_string()))
    }

    fn remote_head(&self, branch: &str) -> Result<Option<String>, VcsError> {
        let repo = self.open()?;
        Ok(Self::resolve(&repo, &format!("refs/remotes/{}/{}", REMOTE, branch)).map(|o| o.to_string()))
    }

    #[instrument(skip(self))]
    fn local_work_commits(&self, branch: &str) -> Result<Vec<CommitInfo>, VcsError> {
        let repo = self.open()?;
        let head = Self::resolve(&repo, &format!("refs/heads/{}", branch))
            .ok_or_else(|| VcsError::NotFound(format!("refs/heads/{}", branch)))?;
        let exclude: Vec<Oid> = self.mainline_oid(&repo).into_iter().collect();
        self.commits_between(&repo, head, &exclude)
    }

    #[instrument(skip(self))]
    fn remote_only_commits(&self, branch: &str) -> Result<Vec<CommitInfo>, VcsError> {
        let repo = self.open()?;
        let Some(remote) = Self::resolve(&repo, &format!("refs/remotes/{}/{}", REMOTE, branch)) else {
            return Ok(Vec::new());
        };
        let exclude: Vec<Oid> = Self::resolve(&repo, &format!("refs/heads/{}", branch))
            .into_iter()
            .collect();
        self.commits_between(&repo, remote, &exclude)
    }

    fn worktrees(&self) -> Result<Vec<Worktree>, VcsError> {
        let out = self.run_checked(&self.root, &["worktree", "list", "--porcelain"])?;
        Ok(parse_worktrees(&out))
    }

    #[instrument(skip(self))]
    fn create_workspace(&self, branch: &str, path: &Path) -> Result<(), VcsError> {
        let path_str = path.to_string_lossy().to_string();
        if self.branch_exists(branch)? {
            self.run_checked(&self.root, &["worktree", "add", &path_str, branch])?;
            return Ok(());
        }
        let repo = self.open()?;
        let remote_branch = format!("{}/{}", REMOTE, branch);
        let start = if Self::resolve(&repo, &format!("refs/remotes/{}", remote_branch)).is_some() {
            remote_branch
        } else if Self::resolve(&repo, &format!("refs/remotes/{}/{}", REMOTE, self.mainline)).is_some() {
            format!("{}/{}", REMOTE, self.mainline)
        } else {
            self.mainline.clone()
        };
        self.run_checked(&self.root, &["worktree", "add", "-b", branch, &path_str, &start])?;
        Ok(())
    }

    fn remove_workspace(&self, path: &Path) -> Result<(), VcsError> {
        let path_str = path.to_string_lossy().to_string();
        self.run_checked(&self.root, &["worktree", "remove", "--force", &path_str])?;
        Ok(())
    }

    fn delete_branch(&self, branch: &str, remote: bool) -> Result<(), VcsError> {
        self.run_checked(&self.root, &["branch", "-D", branch])?;
        if remote {
            let out = self.run(&self.root, &["push", REMOTE, "--delete", branch])?;
            if !out.status.success() {
                warn!(branch, stderr = %String::from_utf8_lossy(&out.stderr).trim(), "remote branch deletion failed");
            }
        }
        Ok(())
    }

    fn has_uncommitted_changes(&self, workspace: &Path) -> Result<bool, VcsError> {
        let repo = Repository::open(workspace)?;
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        Ok(!repo.statuses(Some(&mut opts))?.is_empty())
    }

    #[instrument(skip(self))]
    fn commit_all(&self, workspace: &Path, message: &str) -> Result<Option<String>, VcsError> {
        let repo = Repository::open(workspace)?;
        let mut index = repo.index()?;
        index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
        index.update_all(["*"].iter(), None)?;
        index.write()?;
        let tree_id = index.write_tree()?;

        let parent = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        if let Some(ref parent) = parent
            && parent.tree_id() == tree_id
        {
            return Ok(None);
        }

        let tree = repo.find_tree(tree_id)?;
        let sig = repo
            .signature()
            .or_else(|_| Signature::now("steward", "steward@localhost"))?;
        let parents: Vec<&Commit<'_>> = parent.iter().collect();
        let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        debug!(sha = %oid, "committed workspace changes");
        Ok(Some(oid.to_string()))
    }

    #[instrument(skip(self))]
    fn push(&self, workspace: &Path, branch: &str) -> Result<PushOutcome, VcsError> {
        let refspec = format!("HEAD:refs/heads/{}", branch);
        let out = self.run(workspace, &["push", "-u", REMOTE, &refspec])?;
        if out.status.success() {
            return Ok(PushOutcome::Pushed);
        }
        let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
        if is_rejection(&stderr) {
            return Ok(PushOutcome::Rejected { reason: stderr });
        }
        Err(VcsError::Command {
            command: format!("push -u {} {}", REMOTE, refspec),
            stderr,
        })
    }

    #[instrument(skip(self))]
    fn merge_ref(&self, workspace: &Path, refname: &str) -> Result<MergeOutcome, VcsError> {
        let out = self.run(workspace, &["merge", "--no-edit", refname])?;
        if out.status.success() {
            let stdout = String::from_utf8_lossy(&out.stdout);
            if stdout.contains("Already up to date") {
                return Ok(MergeOutcome::UpToDate);
            }
            return Ok(MergeOutcome::Merged);
        }
        let conflicted = self
            .run_checked(workspace, &["diff", "--name-only", "--diff-filter=U"])
            .unwrap_or_default();
        let paths: Vec<String> = conflicted.lines().map(str::to_string).collect();
        if paths.is_empty() {
            return Err(VcsError::Command {
                command: format!("merge --no-edit {}", refname),
                stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            });
        }
        if let Err(e) = self.run_checked(workspace, &["merge", "--abort"]) {
            warn!(error = %e, "git merge --abort failed");
        }
        Ok(MergeOutcome::Conflict { paths })
    }

    fn diff_against_mainline(&self, workspace: &Path) -> Result<String, VcsError> {
        let repo = self.open()?;
        let base = if Self::resolve(&repo, &format!("refs/remotes/{}/{}", REMOTE, self.mainline)).is_some() {
            format!("{}/{}", REMOTE, self.mainline)
        } else {
            self.mainline.clone()
        };
        self.run_checked(workspace, &["diff", &format!("{}...HEAD", base)])
    }

    fn changed_paths(&self, branch: &str) -> Result<Vec<String>, VcsError> {
        let repo = self.open()?;
        let head = Self::resolve(&repo, &format!("refs/heads/{}", branch))
            .ok_or_else(|| VcsError::NotFound(format!("refs/heads/{}", branch)))?;
        let Some(main) = self.mainline_oid(&repo) else {
            return Ok(Vec::new());
        };
        let base = repo.merge_base(head, main)?;
        let mut paths: Vec<String> = paths_between(&repo, base, head)?.into_iter().collect();
        paths.sort();
        Ok(paths)
    }
}
