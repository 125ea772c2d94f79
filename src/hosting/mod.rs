//! Code-hosting platform adapter.
//!
//! Everything the workflow knows about work items, change requests and
//! reviews comes through [`HostingPlatform`]; nothing is cached locally.

pub mod github;

use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;
use tracing::info;

use crate::errors::HostingError;
use crate::model::{ChangeRequest, Comment, NewChangeRequest, WorkItem};

pub use github::GitHubClient;

/// Labels the workflow applies to issues it creates.
pub const FOLLOWUP_LABEL: &str = "steward:followup";
pub const NEEDS_HUMAN_LABEL: &str = "needs-human";
pub const BLOCKED_LABEL: &str = "steward:blocked";

/// Result of a merge attempt with an expected head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResult {
    Merged { sha: String },
    /// The platform refused (conflicts, required reviews, branch protection).
    NotMergeable { reason: String },
    /// The branch moved since the expected head was observed.
    HeadChanged,
}

#[async_trait]
pub trait HostingPlatform: Send + Sync {
    /// False when the token is missing, expired or revoked.
    async fn credentials_valid(&self) -> Result<bool, HostingError>;

    async fn work_item(&self, id: u64) -> Result<WorkItem, HostingError>;

    async fn close_work_item(&self, id: u64) -> Result<(), HostingError>;

    /// Create an issue and return its number.
    async fn create_issue(&self, title: &str, body: &str, labels: &[&str]) -> Result<u64, HostingError>;

    /// First open issue carrying `label` whose body contains `marker`.
    async fn find_issue_by_marker(&self, label: &str, marker: &str) -> Result<Option<u64>, HostingError>;

    async fn open_change_requests(&self) -> Result<Vec<ChangeRequest>, HostingError>;

    async fn change_request(&self, id: u64) -> Result<ChangeRequest, HostingError>;

    async fn create_change_request(&self, new: &NewChangeRequest) -> Result<ChangeRequest, HostingError>;

    async fn close_change_request(&self, id: u64) -> Result<(), HostingError>;

    /// Squash-merge, refusing if the head is no longer `expected_head`.
    async fn merge_change_request(
        &self,
        id: u64,
        expected_head: &str,
        title: &str,
    ) -> Result<MergeResult, HostingError>;

    /// Comments on an issue or change request, oldest first.
    async fn comments(&self, id: u64) -> Result<Vec<Comment>, HostingError>;

    async fn post_comment(&self, id: u64, body: &str) -> Result<(), HostingError>;

    async fn add_label(&self, id: u64, label: &str) -> Result<(), HostingError>;

    /// `Some(true)` all checks green (or none), `Some(false)` any failed,
    /// `None` still running.
    async fn checks_passing(&self, sha: &str) -> Result<Option<bool>, HostingError>;
}

static LINKAGE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:close[sd]?|fix(?:e[sd])?|resolve[sd]?)\s+#(\d+)\b|<!-- steward:work-item:(\d+) -->")
        .unwrap()
});

/// Hidden marker placed in change-request bodies.
pub fn work_item_marker(work_item_id: u64) -> String {
    format!("<!-- steward:work-item:{} -->", work_item_id)
}

/// Work items a change-request description explicitly links to.
pub fn linked_work_items(body: &str) -> Vec<u64> {
    LINKAGE_REGEX
        .captures_iter(body)
        .filter_map(|cap| cap.get(1).or_else(|| cap.get(2)))
        .filter_map(|m| m.as_str().parse().ok())
        .collect()
}

fn tokens(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(str::to_string)
        .collect()
}

/// Jaccard similarity of normalized title tokens.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    let (ta, tb) = (tokens(a), tokens(b));
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let shared = ta.intersection(&tb).count() as f64;
    let union = ta.union(&tb).count() as f64;
    shared / union
}

/// Reuse the open change request for the branch, or create one.
///
/// Returns the request and whether it was created by this call.
pub async fn ensure_change_request(
    platform: &dyn HostingPlatform,
    new: &NewChangeRequest,
) -> Result<(ChangeRequest, bool), HostingError> {
    let open = platform.open_change_requests().await?;
    if let Some(existing) = open.into_iter().find(|cr| cr.branch == new.branch) {
        info!(id = existing.id, branch = %new.branch, "Reusing open change request");
        return Ok((existing, false));
    }
    let created = platform.create_change_request(new).await?;
    info!(id = created.id, branch = %new.branch, "Opened change request");
    Ok((created, true))
}
