//! Review artifacts derived from a change request's comment stream.
//!
//! Comments written by the workflow carry hidden HTML markers so they can be
//! found again without any local bookkeeping:
//!
//! | Marker                          | Kind                        |
//! |---------------------------------|-----------------------------|
//! | `<!-- steward:review -->`       | structured review           |
//! | `<!-- steward:assessment -->`   | classification summary      |
//! | `<!-- steward:followup ... -->` | deferred items are tracked  |
//! | `<!-- steward:review-request sha=... -->` | review requested for a head |
//!
//! This module also owns the currency rule: a review is current iff it was
//! created after the latest local-work commit and the pushed head matches the
//! local head.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use crate::model::{ClassificationItem, ClassificationState, Comment, Severity};

pub const REVIEW_MARKER: &str = "<!-- steward:review -->";
pub const ASSESSMENT_MARKER: &str = "<!-- steward:assessment -->";
pub const FOLLOWUP_MARKER_PREFIX: &str = "<!-- steward:followup";
pub const REVIEW_REQUEST_MARKER_PREFIX: &str = "<!-- steward:review-request";

static SUMMARY_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[\s>*|_-]*\**(critical|high|medium|low)\**\s*[:|=]\s*\**\s*(\d+)").unwrap()
});

static FINDING_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*(?:[-*]|\d+\.|#{1,6})\s*\**\[?(critical|high|medium|low)\]?\**\s*[:\-]?\s*(.+?)\s*$")
        .unwrap()
});

static REQUEST_SHA_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"steward:review-request sha=([0-9a-fA-F]+)").unwrap());

/// Kind of a workflow-relevant comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArtifactKind {
    Review,
    Assessment,
    FollowupMarker,
}

/// A structured comment attached to a change request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewArtifact {
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub kind: ArtifactKind,
}

impl ReviewArtifact {
    /// Recognize a workflow artifact in a raw comment, if it is one.
    pub fn from_comment(comment: &Comment) -> Option<Self> {
        let kind = if comment.body.contains(REVIEW_MARKER) {
            ArtifactKind::Review
        } else if comment.body.contains(ASSESSMENT_MARKER) {
            ArtifactKind::Assessment
        } else if comment.body.contains(FOLLOWUP_MARKER_PREFIX) {
            ArtifactKind::FollowupMarker
        } else {
            return None;
        };
        Some(Self {
            author: comment.author.clone(),
            body: comment.body.clone(),
            created_at: comment.created_at,
            kind,
        })
    }

    /// The severity-count summary of this review, if one is present.
    pub fn severity_summary(&self) -> Option<SeveritySummary> {
        parse_severity_summary(&self.body)
    }

    /// True only for an all-zero summary with no findings listed in the body.
    ///
    /// A summary may omit severities, so a listed finding always wins over
    /// the counts.
    pub fn reports_no_findings(&self) -> bool {
        self.severity_summary().is_some_and(|s| s.is_all_zero()) && parse_findings(&self.body).is_empty()
    }

    /// The review body without workflow markers, as fed to classification.
    pub fn review_text(&self) -> String {
        self.body.replace(REVIEW_MARKER, "").trim().to_string()
    }
}

/// Extract all workflow artifacts from a comment stream.
pub fn artifacts_from_comments(comments: &[Comment]) -> Vec<ReviewArtifact> {
    comments
        .iter()
        .filter_map(ReviewArtifact::from_comment)
        .collect()
}

/// The newest artifact of a kind, by timestamp rather than arrival order.
pub fn latest_of_kind(artifacts: &[ReviewArtifact], kind: ArtifactKind) -> Option<&ReviewArtifact> {
    artifacts
        .iter()
        .filter(|a| a.kind == kind)
        .max_by_key(|a| a.created_at)
}

/// Counts of findings per severity as reported in a review header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeveritySummary {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

impl SeveritySummary {
    pub fn is_all_zero(&self) -> bool {
        self.critical == 0 && self.high == 0 && self.medium == 0 && self.low == 0
    }

    pub fn total(&self) -> u32 {
        self.critical
            .saturating_add(self.high)
            .saturating_add(self.medium)
            .saturating_add(self.low)
    }
}

/// Parse lines like `Critical: 0`, `**High**: 2`, or `| Medium | 1 |`.
///
/// Returns `None` unless at least one severity line is present, so a review
/// without a summary is never mistaken for an all-zero one.
pub fn parse_severity_summary(body: &str) -> Option<SeveritySummary> {
    let mut summary = SeveritySummary::default();
    let mut seen = false;
    for cap in SUMMARY_REGEX.captures_iter(body) {
        let (Some(label), Some(count)) = (cap.get(1), cap.get(2)) else {
            continue;
        };
        let Ok(count) = count.as_str().parse::<u32>() else {
            continue;
        };
        seen = true;
        match Severity::parse(label.as_str()) {
            Some(Severity::Critical) => summary.critical = count,
            Some(Severity::High) => summary.high = count,
            Some(Severity::Medium) => summary.medium = count,
            Some(Severity::Low) => summary.low = count,
            None => {}
        }
    }
    seen.then_some(summary)
}

/// Findings listed in a review body, e.g. `- [HIGH] Missing bounds check`.
///
/// Used by the degraded classifier: every finding starts out NOW and the
/// caller decides which severities to keep.
pub fn parse_findings(body: &str) -> Vec<ClassificationItem> {
    FINDING_REGEX
        .captures_iter(body)
        .filter_map(|cap| {
            let severity = Severity::parse(cap.get(1)?.as_str())?;
            let title = cap.get(2)?.as_str().trim_matches('*').trim();
            // Summary lines ("Critical: 0") are not findings.
            if title.chars().all(|c| c.is_ascii_digit() || c == '|' || c.is_whitespace()) {
                return None;
            }
            let category = guess_category(title);
            Some(
                ClassificationItem::new(title, ClassificationState::ActionableNow, severity)
                    .with_category(category),
            )
        })
        .collect()
}

fn guess_category(title: &str) -> &'static str {
    let lower = title.to_lowercase();
    const SECURITY: &[&str] = &[
        "security", "injection", "xss", "csrf", "secret", "credential", "auth", "token",
    ];
    if SECURITY.iter().any(|k| lower.contains(k)) {
        "security"
    } else if lower.contains("test") {
        "testing"
    } else if lower.contains("perf") || lower.contains("slow") {
        "performance"
    } else {
        "general"
    }
}

/// Render the hidden marker for a review request on a given head.
pub fn review_request_marker(head_sha: &str) -> String {
    format!("{} sha={} -->", REVIEW_REQUEST_MARKER_PREFIX, head_sha)
}

/// Heads for which a review request has already been posted.
pub fn requested_review_heads(comments: &[Comment]) -> Vec<String> {
    comments
        .iter()
        .filter_map(|c| REQUEST_SHA_REGEX.captures(&c.body))
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Render the hidden marker tying a follow-up issue to a work item.
pub fn followup_marker(work_item_id: u64) -> String {
    format!("{} work-item:{} -->", FOLLOWUP_MARKER_PREFIX, work_item_id)
}

/// Render the hidden marker of a manual-intervention issue.
pub fn escalation_marker(work_item_id: u64) -> String {
    format!("<!-- steward:escalation work-item:{} -->", work_item_id)
}

/// Currency rule for a review timestamp.
///
/// A review is current iff the local and remote heads agree and its timestamp
/// strictly exceeds the latest local-work commit time (sync merges already
/// excluded by the caller). Unknown inputs yield "not current".
pub fn is_review_current(
    review_time: DateTime<Utc>,
    latest_local_work: Option<DateTime<Utc>>,
    local_head: Option<&str>,
    remote_head: Option<&str>,
) -> bool {
    match (local_head, remote_head) {
        (Some(local), Some(remote)) if local != remote => return false,
        (Some(_), Some(_)) => {}
        _ => return false,
    }
    match latest_local_work {
        Some(work_time) => review_time > work_time,
        None => false,
    }
}
