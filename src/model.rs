//! Core data model shared by every component.
//!
//! ## Types
//!
//! - [`WorkItem`]: an issue on the hosting platform
//! - [`ChangeRequest`]: a pull request proposing a branch for integration
//! - [`Severity`], [`ClassificationState`], [`ClassificationItem`]: review findings
//! - [`ClassificationResult`]: the ordered three-state categorization of a review
//! - [`BlockerType`], [`BlockerDecision`]: pre-merge gate bookkeeping

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Open/closed state of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ItemState {
    Open,
    Closed,
}

/// A unit of work tracked as an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub state: ItemState,
    #[serde(default)]
    pub labels: Vec<String>,
}

impl WorkItem {
    pub fn new(id: u64, title: &str) -> Self {
        Self {
            id,
            title: title.to_string(),
            description: String::new(),
            state: ItemState::Open,
            labels: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.state == ItemState::Open
    }
}

/// Lifecycle state of a change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeState {
    Open,
    Closed,
    Merged,
}

/// A pull request proposing a branch's changes for integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    pub branch: String,
    pub base: String,
    pub head_sha: String,
    pub state: ChangeState,
    #[serde(default)]
    pub draft: bool,
    /// `None` while the platform is still computing mergeability.
    #[serde(default)]
    pub mergeable: Option<bool>,
}

impl ChangeRequest {
    pub fn is_open(&self) -> bool {
        self.state == ChangeState::Open
    }
}

/// Fields needed to open a new change request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChangeRequest {
    pub title: String,
    pub body: String,
    pub branch: String,
    pub base: String,
    pub draft: bool,
}

/// A comment on a change request or work item, as returned by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// Severity of a review finding, ordered so that `Critical` is the greatest.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Parse a severity label case-insensitively, accepting common synonyms.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_lowercase().as_str() {
            "critical" | "blocker" => Some(Self::Critical),
            "high" | "major" => Some(Self::High),
            "medium" | "moderate" => Some(Self::Medium),
            "low" | "minor" | "nit" => Some(Self::Low),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
            Self::Low => "LOW",
        };
        write!(f, "{}", s)
    }
}

/// Three-state triage bucket for a finding.
///
/// Ordered from most to least conservative: ties resolve toward `ActionableNow`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassificationState {
    ActionableNow,
    ActionableLater,
    Dismissed,
}

impl fmt::Display for ClassificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ActionableNow => "NOW",
            Self::ActionableLater => "LATER",
            Self::Dismissed => "DISMISSED",
        };
        write!(f, "{}", s)
    }
}

/// One categorized review finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationItem {
    pub title: String,
    pub state: ClassificationState,
    pub severity: Severity,
    pub category: String,
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_effort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defer_reason: Option<String>,
}

impl ClassificationItem {
    pub fn new(title: &str, state: ClassificationState, severity: Severity) -> Self {
        Self {
            title: title.to_string(),
            state,
            severity,
            category: "general".to_string(),
            reasoning: String::new(),
            fix_effort: None,
            defer_reason: None,
        }
    }

    pub fn with_category(mut self, category: &str) -> Self {
        self.category = category.to_lowercase();
        self
    }

    pub fn with_reasoning(mut self, reasoning: &str) -> Self {
        self.reasoning = reasoning.to_string();
        self
    }

    pub fn is_security(&self) -> bool {
        self.category.contains("security")
    }

    /// Render as a markdown task-list line for issues and fix prompts.
    pub fn to_markdown_line(&self) -> String {
        let mut line = format!(
            "- [ ] **[{}]** {} _({}, {})_",
            self.severity, self.title, self.category, self.state
        );
        if let Some(reason) = self.defer_reason.as_deref().filter(|r| !r.is_empty()) {
            line.push_str(&format!(" deferred: {}", reason));
        }
        line
    }
}

/// Where a classification came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    #[default]
    Assistant,
    Cache,
    Heuristic,
}

/// Per-state counts of a classification.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub now: usize,
    pub later: usize,
    pub dismissed: usize,
}

/// Ordered classification of a review's findings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub items: Vec<ClassificationItem>,
    pub model_id: String,
    #[serde(default)]
    pub source: ClassificationSource,
}

impl ClassificationResult {
    pub fn new(items: Vec<ClassificationItem>, model_id: &str, source: ClassificationSource) -> Self {
        Self {
            items,
            model_id: model_id.to_string(),
            source,
        }
    }

    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for item in &self.items {
            match item.state {
                ClassificationState::ActionableNow => counts.now += 1,
                ClassificationState::ActionableLater => counts.later += 1,
                ClassificationState::Dismissed => counts.dismissed += 1,
            }
        }
        counts
    }

    pub fn in_state(&self, state: ClassificationState) -> Vec<&ClassificationItem> {
        self.items.iter().filter(|i| i.state == state).collect()
    }

    /// NOW items followed by LATER items, in original order within each bucket.
    pub fn actionable(&self) -> Vec<ClassificationItem> {
        self.in_state(ClassificationState::ActionableNow)
            .into_iter()
            .chain(self.in_state(ClassificationState::ActionableLater))
            .cloned()
            .collect()
    }

    pub fn has_critical_now(&self) -> bool {
        self.items
            .iter()
            .any(|i| i.state == ClassificationState::ActionableNow && i.severity == Severity::Critical)
    }

    /// No NOW items remain.
    pub fn is_clean(&self) -> bool {
        self.counts().now == 0
    }

    pub fn is_fallback(&self) -> bool {
        self.source == ClassificationSource::Heuristic
    }
}

/// Kinds of hard pre-merge gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockerType {
    CriticalFinding,
    FailingChecks,
    ExpiredCredentials,
    SessionBudget,
    SensitivePath,
}

impl fmt::Display for BlockerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CriticalFinding => "critical_finding",
            Self::FailingChecks => "failing_checks",
            Self::ExpiredCredentials => "expired_credentials",
            Self::SessionBudget => "session_budget",
            Self::SensitivePath => "sensitive_path",
        };
        write!(f, "{}", s)
    }
}

/// How urgently a blocker needs a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Normal,
    High,
}

/// An approval decision for one blocker on one work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockerDecision {
    pub blocker_type: BlockerType,
    pub urgency: Urgency,
    pub approved: bool,
    pub work_item_id: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(state: ClassificationState, severity: Severity) -> ClassificationItem {
        ClassificationItem::new("finding", state, severity)
    }

    #[test]
    fn severity_orders_critical_highest() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }

    #[test]
    fn severity_parse_accepts_synonyms() {
        assert_eq!(Severity::parse("Blocker"), Some(Severity::Critical));
        assert_eq!(Severity::parse(" major "), Some(Severity::High));
        assert_eq!(Severity::parse("nit"), Some(Severity::Low));
        assert_eq!(Severity::parse("whatever"), None);
    }

    #[test]
    fn counts_and_actionable_ordering() {
        let result = ClassificationResult::new(
            vec![
                item(ClassificationState::ActionableLater, Severity::Low).with_reasoning("later"),
                item(ClassificationState::ActionableNow, Severity::High).with_reasoning("now"),
                item(ClassificationState::Dismissed, Severity::Low),
            ],
            "model",
            ClassificationSource::Assistant,
        );
        let counts = result.counts();
        assert_eq!((counts.now, counts.later, counts.dismissed), (1, 1, 1));

        let actionable = result.actionable();
        assert_eq!(actionable.len(), 2);
        assert_eq!(actionable[0].reasoning, "now");
        assert_eq!(actionable[1].reasoning, "later");
        assert!(!result.is_clean());
        assert!(!result.has_critical_now());
    }

    #[test]
    fn has_critical_now_ignores_deferred_criticals() {
        let result = ClassificationResult::new(
            vec![item(ClassificationState::ActionableLater, Severity::Critical)],
            "model",
            ClassificationSource::Assistant,
        );
        assert!(!result.has_critical_now());
        assert!(result.is_clean());
    }

    #[test]
    fn classification_item_deserializes_screaming_states() {
        let json = r#"{
            "title": "SQL injection in search",
            "state": "ACTIONABLE_NOW",
            "severity": "CRITICAL",
            "category": "security",
            "reasoning": "user input reaches query"
        }"#;
        let parsed: ClassificationItem = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.state, ClassificationState::ActionableNow);
        assert_eq!(parsed.severity, Severity::Critical);
        assert!(parsed.is_security());
        assert!(parsed.fix_effort.is_none());
    }

    #[test]
    fn markdown_line_includes_severity_and_state() {
        let mut finding = item(ClassificationState::ActionableLater, Severity::Medium);
        finding.defer_reason = Some("needs design".into());
        let line = finding.to_markdown_line();
        assert!(line.starts_with("- [ ] **[MEDIUM]** finding"));
        assert!(line.contains("LATER"));
        assert!(line.contains("needs design"));
    }
}
