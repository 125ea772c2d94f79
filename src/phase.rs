//! Workflow phases and run modes.
//!
//! Phases are totally ordered: a resumed run may only move forward through
//! this ordering relative to what the live state proves has already happened.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A phase of the issue-to-merge workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// Validate the work item, credentials, branch and workspace.
    PreStart,
    /// Run a development (or fix) session in the workspace.
    Development,
    /// Push the branch, ensure the change request exists, obtain a current review.
    PushReview,
    /// Classify review findings and decide merge / fix / escalate.
    AssessResolve,
    /// Pass the blocker gate and merge.
    Merge,
    /// Close out: cleanup and snapshot removal.
    Completion,
}

impl Phase {
    /// All phases in execution order.
    pub const ALL: [Phase; 6] = [
        Phase::PreStart,
        Phase::Development,
        Phase::PushReview,
        Phase::AssessResolve,
        Phase::Merge,
        Phase::Completion,
    ];

    /// The phase that follows this one on the happy path.
    pub fn next(self) -> Option<Phase> {
        let idx = Self::ALL.iter().position(|p| *p == self)?;
        Self::ALL.get(idx + 1).copied()
    }

    /// Whether this phase ends a run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completion)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::PreStart => "PRE_START",
            Phase::Development => "DEVELOPMENT",
            Phase::PushReview => "PUSH_REVIEW",
            Phase::AssessResolve => "ASSESS_RESOLVE",
            Phase::Merge => "MERGE",
            Phase::Completion => "COMPLETION",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for Phase {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "PRE_START" => Ok(Phase::PreStart),
            "DEVELOPMENT" | "DEVELOP" => Ok(Phase::Development),
            "PUSH_REVIEW" | "PUSH" => Ok(Phase::PushReview),
            "ASSESS_RESOLVE" | "ASSESS" => Ok(Phase::AssessResolve),
            "MERGE" => Ok(Phase::Merge),
            "COMPLETION" => Ok(Phase::Completion),
            _ => anyhow::bail!(
                "Invalid phase '{}'. Valid values: pre_start, development, push_review, assess_resolve, merge, completion",
                s
            ),
        }
    }
}

/// How much the operator is involved in decisions.
///
/// | Mode           | Blockers                         | Interrupt handling          |
/// |----------------|----------------------------------|-----------------------------|
/// | `Supervised`   | Prompt, remember per blocker     | Ask before WIP commit       |
/// | `Unsupervised` | Halt unless bypass is configured | WIP commit + best-effort push |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Supervised,
    #[serde(alias = "auto")]
    Unsupervised,
}

impl Mode {
    pub fn is_auto(self) -> bool {
        matches!(self, Mode::Unsupervised)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Supervised => write!(f, "supervised"),
            Mode::Unsupervised => write!(f, "unsupervised"),
        }
    }
}

impl std::str::FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "supervised" | "interactive" => Ok(Mode::Supervised),
            "unsupervised" | "auto" => Ok(Mode::Unsupervised),
            _ => anyhow::bail!("Invalid mode '{}'. Valid values: supervised, auto", s),
        }
    }
}
