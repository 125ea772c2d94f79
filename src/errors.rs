//! Typed error hierarchy for the workflow engine.
//!
//! One enum per external boundary plus a top-level enum for the orchestrator:
//! - `VcsError`: local git queries and git subprocess calls
//! - `HostingError`: code-hosting platform API calls
//! - `AssistantError`: AI assistant sessions
//! - `ClassifyError`: structured classification output
//! - `WorkflowError`: phase orchestration failures

use thiserror::Error;

/// Errors from the version-control adapter.
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("`git {command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("failed to run git: {0}")]
    Io(#[from] std::io::Error),

    #[error("reference not found: {0}")]
    NotFound(String),
}

/// Errors from the code-hosting platform.
#[derive(Debug, Error)]
pub enum HostingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("hosting API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("{what} not found")]
    NotFound { what: String },

    #[error("hosting credentials rejected or expired")]
    Unauthorized,

    #[error("unexpected response: {0}")]
    Decode(String),
}

impl HostingError {
    /// Whether a retry of the same idempotent request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

/// Errors from an AI assistant session.
#[derive(Debug, Error)]
pub enum AssistantError {
    #[error("failed to spawn assistant process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("assistant I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("assistant exited with non-zero code {code}")]
    NonZeroExit { code: i32 },

    #[error("assistant session timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("assistant returned an empty response")]
    EmptyResponse,
}

/// Errors from parsing a classification response.
#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("response has no trailing ```json block")]
    MissingBlock,

    #[error("classification block does not match schema: {0}")]
    Schema(#[from] serde_json::Error),

    #[error(transparent)]
    Assistant(#[from] AssistantError),
}

/// Errors surfaced by the phase orchestrator.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("work item #{id} not found")]
    WorkItemNotFound { id: u64 },

    #[error("work item #{id} is closed")]
    WorkItemClosed { id: u64 },

    #[error("change request #{id} is already merged")]
    AlreadyMerged { id: u64 },

    #[error("no change request for work item #{id}")]
    NoChangeRequest { id: u64 },

    #[error("failed to persist snapshot at {path}: {source}")]
    SnapshotWrite {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    Hosting(#[from] HostingError),

    #[error(transparent)]
    Assistant(#[from] AssistantError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
