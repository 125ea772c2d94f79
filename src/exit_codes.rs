//! Stable process exit codes for steward commands.

/// Success, or the assessment says the change is ready to merge.
pub const OK: i32 = 0;
/// Manual intervention is required (escalation, or an unrecoverable error).
pub const MANUAL_INTERVENTION: i32 = 1;
/// `assess` found items to fix; the list is in `.steward/fix-items-<id>.json`.
pub const FIX_AND_LOOP: i32 = 2;
/// `assess` found the review stale; push and re-review first.
pub const REVIEW_STALE: i32 = 3;
/// A pre-merge blocker halted the run.
pub const BLOCKED: i32 = 4;
/// The run was interrupted; a snapshot was saved.
pub const INTERRUPTED: i32 = 130;
