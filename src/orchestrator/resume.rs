//! Resume-point selection.
//!
//! | Live position                                     | Target         |
//! |---------------------------------------------------|----------------|
//! | no change request, or nothing implemented         | DEVELOPMENT    |
//! | unpushed or uncommitted work, or no current review | PUSH_REVIEW    |
//! | current review, classification missing or not clean | ASSESS_RESOLVE |
//! | clean, but deferred items have no tracking issue  | ASSESS_RESOLVE |
//! | otherwise                                         | MERGE          |
//!
//! A snapshot can only carry counters forward for the same change request,
//! and can move the target later only while the live heads still match it.

use tracing::debug;

use crate::inspector::RemoteState;
use crate::phase::Phase;
use crate::snapshot::WorkflowSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePoint {
    pub phase: Phase,
    pub retry_count: u32,
    pub reroute_count: u32,
}

/// Target implied by live state alone.
pub fn live_target(state: &RemoteState) -> Phase {
    if state.change_request.is_none() || state.has_implementation != Some(true) {
        return Phase::Development;
    }
    if state.has_unpushed_work || state.has_uncommitted_changes || !state.review_current {
        return Phase::PushReview;
    }
    match &state.latest_classification {
        None => Phase::AssessResolve,
        Some(c) if !c.is_clean() => Phase::AssessResolve,
        Some(_) if state.deferred_items_untracked() => Phase::AssessResolve,
        Some(_) => Phase::Merge,
    }
}

fn snapshot_agrees(snapshot: &WorkflowSnapshot, state: &RemoteState) -> bool {
    let same_cr = snapshot.pr_id.is_some() && snapshot.pr_id == state.change_request.as_ref().map(|c| c.id);
    let same_head = snapshot.vcs_status.local_head.is_some() && snapshot.vcs_status.local_head == state.local_head;
    same_cr && same_head && state.review_current && !state.has_unpushed_work
}

/// Combine the live target with an optional advisory snapshot.
pub fn resume_point(state: &RemoteState, snapshot: Option<&WorkflowSnapshot>) -> ResumePoint {
    let live = live_target(state);
    let mut point = ResumePoint {
        phase: live,
        retry_count: 0,
        reroute_count: 0,
    };
    let Some(snapshot) = snapshot else {
        return point;
    };

    let same_cr = snapshot.pr_id.is_some() && snapshot.pr_id == state.change_request.as_ref().map(|c| c.id);
    if same_cr {
        point.retry_count = snapshot.retry_count;
        point.reroute_count = snapshot.reroute_count;
    }

    if snapshot.phase > live
        && live >= Phase::AssessResolve
        && snapshot.phase <= Phase::Merge
        && snapshot_agrees(snapshot, state)
    {
        point.phase = snapshot.phase;
    }

    debug!(live = %live, snapshot = %snapshot.phase, chosen = %point.phase, retry = point.retry_count, "Resume point");
    point
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClassificationItem, ClassificationResult, ClassificationSource, ClassificationState, Severity};
    use crate::phase::Mode;
    use crate::testing::open_change_request;

    fn with_pr() -> RemoteState {
        RemoteState {
            work_item_id: 4,
            change_request: Some(open_change_request(20, 4, "steward/issue-4", "h1")),
            has_implementation: Some(true),
            local_head: Some("h1".into()),
            remote_head: Some("h1".into()),
            ..Default::default()
        }
    }

    fn classification(states: &[ClassificationState]) -> ClassificationResult {
        ClassificationResult::new(
            states
                .iter()
                .map(|s| ClassificationItem::new("x", *s, Severity::Medium))
                .collect(),
            "m",
            ClassificationSource::Cache,
        )
    }

    #[test]
    fn table() {
        assert_eq!(live_target(&RemoteState::default()), Phase::Development);

        let mut no_impl = with_pr();
        no_impl.has_implementation = Some(false);
        assert_eq!(live_target(&no_impl), Phase::Development);

        let mut unknown_impl = with_pr();
        unknown_impl.has_implementation = None;
        assert_eq!(live_target(&unknown_impl), Phase::Development);

        let stale = with_pr();
        assert_eq!(live_target(&stale), Phase::PushReview);

        let mut unpushed = with_pr();
        unpushed.review_current = true;
        unpushed.has_unpushed_work = true;
        assert_eq!(live_target(&unpushed), Phase::PushReview);

        let mut current = with_pr();
        current.review_current = true;
        assert_eq!(live_target(&current), Phase::AssessResolve);

        current.latest_classification = Some(classification(&[ClassificationState::ActionableNow]));
        assert_eq!(live_target(&current), Phase::AssessResolve);

        current.latest_classification = Some(classification(&[ClassificationState::ActionableLater]));
        assert_eq!(live_target(&current), Phase::AssessResolve);
        current.tracking_issue = Some(77);
        assert_eq!(live_target(&current), Phase::Merge);

        current.latest_classification = Some(classification(&[ClassificationState::Dismissed]));
        current.tracking_issue = None;
        assert_eq!(live_target(&current), Phase::Merge);
    }

    fn snapshot(phase: Phase, pr: Option<u64>, head: &str) -> WorkflowSnapshot {
        let mut s = WorkflowSnapshot::new(4, phase, Mode::Unsupervised);
        s.pr_id = pr;
        s.retry_count = 2;
        s.reroute_count = 1;
        s.vcs_status.local_head = Some(head.into());
        s
    }

    #[test]
    fn snapshot_carries_counters_for_same_change_request() {
        let mut current = with_pr();
        current.review_current = true;
        let point = resume_point(&current, Some(&snapshot(Phase::AssessResolve, Some(20), "h1")));
        assert_eq!(point.phase, Phase::AssessResolve);
        assert_eq!(point.retry_count, 2);
        assert_eq!(point.reroute_count, 1);

        let other = resume_point(&current, Some(&snapshot(Phase::AssessResolve, Some(99), "h1")));
        assert_eq!(other.retry_count, 0);
    }

    #[test]
    fn snapshot_never_moves_target_earlier() {
        let mut current = with_pr();
        current.review_current = true;
        let point = resume_point(&current, Some(&snapshot(Phase::Development, Some(20), "h1")));
        assert_eq!(point.phase, Phase::AssessResolve);
    }

    #[test]
    fn snapshot_moves_later_only_when_heads_agree() {
        let mut current = with_pr();
        current.review_current = true;
        let agreed = resume_point(&current, Some(&snapshot(Phase::Merge, Some(20), "h1")));
        assert_eq!(agreed.phase, Phase::Merge);

        let moved = resume_point(&current, Some(&snapshot(Phase::Merge, Some(20), "older")));
        assert_eq!(moved.phase, Phase::AssessResolve);

        let stale = with_pr();
        let point = resume_point(&stale, Some(&snapshot(Phase::Merge, Some(20), "h1")));
        assert_eq!(point.phase, Phase::PushReview);
    }
}
