//! Pre-merge blocker gate.
//!
//! Two tiers. Sensitivity hints are glob matches on the changed paths and
//! only inform. Hard gates stop a merge until a human approves (supervised)
//! or a global bypass is configured (unsupervised). Approvals last for the
//! rest of the run; each (work item, blocker type) notifies exactly once,
//! across invocations.

use anyhow::Result;
use glob::Pattern;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::hosting::HostingPlatform;
use crate::model::{BlockerDecision, BlockerType, ClassificationResult, ClassificationState, Severity, Urgency};
use crate::notes::NotesStore;
use crate::notify::{Notification, Notifier};
use crate::operator::Operator;
use crate::phase::Mode;
use crate::steward_config::SensitivityRule;

/// A changed path matched a sensitivity rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensitivityHint {
    pub rule: String,
    pub path: String,
    pub blocking: bool,
}

/// What the gate inspects at the pre-merge checkpoint.
#[derive(Debug, Clone, Default)]
pub struct BlockerContext<'a> {
    pub work_item_id: u64,
    pub head_sha: Option<&'a str>,
    pub classification: Option<&'a ClassificationResult>,
    pub changed_paths: &'a [String],
    pub session_budget_exhausted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateResult {
    Pass,
    Blocked { blocker_type: BlockerType, details: String },
}

struct CompiledRule {
    name: String,
    patterns: Vec<Pattern>,
    blocking: bool,
}

fn compile(rules: &[SensitivityRule]) -> Vec<CompiledRule> {
    rules
        .iter()
        .map(|rule| CompiledRule {
            name: rule.name.clone(),
            patterns: rule
                .patterns
                .iter()
                .filter_map(|p| match Pattern::new(p) {
                    Ok(pattern) => Some(pattern),
                    Err(e) => {
                        warn!(rule = %rule.name, pattern = %p, error = %e, "Ignoring invalid sensitivity pattern");
                        None
                    }
                })
                .collect(),
            blocking: rule.blocking,
        })
        .collect()
}

fn urgency_of(blocker_type: BlockerType) -> Urgency {
    match blocker_type {
        BlockerType::CriticalFinding | BlockerType::ExpiredCredentials => Urgency::High,
        _ => Urgency::Normal,
    }
}

pub struct BlockerGate {
    hosting: Arc<dyn HostingPlatform>,
    operator: Arc<dyn Operator>,
    notifier: Arc<Notifier>,
    notes: NotesStore,
    rules: Vec<CompiledRule>,
    mode: Mode,
    bypass: bool,
    decisions: HashMap<(u64, BlockerType), BlockerDecision>,
}

impl BlockerGate {
    pub fn new(
        hosting: Arc<dyn HostingPlatform>,
        operator: Arc<dyn Operator>,
        notifier: Arc<Notifier>,
        notes: NotesStore,
        rules: &[SensitivityRule],
        mode: Mode,
        bypass: bool,
    ) -> Self {
        Self {
            hosting,
            operator,
            notifier,
            notes,
            rules: compile(rules),
            mode,
            bypass,
            decisions: HashMap::new(),
        }
    }

    /// Informational matches of changed paths against every rule.
    pub fn sensitivity_hints(&self, paths: &[String]) -> Vec<SensitivityHint> {
        let mut hints = Vec::new();
        for path in paths {
            for rule in &self.rules {
                if rule.patterns.iter().any(|p| p.matches(path)) {
                    hints.push(SensitivityHint {
                        rule: rule.name.clone(),
                        path: path.clone(),
                        blocking: rule.blocking,
                    });
                }
            }
        }
        hints
    }

    /// Decisions taken so far in this run.
    pub fn decisions(&self) -> Vec<BlockerDecision> {
        let mut decisions: Vec<_> = self.decisions.values().cloned().collect();
        decisions.sort_by_key(|d| (d.work_item_id, d.blocker_type));
        decisions
    }

    async fn hard_gates(&self, ctx: &BlockerContext<'_>) -> Vec<(BlockerType, String)> {
        let mut found = Vec::new();

        if let Some(classification) = ctx.classification
            && classification.has_critical_now()
        {
            let titles: Vec<&str> = classification
                .items
                .iter()
                .filter(|i| i.state == ClassificationState::ActionableNow && i.severity == Severity::Critical)
                .map(|i| i.title.as_str())
                .collect();
            found.push((BlockerType::CriticalFinding, format!("unresolved CRITICAL: {}", titles.join("; "))));
        }

        match ctx.head_sha {
            Some(sha) => match self.hosting.checks_passing(sha).await {
                Ok(Some(true)) => {}
                Ok(Some(false)) => found.push((BlockerType::FailingChecks, format!("checks failing on {}", sha))),
                Ok(None) => found.push((BlockerType::FailingChecks, format!("checks still running on {}", sha))),
                Err(e) => found.push((BlockerType::FailingChecks, format!("check status unavailable: {}", e))),
            },
            None => found.push((BlockerType::FailingChecks, "head commit unknown".to_string())),
        }

        match self.hosting.credentials_valid().await {
            Ok(true) => {}
            Ok(false) => found.push((BlockerType::ExpiredCredentials, "hosting token rejected".to_string())),
            Err(e) => found.push((BlockerType::ExpiredCredentials, format!("credential check failed: {}", e))),
        }

        if ctx.session_budget_exhausted {
            found.push((BlockerType::SessionBudget, "assistant session budget exhausted".to_string()));
        }

        let blocking: Vec<String> = self
            .sensitivity_hints(ctx.changed_paths)
            .into_iter()
            .filter(|h| h.blocking)
            .map(|h| format!("{} ({})", h.path, h.rule))
            .collect();
        if !blocking.is_empty() {
            found.push((BlockerType::SensitivePath, blocking.join(", ")));
        }

        found
    }

    /// Notify once per (work item, blocker type), ever.
    async fn notify_once(&self, work_item_id: u64, blocker_type: BlockerType, details: &str) {
        let key = format!("{}:{}", work_item_id, blocker_type);
        let first = match self.notes.record_once(&key) {
            Ok(first) => first,
            Err(e) => {
                warn!(error = %e, key = %key, "Notes store unavailable; notifying anyway");
                true
            }
        };
        if !first {
            return;
        }
        self.notifier
            .notify(&Notification {
                work_item_id,
                title: format!("Blocked: {}", blocker_type),
                body: details.to_string(),
                urgency: urgency_of(blocker_type),
            })
            .await;
    }

    fn decide(&mut self, work_item_id: u64, blocker_type: BlockerType, details: &str) -> Result<bool> {
        if let Some(decision) = self.decisions.get(&(work_item_id, blocker_type)) {
            return Ok(decision.approved);
        }
        let approved = match self.mode {
            Mode::Supervised => self.operator.confirm(
                &format!("#{} is blocked by {}: {}. Merge anyway?", work_item_id, blocker_type, details),
                false,
            )?,
            Mode::Unsupervised => {
                if self.bypass {
                    info!(work_item = work_item_id, blocker = %blocker_type, "Blocker bypassed by configuration");
                }
                self.bypass
            }
        };
        self.decisions.insert(
            (work_item_id, blocker_type),
            BlockerDecision {
                blocker_type,
                urgency: urgency_of(blocker_type),
                approved,
                work_item_id,
            },
        );
        Ok(approved)
    }

    /// Pre-merge checkpoint.
    #[instrument(skip(self, ctx), fields(work_item = ctx.work_item_id))]
    pub async fn check_blockers(&mut self, ctx: &BlockerContext<'_>) -> Result<GateResult> {
        for hint in self.sensitivity_hints(ctx.changed_paths).iter().filter(|h| !h.blocking) {
            info!(rule = %hint.rule, path = %hint.path, "Sensitive path changed");
        }
        for (blocker_type, details) in self.hard_gates(ctx).await {
            self.notify_once(ctx.work_item_id, blocker_type, &details).await;
            if !self.decide(ctx.work_item_id, blocker_type, &details)? {
                warn!(blocker = %blocker_type, %details, "Merge blocked");
                return Ok(GateResult::Blocked { blocker_type, details });
            }
        }
        Ok(GateResult::Pass)
    }
}
