//! Severity-only classifier used when the assistant's answer is unusable.
//!
//! Keeps the two highest severities as NOW and dismisses the rest. When the
//! review's summary counts more CRITICAL/HIGH findings than could be parsed
//! from its body, one placeholder NOW item per severity stands in for the
//! difference so that a badly formatted review can never read as clean.

use crate::model::{
    ClassificationItem, ClassificationResult, ClassificationSource, ClassificationState, Severity,
};
use crate::review::{parse_findings, parse_severity_summary};

const KEPT: [Severity; 2] = [Severity::Critical, Severity::High];

pub fn classify(review_text: &str, model_id: &str) -> ClassificationResult {
    let mut items: Vec<ClassificationItem> = parse_findings(review_text)
        .into_iter()
        .map(|mut item| {
            if KEPT.contains(&item.severity) {
                item.reasoning = "Kept by severity fallback".to_string();
            } else {
                item.state = ClassificationState::Dismissed;
                item.reasoning = "Dismissed by severity fallback".to_string();
            }
            item
        })
        .collect();

    if let Some(summary) = parse_severity_summary(review_text) {
        for (severity, reported) in [(Severity::Critical, summary.critical), (Severity::High, summary.high)] {
            let parsed = items.iter().filter(|i| i.severity == severity).count() as u64;
            let missing = u64::from(reported).saturating_sub(parsed);
            if missing > 0 {
                items.push(
                    ClassificationItem::new(
                        &format!("Unlisted {} findings", severity),
                        ClassificationState::ActionableNow,
                        severity,
                    )
                    .with_reasoning(&format!(
                        "{} reported in the review summary but not listed in a recognizable form",
                        missing
                    )),
                );
            }
        }
    }

    ClassificationResult::new(items, model_id, ClassificationSource::Heuristic)
}
