//! Classification of review findings into NOW / LATER / DISMISSED.
//!
//! [`Classifier::classify`] never fails: a cache hit is returned as-is, a
//! conforming assistant answer is parsed and cached, and anything else
//! (assistant error, missing block, schema mismatch) degrades to
//! [`heuristic::classify`], which is never cached.

pub mod cache;
pub mod heuristic;

use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::assistant::Assistant;
use crate::errors::ClassifyError;
use crate::model::{
    ClassificationItem, ClassificationResult, ClassificationSource, ClassificationState, Severity,
};

pub use cache::{ClassificationCache, cache_key};

/// Schema of the trailing machine-readable block.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClassificationBlock {
    items: Vec<ClassificationItem>,
}

pub struct Classifier {
    assistant: Arc<dyn Assistant>,
    cache: ClassificationCache,
}

impl Classifier {
    pub fn new(assistant: Arc<dyn Assistant>, cache_dir: &Path) -> Self {
        Self {
            assistant,
            cache: ClassificationCache::new(cache_dir),
        }
    }

    fn key(&self, review_text: &str, project_context: &str) -> String {
        cache_key(review_text, self.assistant.model_id(), project_context)
    }

    /// Cache lookup only; never invokes the assistant.
    pub fn cached(&self, review_text: &str, project_context: &str) -> Option<ClassificationResult> {
        self.cache.get(&self.key(review_text, project_context))
    }

    #[instrument(skip_all, fields(model = self.assistant.model_id()))]
    pub async fn classify(&self, review_text: &str, project_context: &str) -> ClassificationResult {
        let key = self.key(review_text, project_context);
        if let Some(hit) = self.cache.get(&key) {
            return hit;
        }

        let model_id = self.assistant.model_id().to_string();
        match self.ask(review_text, project_context, &model_id).await {
            Ok(result) => {
                if let Err(e) = self.cache.put(&key, &result) {
                    warn!(error = %e, "Failed to write classification cache");
                }
                let counts = result.counts();
                info!(now = counts.now, later = counts.later, dismissed = counts.dismissed, "Classified review");
                result
            }
            Err(e) => {
                warn!(error = %e, "Classification unusable, falling back to severity heuristic");
                heuristic::classify(review_text, &model_id)
            }
        }
    }

    async fn ask(
        &self,
        review_text: &str,
        project_context: &str,
        model_id: &str,
    ) -> Result<ClassificationResult, ClassifyError> {
        let response = self
            .assistant
            .complete(&classification_prompt(review_text, project_context))
            .await?;
        parse_response(&response, model_id)
    }
}

/// Prompt stating the classification contract.
pub fn classification_prompt(review_text: &str, project_context: &str) -> String {
    let context = if project_context.trim().is_empty() {
        "(none provided)".to_string()
    } else {
        project_context.trim().to_string()
    };
    format!(
        r#"# Review triage

Sort every finding of the review below into exactly one bucket:

- ACTIONABLE_NOW: must be fixed before merge
- ACTIONABLE_LATER: worth doing, safe to track in a follow-up issue
- DISMISSED: not a real problem, or not worth acting on

Rules:
- Every finding appears exactly once.
- When unsure between two buckets, pick the more conservative one (NOW over LATER over DISMISSED).
- CRITICAL security findings are always ACTIONABLE_NOW.

## Project context
{context}

## Review
{review}

## Output
Explain briefly, then end your answer with a fenced block:

```json
{{"items": [{{"title": "...", "state": "ACTIONABLE_NOW|ACTIONABLE_LATER|DISMISSED", "severity": "CRITICAL|HIGH|MEDIUM|LOW", "category": "security|correctness|performance|testing|style|...", "reasoning": "...", "fix_effort": "optional", "defer_reason": "optional"}}]}}
```
"#,
        context = context,
        review = review_text.trim(),
    )
}

/// Body of the last ```json fence in a response.
fn trailing_json_block(response: &str) -> Option<&str> {
    let start = response.rfind("```json")?;
    let after = &response[start + "```json".len()..];
    let end = after.find("```")?;
    Some(after[..end].trim())
}

/// Parse a response under the strict schema and enforce the contract.
pub fn parse_response(response: &str, model_id: &str) -> Result<ClassificationResult, ClassifyError> {
    let block = trailing_json_block(response).ok_or(ClassifyError::MissingBlock)?;
    let parsed: ClassificationBlock = serde_json::from_str(block)?;
    let items = parsed.items.into_iter().map(enforce_contract).collect();
    Ok(ClassificationResult::new(items, model_id, ClassificationSource::Assistant))
}

fn enforce_contract(mut item: ClassificationItem) -> ClassificationItem {
    item.category = item.category.to_lowercase();
    if item.severity == Severity::Critical
        && item.is_security()
        && item.state != ClassificationState::ActionableNow
    {
        warn!(title = %item.title, "Promoting CRITICAL security finding to ACTIONABLE_NOW");
        item.state = ClassificationState::ActionableNow;
        item.defer_reason = None;
    }
    item
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeAssistant;
    use tempfile::tempdir;

    const GOOD: &str = r#"Two findings, one deferred.

```json
{"items": [
  {"title": "SQL injection in search", "state": "ACTIONABLE_NOW", "severity": "CRITICAL", "category": "security", "reasoning": "user input reaches query"},
  {"title": "Rename helper", "state": "ACTIONABLE_LATER", "severity": "LOW", "category": "style", "reasoning": "cosmetic", "defer_reason": "not urgent"}
]}
```
"#;

    #[test]
    fn parses_trailing_block() {
        let result = parse_response(GOOD, "opus").unwrap();
        assert_eq!(result.items.len(), 2);
        assert_eq!(result.counts().now, 1);
        assert_eq!(result.counts().later, 1);
        assert_eq!(result.model_id, "opus");
    }

    #[test]
    fn uses_last_block_when_several() {
        let response = "```json\n{\"items\": []}\n```\nrevised:\n```json\n{\"items\": [{\"title\": \"t\", \"state\": \"DISMISSED\", \"severity\": \"LOW\", \"category\": \"style\", \"reasoning\": \"r\"}]}\n```";
        let result = parse_response(response, "m").unwrap();
        assert_eq!(result.items.len(), 1);
    }

    #[test]
    fn rejects_missing_block() {
        assert!(matches!(
            parse_response("no block here", "m"),
            Err(ClassifyError::MissingBlock)
        ));
    }

    #[test]
    fn rejects_missing_field_and_unknown_state() {
        let missing = "```json\n{\"items\": [{\"title\": \"t\", \"state\": \"DISMISSED\", \"severity\": \"LOW\"}]}\n```";
        assert!(matches!(parse_response(missing, "m"), Err(ClassifyError::Schema(_))));

        let unknown = "```json\n{\"items\": [{\"title\": \"t\", \"state\": \"MAYBE\", \"severity\": \"LOW\", \"category\": \"x\", \"reasoning\": \"r\"}]}\n```";
        assert!(matches!(parse_response(unknown, "m"), Err(ClassifyError::Schema(_))));
    }

    #[test]
    fn critical_security_is_forced_now() {
        let response = "```json\n{\"items\": [{\"title\": \"Leaked key\", \"state\": \"ACTIONABLE_LATER\", \"severity\": \"CRITICAL\", \"category\": \"Security\", \"reasoning\": \"r\", \"defer_reason\": \"later\"}]}\n```";
        let result = parse_response(response, "m").unwrap();
        assert_eq!(result.items[0].state, ClassificationState::ActionableNow);
        assert_eq!(result.items[0].category, "security");
        assert!(result.items[0].defer_reason.is_none());
    }

    #[tokio::test]
    async fn identical_input_invokes_assistant_once() {
        let dir = tempdir().unwrap();
        let assistant = Arc::new(FakeAssistant::new("opus").with_completions(vec![GOOD.to_string()]));
        let classifier = Classifier::new(assistant.clone(), dir.path());

        let first = classifier.classify("review body", "ctx").await;
        let second = classifier.classify("review body", "ctx").await;

        assert_eq!(assistant.complete_calls(), 1);
        assert_eq!(first.items, second.items);
        assert_eq!(first.source, ClassificationSource::Assistant);
        assert_eq!(second.source, ClassificationSource::Cache);
    }

    #[tokio::test]
    async fn changed_context_misses_cache() {
        let dir = tempdir().unwrap();
        let assistant = Arc::new(
            FakeAssistant::new("opus").with_completions(vec![GOOD.to_string(), GOOD.to_string()]),
        );
        let classifier = Classifier::new(assistant.clone(), dir.path());
        classifier.classify("review body", "policy v1").await;
        classifier.classify("review body", "policy v2").await;
        assert_eq!(assistant.complete_calls(), 2);
    }

    #[tokio::test]
    async fn malformed_answer_falls_back_and_is_not_cached() {
        let dir = tempdir().unwrap();
        let assistant = Arc::new(FakeAssistant::new("opus").with_completions(vec![
            "I think it's fine".to_string(),
            "still no block".to_string(),
        ]));
        let classifier = Classifier::new(assistant.clone(), dir.path());
        let review = "- [HIGH] Race on shutdown\n- [LOW] Typo";

        let result = classifier.classify(review, "").await;
        assert!(result.is_fallback());
        assert_eq!(result.counts().now, 1);
        assert!(classifier.cached(review, "").is_none());

        classifier.classify(review, "").await;
        assert_eq!(assistant.complete_calls(), 2);
    }
}
