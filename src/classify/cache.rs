//! On-disk classification cache keyed by content hash.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::model::{ClassificationResult, ClassificationSource};

/// SHA-256 over review text, model id, and a digest of the project context.
///
/// Fields are length-prefixed so that moving bytes between them changes the key.
pub fn cache_key(review_text: &str, model_id: &str, project_context: &str) -> String {
    let context_digest = Sha256::digest(project_context.as_bytes());
    let mut hasher = Sha256::new();
    for part in [review_text.as_bytes(), model_id.as_bytes()] {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    hasher.update(context_digest);
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct ClassificationCache {
    dir: PathBuf,
}

impl ClassificationCache {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    /// A cached result, marked as coming from the cache.
    ///
    /// Unreadable or corrupt entries are treated as misses.
    pub fn get(&self, key: &str) -> Option<ClassificationResult> {
        let path = self.path_for(key);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<ClassificationResult>(&content) {
            Ok(mut result) => {
                debug!(key, "classification cache hit");
                result.source = ClassificationSource::Cache;
                Some(result)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring corrupt classification cache entry");
                None
            }
        }
    }

    /// Store a result. Heuristic results are refused.
    pub fn put(&self, key: &str, result: &ClassificationResult) -> std::io::Result<()> {
        if result.is_fallback() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(result).map_err(std::io::Error::other)?;
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ClassificationItem, ClassificationState, Severity};
    use tempfile::tempdir;

    fn sample(source: ClassificationSource) -> ClassificationResult {
        ClassificationResult::new(
            vec![ClassificationItem::new(
                "Missing null check",
                ClassificationState::ActionableNow,
                Severity::High,
            )],
            "opus",
            source,
        )
    }

    #[test]
    fn key_depends_on_every_input() {
        let base = cache_key("review", "opus", "ctx");
        assert_eq!(base, cache_key("review", "opus", "ctx"));
        assert_ne!(base, cache_key("review!", "opus", "ctx"));
        assert_ne!(base, cache_key("review", "sonnet", "ctx"));
        assert_ne!(base, cache_key("review", "opus", "other ctx"));
        assert_ne!(cache_key("ab", "c", ""), cache_key("a", "bc", ""));
        assert_eq!(base.len(), 64);
    }

    #[test]
    fn stored_result_comes_back_marked_cached() {
        let dir = tempdir().unwrap();
        let cache = ClassificationCache::new(&dir.path().join("classify"));
        let key = cache_key("r", "m", "");
        assert!(cache.get(&key).is_none());

        cache.put(&key, &sample(ClassificationSource::Assistant)).unwrap();
        let hit = cache.get(&key).unwrap();
        assert_eq!(hit.source, ClassificationSource::Cache);
        assert_eq!(hit.items.len(), 1);
    }

    #[test]
    fn heuristic_results_are_not_cached() {
        let dir = tempdir().unwrap();
        let cache = ClassificationCache::new(dir.path());
        let key = cache_key("r", "m", "");
        cache.put(&key, &sample(ClassificationSource::Heuristic)).unwrap();
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn corrupt_entry_is_a_miss() {
        let dir = tempdir().unwrap();
        let cache = ClassificationCache::new(dir.path());
        let key = cache_key("r", "m", "");
        std::fs::write(dir.path().join(format!("{}.json", key)), "{not json").unwrap();
        assert!(cache.get(&key).is_none());
    }
}
