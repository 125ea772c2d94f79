//! Schema of `.steward/steward.toml`.
//!
//! Every section is optional; a missing file yields the defaults below.
//! Environment variables override the file where noted, and CLI flags
//! override both (see [`crate::config::Config`]).
//!
//! ```toml
//! [project]
//! repo = "acme/widgets"
//! mainline = "main"
//!
//! [workflow]
//! max_retries = 3
//! divergence_threshold = 10
//!
//! [[blockers.rules]]
//! name = "migrations"
//! patterns = ["migrations/**"]
//! blocking = true
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILE: &str = "steward.toml";

/// `[project]`: where the work lives and which assistant to drive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectSection {
    /// `owner/name` slug on the hosting platform. Inferred from `origin` when unset.
    #[serde(default)]
    pub repo: Option<String>,
    /// Mainline branch (default: "main")
    #[serde(default)]
    pub mainline: Option<String>,
    /// Assistant CLI command (default: "claude")
    #[serde(default)]
    pub claude_cmd: Option<String>,
    /// Model passed to the assistant and used as part of the classification cache key.
    #[serde(default)]
    pub model: Option<String>,
    /// Optional project context document fed to classification.
    #[serde(default)]
    pub context_file: Option<String>,
    /// Hosting API base URL, for GitHub Enterprise.
    #[serde(default)]
    pub api_url: Option<String>,
}

/// `[workflow]`: loop bounds, timeouts and polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSection {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_max_reroutes")]
    pub max_reroutes: u32,
    #[serde(default = "default_divergence_threshold")]
    pub divergence_threshold: usize,
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    #[serde(default = "default_review_timeout_secs")]
    pub review_timeout_secs: u64,
    #[serde(default = "default_poll_initial_secs")]
    pub poll_initial_secs: u64,
    #[serde(default = "default_poll_max_secs")]
    pub poll_max_secs: u64,
    #[serde(default = "default_poll_total_secs")]
    pub poll_total_secs: u64,
    /// Review the change locally with the assistant instead of waiting for
    /// an external reviewer.
    #[serde(default = "default_local_review")]
    pub local_review: bool,
    #[serde(default)]
    pub draft_change_requests: bool,
}

fn default_max_retries() -> u32 {
    3
}

fn default_max_reroutes() -> u32 {
    2
}

fn default_divergence_threshold() -> usize {
    10
}

fn default_session_timeout_secs() -> u64 {
    3600
}

fn default_review_timeout_secs() -> u64 {
    600
}

fn default_poll_initial_secs() -> u64 {
    15
}

fn default_poll_max_secs() -> u64 {
    120
}

fn default_poll_total_secs() -> u64 {
    1800
}

fn default_local_review() -> bool {
    true
}

impl Default for WorkflowSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            max_reroutes: default_max_reroutes(),
            divergence_threshold: default_divergence_threshold(),
            session_timeout_secs: default_session_timeout_secs(),
            review_timeout_secs: default_review_timeout_secs(),
            poll_initial_secs: default_poll_initial_secs(),
            poll_max_secs: default_poll_max_secs(),
            poll_total_secs: default_poll_total_secs(),
            local_review: default_local_review(),
            draft_change_requests: false,
        }
    }
}

/// One glob-based sensitivity rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensitivityRule {
    pub name: String,
    pub patterns: Vec<String>,
    /// A match becomes a hard pre-merge gate instead of a hint.
    #[serde(default)]
    pub blocking: bool,
}

impl SensitivityRule {
    fn new(name: &str, patterns: &[&str], blocking: bool) -> Self {
        Self {
            name: name.to_string(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            blocking,
        }
    }
}

/// Built-in sensitivity categories used when the file defines none.
pub fn default_sensitivity_rules() -> Vec<SensitivityRule> {
    vec![
        SensitivityRule::new(
            "infrastructure",
            &["**/*.tf", "terraform/**", "infra/**", "k8s/**", "helm/**", "Dockerfile"],
            false,
        ),
        SensitivityRule::new("migrations", &["migrations/**", "**/migrations/**", "**/*.sql"], false),
        SensitivityRule::new("auth", &["**/auth/**", "**/*auth*.rs", "**/security/**"], false),
        SensitivityRule::new("protected-scripts", &[".github/workflows/**", "scripts/release*"], false),
        SensitivityRule::new("docs", &["docs/**", "*.md"], false),
        SensitivityRule::new(
            "expensive-resources",
            &["**/gpu*.yaml", "**/cluster*.yaml", "**/autoscal*"],
            false,
        ),
    ]
}

/// `[blockers]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockersSection {
    /// Unsupervised runs pass hard gates instead of halting.
    #[serde(default)]
    pub bypass: bool,
    #[serde(default = "default_sensitivity_rules")]
    pub rules: Vec<SensitivityRule>,
}

impl Default for BlockersSection {
    fn default() -> Self {
        Self {
            bypass: false,
            rules: default_sensitivity_rules(),
        }
    }
}

/// `[batch]`: session budget for processing several work items.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchSection {
    #[serde(default)]
    pub max_items: Option<usize>,
    #[serde(default)]
    pub max_duration_secs: Option<u64>,
}

/// `[notify]`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifySection {
    #[serde(default)]
    pub webhook_url: Option<String>,
}

/// The complete steward.toml structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StewardToml {
    #[serde(default)]
    pub project: ProjectSection,
    #[serde(default)]
    pub workflow: WorkflowSection,
    #[serde(default)]
    pub blockers: BlockersSection,
    #[serde(default)]
    pub batch: BatchSection,
    #[serde(default)]
    pub notify: NotifySection,
}

impl StewardToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse steward.toml")
    }

    /// Load `.steward/steward.toml`, or defaults when the file is absent.
    pub fn load_or_default(steward_dir: &Path) -> Result<Self> {
        let path = steward_dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize steward.toml")
    }

    /// Sanity warnings; none of these are fatal.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.workflow.max_retries == 0 {
            warnings.push("workflow.max_retries is 0: every NOW finding escalates immediately".into());
        }
        if self.workflow.divergence_threshold == 0 {
            warnings.push("workflow.divergence_threshold is 0: any divergence abandons the change request".into());
        }
        if self.workflow.poll_initial_secs > self.workflow.poll_max_secs {
            warnings.push(format!(
                "workflow.poll_initial_secs ({}) exceeds poll_max_secs ({})",
                self.workflow.poll_initial_secs, self.workflow.poll_max_secs
            ));
        }
        for rule in &self.blockers.rules {
            for pattern in &rule.patterns {
                if glob::Pattern::new(pattern).is_err() {
                    warnings.push(format!(
                        "Invalid glob '{}' in blocker rule '{}'",
                        pattern, rule.name
                    ));
                }
            }
        }
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_file_yields_defaults() {
        let config = StewardToml::parse("").unwrap();
        assert_eq!(config.workflow.max_retries, 3);
        assert_eq!(config.workflow.max_reroutes, 2);
        assert_eq!(config.workflow.divergence_threshold, 10);
        assert!(!config.blockers.bypass);
        assert!(!config.blockers.rules.is_empty());
        assert!(config.validate().is_empty());
    }

    #[test]
    fn parses_sections() {
        let config = StewardToml::parse(
            r#"
[project]
repo = "acme/widgets"
mainline = "trunk"
model = "opus"

[workflow]
max_retries = 5
divergence_threshold = 4

[[blockers.rules]]
name = "migrations"
patterns = ["db/migrations/**"]
blocking = true

[batch]
max_items = 3

[notify]
webhook_url = "https://hooks.example.com/x"
"#,
        )
        .unwrap();
        assert_eq!(config.project.repo.as_deref(), Some("acme/widgets"));
        assert_eq!(config.project.mainline.as_deref(), Some("trunk"));
        assert_eq!(config.workflow.max_retries, 5);
        assert_eq!(config.workflow.max_reroutes, 2);
        assert_eq!(config.blockers.rules.len(), 1);
        assert!(config.blockers.rules[0].blocking);
        assert_eq!(config.batch.max_items, Some(3));
        assert!(config.notify.webhook_url.is_some());
    }

    #[test]
    fn validate_flags_bad_glob() {
        let mut config = StewardToml::default();
        config.blockers.rules = vec![SensitivityRule::new("bad", &["[unterminated"], true)];
        let warnings = config.validate();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("bad"));
    }

    #[test]
    fn load_or_default_without_file() {
        let dir = tempdir().unwrap();
        let config = StewardToml::load_or_default(dir.path()).unwrap();
        assert_eq!(config.workflow.max_retries, 3);
    }

    #[test]
    fn serialized_config_parses_back() {
        let original = StewardToml::default();
        let text = original.to_toml_string().unwrap();
        let parsed = StewardToml::parse(&text).unwrap();
        assert_eq!(parsed.workflow.poll_total_secs, original.workflow.poll_total_secs);
        assert_eq!(parsed.blockers.rules, original.blockers.rules);
    }
}
