use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::phase::Mode;
use crate::poll::Backoff;
use crate::steward_config::{SensitivityRule, StewardToml};

pub const STATE_DIR: &str = ".steward";

/// Keeps runtime state out of commits; `steward.toml` stays tracked.
const GITIGNORE: &str = "state/\ncache/\nlogs/\nworkspaces/\nnotes.json\nnotes.json.lock\nfix-items-*.json\n";

/// Resolved runtime configuration.
///
/// Layers `.steward/steward.toml`, then environment (`STEWARD_*`,
/// `GITHUB_TOKEN`, `CLAUDE_CMD`, with `.env` loaded by `dotenvy`), then CLI
/// flags applied by the command layer.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub steward_dir: PathBuf,
    pub state_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub log_dir: PathBuf,
    pub workspaces_dir: PathBuf,
    pub repo: Option<String>,
    pub mainline: String,
    pub claude_cmd: String,
    pub model: String,
    pub api_url: String,
    pub github_token: Option<String>,
    pub mode: Mode,
    pub verbose: bool,
    pub toml: StewardToml,
}

impl Config {
    pub fn new(project_dir: &Path, verbose: bool) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        // A missing .env is the normal case.
        let _ = dotenvy::from_path(project_dir.join(".env"));

        let steward_dir = project_dir.join(STATE_DIR);
        let toml = StewardToml::load_or_default(&steward_dir)?;
        Ok(Self::from_parts(project_dir, toml, verbose))
    }

    /// Assemble a config from an already-parsed file, applying env overrides.
    pub fn from_parts(project_dir: PathBuf, toml: StewardToml, verbose: bool) -> Self {
        let steward_dir = project_dir.join(STATE_DIR);
        let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

        let repo = env("STEWARD_REPO").or_else(|| toml.project.repo.clone());
        let mainline = env("STEWARD_MAINLINE")
            .or_else(|| toml.project.mainline.clone())
            .unwrap_or_else(|| "main".to_string());
        let claude_cmd = env("CLAUDE_CMD")
            .or_else(|| toml.project.claude_cmd.clone())
            .unwrap_or_else(|| "claude".to_string());
        let model = env("STEWARD_MODEL")
            .or_else(|| toml.project.model.clone())
            .unwrap_or_else(|| "default".to_string());
        let api_url = env("STEWARD_API_URL")
            .or_else(|| toml.project.api_url.clone())
            .unwrap_or_else(|| "https://api.github.com".to_string());
        let mode = env("STEWARD_MODE")
            .and_then(|m| m.parse().ok())
            .unwrap_or_default();

        Self {
            state_dir: steward_dir.join("state"),
            cache_dir: steward_dir.join("cache").join("classify"),
            log_dir: steward_dir.join("logs"),
            workspaces_dir: steward_dir.join("workspaces"),
            steward_dir,
            project_dir,
            repo,
            mainline,
            claude_cmd,
            model,
            api_url,
            github_token: env("GITHUB_TOKEN").or_else(|| env("GH_TOKEN")),
            mode,
            verbose,
            toml,
        }
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [&self.state_dir, &self.cache_dir, &self.log_dir, &self.workspaces_dir] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let ignore = self.steward_dir.join(".gitignore");
        if !ignore.exists() {
            std::fs::write(&ignore, GITIGNORE).context("Failed to write .steward/.gitignore")?;
        }
        Ok(())
    }

    /// `owner/name`, or an error naming the settings that provide it.
    pub fn repo_slug(&self) -> Result<&str> {
        self.repo.as_deref().context(
            "Repository not configured: set [project] repo in .steward/steward.toml or STEWARD_REPO",
        )
    }

    pub fn notes_file(&self) -> PathBuf {
        self.steward_dir.join("notes.json")
    }

    pub fn fix_items_file(&self, work_item_id: u64) -> PathBuf {
        self.steward_dir.join(format!("fix-items-{}.json", work_item_id))
    }

    /// Project context fed to classification; empty when unconfigured or unreadable.
    pub fn project_context(&self) -> String {
        self.toml
            .project
            .context_file
            .as_ref()
            .and_then(|f| std::fs::read_to_string(self.project_dir.join(f)).ok())
            .unwrap_or_default()
    }

    pub fn max_retries(&self) -> u32 {
        self.toml.workflow.max_retries
    }

    pub fn max_reroutes(&self) -> u32 {
        self.toml.workflow.max_reroutes
    }

    pub fn divergence_threshold(&self) -> usize {
        self.toml.workflow.divergence_threshold
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.workflow.session_timeout_secs)
    }

    pub fn review_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.workflow.review_timeout_secs)
    }

    pub fn poll_backoff(&self) -> Backoff {
        let w = &self.toml.workflow;
        Backoff::new(
            Duration::from_secs(w.poll_initial_secs),
            Duration::from_secs(w.poll_max_secs),
            Duration::from_secs(w.poll_total_secs),
        )
    }

    pub fn sensitivity_rules(&self) -> &[SensitivityRule] {
        &self.toml.blockers.rules
    }

    /// Bypass from the file or `STEWARD_BYPASS_BLOCKERS=1`.
    pub fn bypass_blockers(&self) -> bool {
        if let Ok(value) = std::env::var("STEWARD_BYPASS_BLOCKERS") {
            return value == "1" || value.eq_ignore_ascii_case("true");
        }
        self.toml.blockers.bypass
    }
}
