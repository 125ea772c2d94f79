//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module   | Commands handled                            |
//! |----------|---------------------------------------------|
//! | `run`    | `Run`, `Develop`, `Push`, `Assess`, `Merge` |
//! | `status` | `Status`                                    |
//! | `undo`   | `Undo`                                      |
//! | `batch`  | `Batch`                                     |
//! | `config` | `Config`                                    |

pub mod batch;
pub mod config;
pub mod run;
pub mod status;
pub mod undo;

pub use batch::cmd_batch;
pub use config::cmd_config;
pub use run::cmd_run;
pub use status::cmd_status;
pub use undo::cmd_undo;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

use steward::assistant::claude::ClaudeCli;
use steward::config::Config;
use steward::hosting::github::{GitHubClient, parse_owner_repo_from_url};
use steward::notify::Notifier;
use steward::operator::TerminalOperator;
use steward::orchestrator::{Collaborators, RunOptions};
use steward::phase::{Mode, Phase};
use steward::vcs::REMOTE;
use steward::vcs::git::GitRepo;

use super::Cli;

/// Resolve configuration, create state directories and start logging.
///
/// Hold the returned guard until the command finishes so file logs flush.
pub fn load_config(cli: &Cli, project_dir: &Path) -> Result<(Config, Option<WorkerGuard>)> {
    let mut config = Config::new(project_dir, cli.verbose)?;
    if cli.auto {
        config.mode = Mode::Unsupervised;
    }
    config.ensure_directories()?;
    let guard = steward::logging::init(cli.verbose, Some(&config.log_dir));
    Ok((config, guard))
}

pub fn run_options(cli: &Cli, config: &Config, only: Option<Phase>) -> RunOptions {
    RunOptions {
        mode: config.mode,
        bypass_blockers: cli.bypass_blockers || config.bypass_blockers(),
        only,
    }
}

/// `owner/name` from config, or from the `origin` remote URL.
fn resolve_repo(config: &Config) -> Result<String> {
    if let Ok(slug) = config.repo_slug() {
        return Ok(slug.to_string());
    }
    let repo = git2::Repository::open(&config.project_dir)
        .with_context(|| format!("{} is not a git repository", config.project_dir.display()))?;
    let remote = repo
        .find_remote(REMOTE)
        .with_context(|| format!("No `{}` remote configured", REMOTE))?;
    remote.url().and_then(parse_owner_repo_from_url).context(
        "Cannot infer the repository from `origin`: set [project] repo in .steward/steward.toml or STEWARD_REPO",
    )
}

/// Production collaborators: GitHub, the local git checkout, the Claude CLI
/// and the terminal.
pub fn collaborators(config: &Config) -> Result<Collaborators> {
    let repo = resolve_repo(config)?;
    Ok(Collaborators {
        hosting: Arc::new(GitHubClient::new(&config.api_url, &repo, config.github_token.clone())),
        vcs: Arc::new(GitRepo::new(&config.project_dir, &config.mainline)),
        assistant: Arc::new(ClaudeCli::new(
            &config.claude_cmd,
            &config.model,
            config.session_timeout(),
            config.review_timeout(),
        )),
        operator: Arc::new(TerminalOperator),
        notifier: Arc::new(Notifier::from_webhook(config.toml.notify.webhook_url.as_deref())),
    })
}
