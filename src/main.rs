use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use steward::exit_codes;
use steward::phase::Phase;

mod cmd;

#[derive(Parser)]
#[command(name = "steward")]
#[command(version, about = "Carries issues from implementation through review to merge")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Unsupervised: never prompt, and stop at blockers unless bypassed
    #[arg(long, global = true)]
    pub auto: bool,

    /// Let hard blockers pass in unsupervised mode
    #[arg(long, global = true)]
    pub bypass_blockers: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an issue through every remaining phase, resuming where it left off
    Run { issue: u64 },
    /// Run the DEVELOPMENT phase only
    Develop { issue: u64 },
    /// Push the branch, open the pull request and wait for a review
    Push { issue: u64 },
    /// Assess the latest review (exit 0 merge, 1 escalate, 2 fix, 3 stale)
    Assess { issue: u64 },
    /// Check blockers and merge
    Merge { issue: u64 },
    /// Show live state and the resume point, or list saved workflows
    Status { issue: Option<u64> },
    /// Close the pull request and remove the branch, workspace and state
    Undo {
        issue: u64,
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
    /// Run several issues one after another within a session budget
    Batch {
        #[arg(required = true)]
        issues: Vec<u64>,
        /// Stop starting new issues after this many
        #[arg(long)]
        max_items: Option<usize>,
        /// Stop starting new issues after this many minutes
        #[arg(long)]
        max_minutes: Option<u64>,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show effective configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Write a default .steward/steward.toml
    Init,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let code = match dispatch(&cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", console::style("Error:").red().bold(), e);
            exit_codes::MANUAL_INTERVENTION
        }
    };
    std::process::exit(code);
}

async fn dispatch(cli: &Cli) -> Result<i32> {
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match &cli.command {
        Commands::Run { issue } => cmd::cmd_run(cli, &project_dir, *issue, None).await,
        Commands::Develop { issue } => {
            cmd::cmd_run(cli, &project_dir, *issue, Some(Phase::Development)).await
        }
        Commands::Push { issue } => cmd::cmd_run(cli, &project_dir, *issue, Some(Phase::PushReview)).await,
        Commands::Assess { issue } => {
            cmd::cmd_run(cli, &project_dir, *issue, Some(Phase::AssessResolve)).await
        }
        Commands::Merge { issue } => cmd::cmd_run(cli, &project_dir, *issue, Some(Phase::Merge)).await,
        Commands::Status { issue } => cmd::cmd_status(cli, &project_dir, *issue).await,
        Commands::Undo { issue, yes } => cmd::cmd_undo(cli, &project_dir, *issue, *yes).await,
        Commands::Batch {
            issues,
            max_items,
            max_minutes,
        } => cmd::cmd_batch(cli, &project_dir, issues, *max_items, *max_minutes).await,
        Commands::Config { command } => cmd::cmd_config(&project_dir, command.clone()),
    }
}
