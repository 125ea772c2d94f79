//! Workflow execution: `steward run` and the single-phase commands.

use anyhow::Result;
use console::style;
use std::path::Path;

use steward::orchestrator::interrupt::InterruptFlag;
use steward::orchestrator::{Orchestrator, RunOutcome};
use steward::phase::Phase;

use super::super::Cli;
use super::{collaborators, load_config, run_options};

pub async fn cmd_run(cli: &Cli, project_dir: &Path, issue: u64, only: Option<Phase>) -> Result<i32> {
    let (config, _guard) = load_config(cli, project_dir)?;
    let deps = collaborators(&config)?;
    let options = run_options(cli, &config, only);
    let mut orchestrator = Orchestrator::new(config, deps, options, InterruptFlag::install());

    let outcome = orchestrator.run(issue).await?;
    print_outcome(issue, &outcome);
    Ok(outcome.exit_code())
}

fn command_for(phase: Phase) -> &'static str {
    match phase {
        Phase::Development => "develop",
        Phase::PushReview => "push",
        Phase::AssessResolve => "assess",
        Phase::Merge => "merge",
        Phase::PreStart | Phase::Completion => "run",
    }
}

pub fn print_outcome(issue: u64, outcome: &RunOutcome) {
    let marker = match outcome {
        RunOutcome::Completed { .. } | RunOutcome::PhaseDone { .. } => style("✓").green(),
        RunOutcome::Interrupted | RunOutcome::ReviewPending => style("⏸").yellow(),
        RunOutcome::Assessed(a) if a.exit_code() == 0 => style("✓").green(),
        RunOutcome::Assessed(_) => style("↻").yellow(),
        _ => style("✗").red(),
    };
    println!("{} #{} {}", marker, issue, outcome.summary());

    match outcome {
        RunOutcome::PhaseDone { next, .. } => {
            println!("  next: steward {} {}", command_for(*next), issue);
        }
        RunOutcome::Interrupted
        | RunOutcome::ReviewPending
        | RunOutcome::Blocked { .. }
        | RunOutcome::Aborted { .. } => {
            println!("  {}", style(format!("resume with `steward run {}`", issue)).dim());
        }
        _ => {}
    }
}
