//! Roll back a workflow: `steward undo <issue>`.

use anyhow::Result;
use console::style;
use std::path::Path;

use steward::exit_codes;
use steward::operator::{Operator, TerminalOperator};
use steward::orchestrator::Orchestrator;
use steward::orchestrator::interrupt::InterruptFlag;

use super::super::Cli;
use super::{collaborators, load_config, run_options};

pub async fn cmd_undo(cli: &Cli, project_dir: &Path, issue: u64, yes: bool) -> Result<i32> {
    let (config, _guard) = load_config(cli, project_dir)?;

    if !yes
        && !cli.auto
        && !TerminalOperator.confirm(
            &format!("Close the pull request for #{} and delete its branch and workspace?", issue),
            false,
        )?
    {
        println!("Cancelled.");
        return Ok(exit_codes::OK);
    }

    let deps = collaborators(&config)?;
    let options = run_options(cli, &config, None);
    let orchestrator = Orchestrator::new(config, deps, options, InterruptFlag::new());
    let summary = orchestrator.undo(issue).await?;

    println!("{} #{} rolled back", style("✓").green(), issue);
    if let Some(cr) = summary.closed_change_request {
        println!("  closed pull request #{}", cr);
    }
    if let Some(branch) = &summary.deleted_branch {
        println!("  deleted branch {}", branch);
    }
    if let Some(ws) = &summary.removed_workspace {
        println!("  removed workspace {}", ws.display());
    }
    Ok(exit_codes::OK)
}
