//! Sequential batch runs: `steward batch <issues...>`.

use anyhow::Result;
use console::style;
use std::path::Path;
use std::time::Duration;

use steward::batch::SessionBudget;
use steward::exit_codes;
use steward::orchestrator::interrupt::InterruptFlag;
use steward::orchestrator::{Orchestrator, RunOutcome};

use super::super::Cli;
use super::run::print_outcome;
use super::{collaborators, load_config, run_options};

pub async fn cmd_batch(
    cli: &Cli,
    project_dir: &Path,
    issues: &[u64],
    max_items: Option<usize>,
    max_minutes: Option<u64>,
) -> Result<i32> {
    let (config, _guard) = load_config(cli, project_dir)?;
    let mut budget = SessionBudget::new(
        max_items.or(config.toml.batch.max_items),
        max_minutes
            .map(|m| Duration::from_secs(m * 60))
            .or(config.toml.batch.max_duration_secs.map(Duration::from_secs)),
    );
    let deps = collaborators(&config)?;
    let options = run_options(cli, &config, None);
    let mut orchestrator = Orchestrator::new(config, deps, options, InterruptFlag::install());

    let mut failed = Vec::new();
    for &issue in issues {
        if let Some(reason) = budget.exhausted_reason() {
            println!("{} session budget spent ({}); stopping", style("⏸").yellow(), reason);
            break;
        }
        if orchestrator.session_budget_exhausted() {
            println!("{} assistant budget exhausted; stopping", style("⏸").yellow());
            break;
        }

        println!("{}", style(format!("── #{} ──", issue)).bold());
        budget.record_item();
        match orchestrator.run(issue).await {
            Ok(RunOutcome::Interrupted) => {
                print_outcome(issue, &RunOutcome::Interrupted);
                return Ok(exit_codes::INTERRUPTED);
            }
            Ok(outcome) => {
                print_outcome(issue, &outcome);
                if outcome.exit_code() != exit_codes::OK {
                    failed.push(issue);
                }
            }
            Err(e) => {
                eprintln!("{} #{}: {:#}", style("Error:").red().bold(), issue, e);
                failed.push(issue);
            }
        }
    }

    println!(
        "Processed {} of {} issue(s){}",
        budget.processed(),
        issues.len(),
        if failed.is_empty() {
            String::new()
        } else {
            format!("; needs attention: {}", failed.iter().map(|i| format!("#{}", i)).collect::<Vec<_>>().join(", "))
        }
    );
    Ok(if failed.is_empty() {
        exit_codes::OK
    } else {
        exit_codes::MANUAL_INTERVENTION
    })
}
