//! Workflow status: `steward status [issue]`.

use anyhow::Result;
use console::style;
use std::path::Path;

use steward::exit_codes;
use steward::orchestrator::interrupt::InterruptFlag;
use steward::orchestrator::{Orchestrator, StatusReport};
use steward::snapshot::{SnapshotStore, WorkflowSnapshot};

use super::super::Cli;
use super::{collaborators, load_config, run_options};

pub async fn cmd_status(cli: &Cli, project_dir: &Path, issue: Option<u64>) -> Result<i32> {
    let (config, _guard) = load_config(cli, project_dir)?;

    let Some(issue) = issue else {
        let snapshots = SnapshotStore::new(&config.state_dir).list();
        if snapshots.is_empty() {
            println!("No saved workflows.");
        } else {
            println!("{}", style("Saved workflows").bold());
            for snapshot in &snapshots {
                print_snapshot_line(snapshot);
            }
        }
        return Ok(exit_codes::OK);
    };

    let deps = collaborators(&config)?;
    let options = run_options(cli, &config, None);
    let orchestrator = Orchestrator::new(config, deps, options, InterruptFlag::new());
    print_report(&orchestrator.status(issue).await);
    Ok(exit_codes::OK)
}

fn print_snapshot_line(snapshot: &WorkflowSnapshot) {
    println!(
        "  #{:<6} {:<15} retry {} {}{}",
        snapshot.work_item_id,
        snapshot.phase.to_string(),
        snapshot.retry_count,
        style(snapshot.timestamp.format("%Y-%m-%d %H:%M")).dim(),
        if snapshot.interrupted { " (interrupted)" } else { "" },
    );
}

fn print_report(report: &StatusReport) {
    let state = &report.state;
    match &state.work_item {
        Some(item) => println!("{} #{} {}", style("Issue").bold(), item.id, item.title),
        None => println!("{} #{} (not found)", style("Issue").bold(), state.work_item_id),
    }

    match &state.change_request {
        Some(cr) => println!("  Pull request:   #{} on {}", cr.id, cr.branch),
        None => println!("  Pull request:   none"),
    }
    if let Some(ws) = &state.workspace {
        println!("  Workspace:      {}", ws.display());
    }
    let short = |sha: &Option<String>| {
        sha.as_deref()
            .map(|s| s[..s.len().min(8)].to_string())
            .unwrap_or_else(|| "-".into())
    };
    println!(
        "  Heads:          local {} / remote {}{}{}",
        short(&state.local_head),
        short(&state.remote_head),
        if state.has_unpushed_work { ", unpushed" } else { "" },
        if state.has_uncommitted_changes { ", uncommitted" } else { "" },
    );

    let reviewed_at = state.latest_review_time().map(|t| t.format("%Y-%m-%d %H:%M").to_string());
    let review = match (reviewed_at, state.review_current) {
        (None, _) if state.review_requested_for_head => "requested".to_string(),
        (None, _) => "none".to_string(),
        (Some(at), true) => format!("current ({})", at),
        (Some(at), false) => format!("stale ({})", at),
    };
    println!("  Review:         {}", review);
    if let Some(c) = &state.latest_classification {
        let counts = c.counts();
        println!(
            "  Classification: NOW {} · LATER {} · DISMISSED {}",
            counts.now, counts.later, counts.dismissed
        );
    }
    if let Some(issue) = state.tracking_issue {
        println!("  Follow-up:      #{}", issue);
    }

    if let Some(snapshot) = &report.snapshot {
        print!("  Snapshot:");
        print_snapshot_line(snapshot);
    }
    println!(
        "  {} {} (retry {}, reroute {})",
        style("Resumes at:").bold(),
        style(report.resume.phase).cyan(),
        report.resume.retry_count,
        report.resume.reroute_count
    );
}
