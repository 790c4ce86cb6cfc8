//! Status command - Show a persisted run report.

use anyhow::{Context, Result};
use chrono::Local;
use clap::Args;

use prov_core::{ActionOutcome, RunReport, StageOutcome};

use super::{load_config, Cli};
use crate::ExitCodes;

#[derive(Args)]
pub struct StatusArgs {
    /// Run ID to show (defaults to the most recent run)
    #[arg(long)]
    run: Option<String>,

    /// Output format (text, json)
    #[arg(long, default_value = "text")]
    format: String,
}

pub async fn execute(args: &StatusArgs, cli: &Cli) -> Result<u8> {
    let config = load_config(cli.config.as_deref())?;
    let dir = &config.report_dir;

    let report = match &args.run {
        Some(id) => {
            let path = dir.join(format!("{}.json", id));
            RunReport::load(&path).with_context(|| format!("Failed to load run {}", id))?
        }
        None => match RunReport::load_latest(dir).context("Failed to load latest run")? {
            Some(report) => report,
            None => {
                println!("No runs recorded in {}", dir.display());
                return Ok(ExitCodes::PROVISION_FAILED);
            }
        },
    };

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(ExitCodes::SUCCESS)
}

fn stage_icon(outcome: StageOutcome) -> &'static str {
    match outcome {
        StageOutcome::Succeeded => "✅",
        StageOutcome::Warned => "⚠️ ",
        StageOutcome::Failed => "❌",
    }
}

fn print_report(report: &RunReport) {
    println!("Run:       {}", report.run_id);
    println!("Workflow:  {}", report.workflow_name);
    println!("Result:    {}", report.summary());
    println!(
        "Started:   {}",
        report.started_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(completed) = report.completed_at {
        println!(
            "Completed: {}",
            completed.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
        );
    }
    if report.dry_run {
        println!("Mode:      dry run");
    }

    println!();
    println!("Stages:");
    for stage in &report.stages {
        println!(
            "  {} {} ({} ms)",
            stage_icon(stage.outcome),
            stage.stage,
            stage.duration_ms()
        );
        for action in &stage.actions {
            let retries = if action.attempts > 1 {
                format!(" [{} attempts]", action.attempts)
            } else {
                String::new()
            };
            let marker = match action.outcome {
                ActionOutcome::Succeeded => "ok",
                ActionOutcome::Failed => "FAILED",
                ActionOutcome::Warned => "warning",
                ActionOutcome::Skipped => "skipped",
            };
            println!("      - {}: {}{}", action.label, marker, retries);
        }
    }

    if !report.warnings.is_empty() {
        println!();
        for warning in &report.warnings {
            println!("⚠️  {}", warning);
        }
    }
    if let Some(error) = &report.error {
        println!();
        println!("❌ {}", error);
    }
}
