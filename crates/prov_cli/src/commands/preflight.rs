//! Preflight command - Check prerequisites without changing anything.

use anyhow::Result;
use clap::Args;

use prov_core::{Preflight, PreflightReport};
use prov_runner::{ProcessRunner, ProcessRunnerOptions};

use super::{load_config, Cli};
use crate::ExitCodes;

#[derive(Args)]
pub struct PreflightArgs {
    /// Output format (text, json)
    #[arg(long, default_value = "text")]
    format: String,
}

pub async fn execute(args: &PreflightArgs, cli: &Cli) -> Result<u8> {
    let config = load_config(cli.config.as_deref())?;
    let preflight = Preflight::from_config(&config);
    let runner = ProcessRunner::new(ProcessRunnerOptions::new());

    let report = preflight.check(&runner).await;

    if args.format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&preflight, &report);
    }

    if report.passed() {
        Ok(ExitCodes::SUCCESS)
    } else {
        Ok(ExitCodes::PROVISION_FAILED)
    }
}

fn print_report(preflight: &Preflight, report: &PreflightReport) {
    println!("Commands:");
    for name in &preflight.commands {
        if report.missing_commands.contains(name) {
            println!("  ❌ {} (not found)", name);
        } else {
            println!("  ✅ {}", name);
        }
    }

    println!("Services:");
    for name in &preflight.services {
        if report.inactive_services.contains(name) {
            println!("  ❌ {} (not active)", name);
        } else {
            println!("  ✅ {}", name);
        }
    }

    println!();
    if report.passed() {
        println!("✅ Preflight PASSED");
    } else {
        println!("❌ Preflight FAILED: {}", report.describe());
    }
}
