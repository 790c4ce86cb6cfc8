//! provisioner CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success (including runs that finished with health-check warnings)
//! - 1: Provisioning failed
//! - 2: Configuration error

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, Commands};
use prov_core::CoreError;

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const PROVISION_FAILED: u8 = 1;
    pub const CONFIG_ERROR: u8 = 2;
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "prov_cli={level},prov_core={level},prov_runner={level},warn"
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);
    let log_result = if cli.log_json {
        registry
            .with(fmt::layer().json().with_target(false).with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };

    if log_result.is_err() {
        // Logging already initialized, continue
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let result = match &cli.command {
        Commands::Provision(args) => commands::provision::execute(args, &cli).await,
        Commands::Preflight(args) => commands::preflight::execute(args, &cli).await,
        Commands::Status(args) => commands::status::execute(args, &cli).await,
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Configuration problems exit with 2; anything else is a failed run.
fn categorize_error(e: &anyhow::Error) -> u8 {
    let is_config = e.chain().any(|cause| {
        cause
            .downcast_ref::<CoreError>()
            .is_some_and(|err| err.kind() == "ConfigurationError")
    });
    if is_config {
        ExitCodes::CONFIG_ERROR
    } else {
        ExitCodes::PROVISION_FAILED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_config_errors_exit_with_2() {
        let err: anyhow::Result<()> = Err(CoreError::Config("bad charset".into()))
            .context("Failed to load configuration");
        assert_eq!(categorize_error(&err.unwrap_err()), ExitCodes::CONFIG_ERROR);
    }

    #[test]
    fn test_other_errors_exit_with_1() {
        let err = anyhow::anyhow!("no runs recorded");
        assert_eq!(categorize_error(&err), ExitCodes::PROVISION_FAILED);
    }
}
