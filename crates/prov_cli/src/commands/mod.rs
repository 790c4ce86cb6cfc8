//! CLI command definitions.
//!
//! This module defines the command structure for the provisioner CLI.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use prov_core::ProvisionConfig;

pub mod preflight;
pub mod provision;
pub mod status;

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "provision.toml";

/// provisioner - storefront backend provisioning
#[derive(Parser)]
#[command(name = "prov")]
#[command(version, about = "provisioner - storefront backend provisioning")]
#[command(long_about = r#"
provisioner sets up a storefront backend on a single host: database and
users, environment file, dependencies, application bootstrap, permissions,
and a final health check.

STAGES:
  Preflight              → required commands and database service
  Database Setup         → database, users, grants
  Project Setup          → env file backup, template, rewrite
  Dependency Installation → composer install
  Application Bootstrap  → key, installer, storage link, migrations, caches
  Permission Setup       → ownership and mode of writable directories
  Health Check           → database connection and health endpoint (warnings only)

EXIT CODES:
  0 - Success
  1 - Provisioning failed
  2 - Configuration error
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Configuration file (defaults to ./provision.toml when present)
    #[arg(short, long, global = true, env = "PROV_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full provisioning workflow
    Provision(provision::ProvisionArgs),

    /// Check required commands and services without changing anything
    Preflight(preflight::PreflightArgs),

    /// Show the most recent run report
    Status(status::StatusArgs),
}

/// Load the configuration named on the command line, the default file, or
/// built-in defaults.
pub fn load_config(path: Option<&Path>) -> Result<ProvisionConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG_FILE);
            if !default.exists() {
                debug!("No {} found, using defaults", DEFAULT_CONFIG_FILE);
                return Ok(ProvisionConfig::default());
            }
            default
        }
    };

    info!("Loading configuration from {:?}", path);
    ProvisionConfig::load(&path).context("Failed to load configuration")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_explicit_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("shop.toml");
        std::fs::write(&path, "install_root = \"/srv/shop\"\n").unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.install_root, PathBuf::from("/srv/shop"));
    }

    #[test]
    fn test_missing_explicit_config_is_error() {
        let dir = TempDir::new().unwrap();
        let err = load_config(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(format!("{:#}", err).contains("absent.toml"));
    }

    #[test]
    fn test_cli_parses_global_flags() {
        let cli = Cli::try_parse_from([
            "prov",
            "provision",
            "--non-interactive",
            "--db-name",
            "shop_test",
            "-v",
        ])
        .unwrap();

        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Provision(_)));
    }
}
