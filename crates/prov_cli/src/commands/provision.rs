//! Provision command - Run the full provisioning workflow.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use prov_core::{
    Field, ProvisionConfig, ProvisionContext, Provisioner, RunReport, ScriptedPrompter,
    StdioPrompter, Workflows,
};
use prov_runner::{HttpProbe, ProcessRunner, ProcessRunnerOptions};

use super::{load_config, Cli};
use crate::ExitCodes;

#[derive(Args)]
pub struct ProvisionArgs {
    /// Database name
    #[arg(long)]
    pub db_name: Option<String>,

    /// Database character set (empty selects the default)
    #[arg(long)]
    pub charset: Option<String>,

    /// Database username
    #[arg(long)]
    pub db_user: Option<String>,

    /// Database password
    #[arg(long, env = "PROV_DB_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,

    /// Domain the storefront is served on
    #[arg(long)]
    pub domain: Option<String>,

    /// Application directory to configure
    #[arg(long)]
    pub install_root: Option<PathBuf>,

    /// Password of the database admin account
    #[arg(long, env = "PROV_DB_ADMIN_PASSWORD", hide_env_values = true)]
    pub db_admin_password: Option<String>,

    /// Never prompt; missing or invalid values fail the run
    #[arg(long)]
    pub non_interactive: bool,

    /// Log commands without executing them or changing local files
    #[arg(long)]
    pub dry_run: bool,
}

impl ProvisionArgs {
    /// Layer flag values over the loaded configuration.
    pub fn apply(&self, config: &mut ProvisionConfig) {
        let answers = [
            (Field::DatabaseName, &self.db_name),
            (Field::Charset, &self.charset),
            (Field::DatabaseUser, &self.db_user),
            (Field::DatabasePassword, &self.db_password),
            (Field::Domain, &self.domain),
        ];
        for (field, value) in answers {
            if let Some(value) = value {
                config.answers.set(field, value.as_str());
            }
        }
        if let Some(root) = &self.install_root {
            config.install_root = root.clone();
        }
        if let Some(password) = &self.db_admin_password {
            config.database.admin_password = Some(password.clone());
        }
        if self.non_interactive {
            config.prompt_attempts = Some(1);
        }
    }

    /// Preset answers first, then stdin unless running non-interactively.
    pub fn prompter(&self, config: &ProvisionConfig) -> ScriptedPrompter {
        let mut prompter = config
            .answers
            .iter()
            .fold(ScriptedPrompter::new(), |p, (field, value)| p.answer(field, value));
        if !self.non_interactive {
            prompter = prompter.with_fallback(Box::new(StdioPrompter));
        }
        prompter
    }
}

pub async fn execute(args: &ProvisionArgs, cli: &Cli) -> Result<u8> {
    let mut config = load_config(cli.config.as_deref())?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    println!("🚀 Provisioning storefront backend");
    println!("   Install path: {}", config.install_root.display());
    if args.dry_run {
        println!("   Mode:         dry run (no commands executed, no files changed)");
    }
    println!();

    let runner = ProcessRunner::new(ProcessRunnerOptions::new().dry_run(args.dry_run));
    let probe = HttpProbe::new(config.health_timeout()).context("Failed to create HTTP client")?;
    let provisioner = Provisioner::new(config.clone(), Arc::new(runner), Arc::new(probe))
        .with_report_dir(&config.report_dir);

    let mut prompter = args.prompter(&config);
    let report = provisioner
        .run(
            &Workflows::provision(&config),
            ProvisionContext::new(&config),
            &mut prompter,
        )
        .await;

    info!("Run report: {:?}", report.report_path(&config.report_dir));
    if report.is_success() {
        print_success(&report, &config);
        Ok(ExitCodes::SUCCESS)
    } else {
        print_failure(&report, &config);
        Ok(ExitCodes::PROVISION_FAILED)
    }
}

fn print_success(report: &RunReport, config: &ProvisionConfig) {
    let ctx = &report.context;
    let value = |field: Field| ctx.get(field).unwrap_or("-").to_string();

    println!();
    println!("✅ Provisioning complete");
    println!();
    println!("  Database:     {} ({})", value(Field::DatabaseName), value(Field::Charset));
    println!("  Username:     {}", value(Field::DatabaseUser));
    println!("  Domain:       {}", value(Field::Domain));
    println!("  Install path: {}", ctx.install_root.display());
    if let Some(backup) = &ctx.env_backup {
        println!("  Env backup:   {}", backup.display());
    }

    if !report.warnings.is_empty() {
        println!();
        for warning in &report.warnings {
            println!("⚠️  {}", warning);
        }
    }

    let domain = value(Field::Domain);
    println!();
    println!("Next steps:");
    println!(
        "  1. Point the web server document root at {}",
        ctx.install_root.join("public").display()
    );
    println!("  2. Make sure a TLS certificate is installed for {}", domain);
    println!("  3. Start the queue worker and add the scheduler to cron");
    println!("  4. Open {}://{}", config.health.scheme, domain);
}

fn print_failure(report: &RunReport, config: &ProvisionConfig) {
    let stage = report
        .failed_stage
        .map(|s| s.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    eprintln!();
    eprintln!("❌ Provisioning failed during: {}", stage);
    eprintln!(
        "   {}: {}",
        report.error_kind.as_deref().unwrap_or("Error"),
        report.error.as_deref().unwrap_or("unknown error")
    );
    eprintln!();
    eprintln!("Troubleshooting:");
    eprintln!(
        "  • Check that the database service is running: systemctl status {}",
        config.database.service
    );
    eprintln!(
        "  • Check the database admin account ({}) and its password",
        config.database.admin_user
    );
    eprintln!(
        "  • Check that {} exists and is readable",
        config.install_root.display()
    );
    eprintln!("  • Re-run with --verbose to see every command");
    eprintln!(
        "  • Run report: {}",
        report.report_path(&config.report_dir).display()
    );
}
