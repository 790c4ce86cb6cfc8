//! Read-only prerequisite checks.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use prov_runner::CommandRunner;

use crate::config::ProvisionConfig;

/// Whether `name` resolves to a command. Never fails.
pub async fn command_exists(runner: &dyn CommandRunner, name: &str) -> bool {
    runner.command_exists(name).await
}

/// Whether the service manager reports `name` as active. Never fails.
pub async fn service_is_active(runner: &dyn CommandRunner, name: &str) -> bool {
    runner.service_is_active(name).await
}

/// Prerequisites the workflow needs before it changes anything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Preflight {
    pub commands: Vec<String>,
    pub services: Vec<String>,
}

/// What the preflight check found missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreflightReport {
    pub missing_commands: Vec<String>,
    pub inactive_services: Vec<String>,
}

impl PreflightReport {
    pub fn passed(&self) -> bool {
        self.missing_commands.is_empty() && self.inactive_services.is_empty()
    }

    /// One-line description of everything missing.
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if !self.missing_commands.is_empty() {
            parts.push(format!(
                "command(s) not found: {}",
                self.missing_commands.join(", ")
            ));
        }
        if !self.inactive_services.is_empty() {
            parts.push(format!(
                "service(s) not active: {}",
                self.inactive_services.join(", ")
            ));
        }
        parts.join("; ")
    }
}

impl Preflight {
    pub fn from_config(config: &ProvisionConfig) -> Self {
        Self {
            commands: config.required_commands.clone(),
            services: vec![config.database.service.clone()],
        }
    }

    /// Check every prerequisite. All are checked even after the first miss.
    pub async fn check(&self, runner: &dyn CommandRunner) -> PreflightReport {
        let mut report = PreflightReport::default();

        for name in &self.commands {
            if command_exists(runner, name).await {
                debug!("Found command: {}", name);
            } else {
                report.missing_commands.push(name.clone());
            }
        }

        for name in &self.services {
            if service_is_active(runner, name).await {
                debug!("Service active: {}", name);
            } else {
                report.inactive_services.push(name.clone());
            }
        }

        if report.passed() {
            info!(
                "Preflight passed ({} commands, {} services)",
                self.commands.len(),
                self.services.len()
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prov_runner::MockRunner;

    #[tokio::test]
    async fn test_all_present() {
        let runner = MockRunner::new();
        let preflight = Preflight::from_config(&ProvisionConfig::default());

        let report = preflight.check(&runner).await;
        assert!(report.passed());
        assert_eq!(runner.get_method_calls("command_exists").len(), 3);
        assert_eq!(runner.get_method_calls("service_is_active").len(), 1);
    }

    #[tokio::test]
    async fn test_reports_every_missing_prerequisite() {
        let runner = MockRunner::new()
            .missing_command("composer")
            .missing_command("mysql")
            .inactive_service("mysql");
        let preflight = Preflight::from_config(&ProvisionConfig::default());

        let report = preflight.check(&runner).await;
        assert!(!report.passed());
        assert_eq!(report.missing_commands, vec!["mysql", "composer"]);
        assert_eq!(report.inactive_services, vec!["mysql"]);
        assert_eq!(
            report.describe(),
            "command(s) not found: mysql, composer; service(s) not active: mysql"
        );
    }
}
