//! Host process runner.
//!
//! Runs commands directly on the host with `tokio::process`, resolves
//! command names against `PATH`, and asks the service manager for service
//! state.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tracing::{debug, info};

use crate::command::CommandSpec;
use crate::error::{RunnerError, RunnerResult};
use crate::runner::{CommandOutput, CommandRunner};

/// Process runner options.
#[derive(Debug, Clone)]
pub struct ProcessRunnerOptions {
    /// Dry-run mode (log commands without executing)
    pub dry_run: bool,
    /// Service manager used for status queries
    pub service_manager: String,
    /// Search path override (defaults to `$PATH`)
    pub search_path: Option<OsString>,
}

impl Default for ProcessRunnerOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            service_manager: "systemctl".to_string(),
            search_path: None,
        }
    }
}

impl ProcessRunnerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }

    pub fn service_manager(mut self, program: impl Into<String>) -> Self {
        self.service_manager = program.into();
        self
    }

    pub fn search_path(mut self, path: impl Into<OsString>) -> Self {
        self.search_path = Some(path.into());
        self
    }
}

/// Runner that executes commands on the host.
pub struct ProcessRunner {
    options: ProcessRunnerOptions,
}

impl ProcessRunner {
    pub fn new(options: ProcessRunnerOptions) -> Self {
        Self { options }
    }

    /// Resolve a command name to an executable path without running it.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        if name.is_empty() {
            return None;
        }
        if name.contains('/') {
            let path = PathBuf::from(name);
            return is_executable(&path).then_some(path);
        }

        let search = self
            .options
            .search_path
            .clone()
            .or_else(|| std::env::var_os("PATH"))?;

        std::env::split_paths(&search)
            .map(|dir| dir.join(name))
            .find(|candidate| is_executable(candidate))
    }

    fn dry_run_output(spec: &CommandSpec) -> CommandOutput {
        info!("[DRY-RUN] Would execute: {}", spec.display());
        let now = Utc::now();
        CommandOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            started_at: now,
            finished_at: now,
            duration_ms: 0,
        }
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> RunnerResult<CommandOutput> {
        if self.options.dry_run {
            return Ok(Self::dry_run_output(spec));
        }

        debug!("Executing: {}", spec.display());

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }

        let started_at = Utc::now();
        let output = cmd.output().await.map_err(|e| RunnerError::SpawnFailed {
            program: spec.program.clone(),
            message: e.to_string(),
        })?;
        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0) as u64;

        let exit_code = output.status.code().unwrap_or(-1);
        debug!("{} exited with {} after {}ms", spec.program, exit_code, duration_ms);

        Ok(CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            started_at,
            finished_at,
            duration_ms,
        })
    }

    async fn command_exists(&self, name: &str) -> bool {
        let found = self.resolve(name);
        debug!("Resolved {} -> {:?}", name, found);
        found.is_some()
    }

    async fn service_is_active(&self, name: &str) -> bool {
        Command::new(&self.options.service_manager)
            .args(["is-active", "--quiet", name])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn is_dry_run(&self) -> bool {
        self.options.dry_run
    }
}
