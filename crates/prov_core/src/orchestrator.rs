//! Stage runner.
//!
//! [`Provisioner`] walks a [`Workflow`] stage by stage, executing each
//! [`Action`] against the injected command runner and health probe. A stage
//! completes only when all of its actions succeed; the first failure in an
//! aborting stage moves the run to `Failed` and nothing after it runs.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Local, Utc};
use tracing::{debug, error, info, warn};

use prov_runner::{is_healthy, CommandOutput, CommandRunner, CommandSpec, HealthProbe};

use crate::config::ProvisionConfig;
use crate::context::ProvisionContext;
use crate::envfile::{create_backup, EnvFile};
use crate::error::{CoreError, CoreResult};
use crate::preflight::Preflight;
use crate::prompt::{collect, Prompter};
use crate::report::{ActionOutcome, ActionRecord, RunReport, StageOutcome, StageResult};
use crate::retry::{run_with_retry, RetryPolicy};
use crate::stage::{Action, Command, FailureMode, Stage, Workflow, WorkflowState};
use crate::validate::{Field, FieldRules};

/// What executing one action produced.
struct Attempt {
    attempts: u32,
    command: Option<String>,
    skipped: bool,
    result: CoreResult<()>,
}

impl Attempt {
    fn once(result: CoreResult<()>) -> Self {
        Self {
            attempts: 1,
            command: None,
            skipped: false,
            result,
        }
    }

    fn skipped() -> Self {
        Self {
            attempts: 0,
            command: None,
            skipped: true,
            result: Ok(()),
        }
    }

    fn with_command(mut self, command: String) -> Self {
        self.command = Some(command);
        self
    }
}

/// Run a command and turn a non-zero exit into [`CoreError::CommandFailed`].
async fn execute(runner: &dyn CommandRunner, spec: &CommandSpec) -> CoreResult<CommandOutput> {
    let output = runner.run(spec).await?;
    if output.success() {
        Ok(output)
    } else {
        Err(CoreError::CommandFailed {
            command: spec.display(),
            exit_code: output.exit_code,
            message: output.failure_summary(),
        })
    }
}

#[cfg(unix)]
fn set_file_mode(path: &Path, mode: u32) -> CoreResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| CoreError::filesystem(path, e))
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path, _mode: u32) -> CoreResult<()> {
    Ok(())
}

/// Executes provisioning workflows.
pub struct Provisioner {
    config: ProvisionConfig,
    rules: FieldRules,
    runner: Arc<dyn CommandRunner>,
    probe: Arc<dyn HealthProbe>,
    report_dir: Option<PathBuf>,
}

impl Provisioner {
    pub fn new(
        config: ProvisionConfig,
        runner: Arc<dyn CommandRunner>,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        let rules = config.field_rules();
        Self {
            config,
            rules,
            runner,
            probe,
            report_dir: None,
        }
    }

    /// Persist the run report to `dir` after every stage.
    pub fn with_report_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.report_dir = Some(dir.into());
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.runner.is_dry_run()
    }

    /// Run `workflow` to completion.
    ///
    /// Always returns a report; its state is `Done` or `Failed`.
    pub async fn run(
        &self,
        workflow: &Workflow,
        context: ProvisionContext,
        prompter: &mut dyn Prompter,
    ) -> RunReport {
        let first = workflow
            .stages
            .first()
            .map_or(WorkflowState::Done, |s| s.state);
        let mut report = RunReport::new(&workflow.id, &workflow.name, first, context);
        report.dry_run = self.is_dry_run();

        if let Err(e) = workflow.validate() {
            error!("{}", e);
            report.fail(first, &e);
            self.persist(&report);
            return report;
        }

        info!("Starting workflow: {} ({})", workflow.name, report.run_id);
        if report.dry_run {
            info!("[DRY-RUN] Commands are logged, not executed");
        }

        let total = workflow.stages.len();
        for (i, stage) in workflow.stages.iter().enumerate() {
            report.state = stage.state;
            info!("Stage [{}/{}]: {}", i + 1, total, stage.name());

            let (result, failure) = self.run_stage(stage, &mut report.context, prompter).await;
            report.warnings.extend(result.warnings.iter().cloned());
            report.stages.push(result);

            if let Some(err) = failure {
                error!("Stage '{}' failed: {}", stage.name(), err);
                report.fail(stage.state, &err);
                self.persist(&report);
                return report;
            }

            self.persist(&report);
            info!("Stage '{}' completed", stage.name());
        }

        report.finish();
        self.persist(&report);

        if report.warnings.is_empty() {
            info!("Workflow '{}' completed successfully", workflow.name);
        } else {
            warn!(
                "Workflow '{}' completed with {} warning(s)",
                workflow.name,
                report.warnings.len()
            );
        }
        report
    }

    fn persist(&self, report: &RunReport) {
        if let Some(dir) = &self.report_dir {
            if let Err(e) = report.save(dir) {
                warn!("Could not save run report: {}", e);
            }
        }
    }

    async fn run_stage(
        &self,
        stage: &Stage,
        ctx: &mut ProvisionContext,
        prompter: &mut dyn Prompter,
    ) -> (StageResult, Option<CoreError>) {
        let started_at = Utc::now();
        let mut actions = Vec::new();
        let mut warnings = Vec::new();

        for action in &stage.actions {
            let label = action.label();
            debug!("Action: {}", label);

            let policy = if action.is_retryable() {
                stage.retry
            } else {
                RetryPolicy::once()
            };
            let attempt = self.execute_action(action, policy, ctx, prompter).await;

            let outcome = match (&attempt.result, stage.on_failure) {
                (Ok(()), _) if attempt.skipped => ActionOutcome::Skipped,
                (Ok(()), _) => ActionOutcome::Succeeded,
                (Err(_), FailureMode::Abort) => ActionOutcome::Failed,
                (Err(_), FailureMode::Warn) => ActionOutcome::Warned,
            };
            let mut record = ActionRecord::new(&label, outcome, attempt.attempts);
            if let Some(command) = attempt.command {
                record = record.with_command(command);
            }

            let Err(err) = attempt.result else {
                actions.push(record);
                continue;
            };
            actions.push(record.with_message(err.to_string()));

            match stage.on_failure {
                FailureMode::Abort => {
                    let result = StageResult {
                        stage: stage.state,
                        outcome: StageOutcome::Failed,
                        actions,
                        message: Some(err.to_string()),
                        warnings,
                        started_at,
                        completed_at: Utc::now(),
                    };
                    return (result, Some(err));
                }
                FailureMode::Warn => {
                    let warning = match err {
                        CoreError::HealthCheck(message) => CoreError::HealthCheck(message),
                        other => CoreError::HealthCheck(format!("{}: {}", label, other)),
                    };
                    warn!("⚠️  {}", warning);
                    warnings.push(warning.to_string());
                }
            }
        }

        let outcome = if warnings.is_empty() {
            StageOutcome::Succeeded
        } else {
            StageOutcome::Warned
        };
        let result = StageResult {
            stage: stage.state,
            outcome,
            actions,
            message: None,
            warnings,
            started_at,
            completed_at: Utc::now(),
        };
        (result, None)
    }

    async fn execute_action(
        &self,
        action: &Action,
        policy: RetryPolicy,
        ctx: &mut ProvisionContext,
        prompter: &mut dyn Prompter,
    ) -> Attempt {
        let dry_run = self.is_dry_run();
        match action {
            Action::CheckPrerequisites => Attempt::once(self.check_prerequisites().await),
            Action::Collect(field) => Attempt::once(self.collect_field(*field, ctx, prompter)),
            Action::Run(command) => self.run_command(command, policy, ctx).await,
            Action::VerifyDatabase if dry_run => {
                info!("[DRY-RUN] Would verify that the database exists");
                Attempt::skipped()
            }
            Action::VerifyDatabase => self.verify_database(policy, ctx).await,
            Action::RequireInstallRoot => Attempt::once(Self::require_install_root(ctx)),
            Action::BackupEnvFile | Action::InstallEnvTemplate | Action::RewriteEnvFile
                if dry_run =>
            {
                info!("[DRY-RUN] Would {}", action.label());
                Attempt::skipped()
            }
            Action::BackupEnvFile => Attempt::once(Self::backup_env_file(ctx)),
            Action::InstallEnvTemplate => Attempt::once(self.install_env_template(ctx)),
            Action::RewriteEnvFile => Attempt::once(self.rewrite_env_file(ctx)),
            Action::SetOwnership(dir) => {
                let path = ctx.install_root.join(dir);
                let spec = CommandSpec::new("chown")
                    .args(["-R", self.config.owner().as_str()])
                    .arg(path.to_string_lossy());
                self.change_permissions(spec, &path).await
            }
            Action::SetMode(dir) => {
                let path = ctx.install_root.join(dir);
                let spec = CommandSpec::new("chmod")
                    .args(["-R", self.config.writable_mode.as_str()])
                    .arg(path.to_string_lossy());
                self.change_permissions(spec, &path).await
            }
            Action::ProbeHealthEndpoint if dry_run => {
                info!("[DRY-RUN] Would probe the health endpoint");
                Attempt::skipped()
            }
            Action::ProbeHealthEndpoint => Attempt::once(self.probe_health(ctx).await),
        }
    }

    async fn check_prerequisites(&self) -> CoreResult<()> {
        let report = Preflight::from_config(&self.config)
            .check(self.runner.as_ref())
            .await;
        if report.passed() {
            Ok(())
        } else {
            Err(CoreError::PrerequisiteMissing(report.describe()))
        }
    }

    fn collect_field(
        &self,
        field: Field,
        ctx: &mut ProvisionContext,
        prompter: &mut dyn Prompter,
    ) -> CoreResult<()> {
        let value = collect(prompter, field, &self.rules, self.config.prompt_attempts)?;
        if field.is_secret() {
            debug!("Collected {}", field);
        } else {
            info!("Using {}: {}", field, value);
        }
        ctx.set(field, value)
    }

    async fn run_command(
        &self,
        command: &Command,
        policy: RetryPolicy,
        ctx: &ProvisionContext,
    ) -> Attempt {
        let spec = match command.render(ctx, &self.config) {
            Ok(spec) => spec,
            Err(e) => return Attempt::once(Err(e)),
        };
        let shown = spec.display();
        info!("Running: {}", shown);

        let runner = self.runner.as_ref();
        let spec = &spec;
        let retried = run_with_retry(policy, move |attempt| async move {
            debug!("Attempt {}: {}", attempt, spec.display());
            execute(runner, spec).await.map(|_| ())
        })
        .await;

        Attempt {
            attempts: retried.attempts,
            command: Some(shown),
            skipped: false,
            result: retried.result,
        }
    }

    async fn verify_database(&self, policy: RetryPolicy, ctx: &ProvisionContext) -> Attempt {
        let name = match ctx.database_name() {
            Ok(name) => name,
            Err(e) => return Attempt::once(Err(e)),
        };
        let spec = match Command::ListDatabases.render(ctx, &self.config) {
            Ok(spec) => spec,
            Err(e) => return Attempt::once(Err(e)),
        };
        let shown = spec.display();

        let runner = self.runner.as_ref();
        let spec = &spec;
        let retried = run_with_retry(policy, move |_| async move {
            execute(runner, spec).await.and_then(|output| {
                if output.stdout.lines().any(|line| line.trim() == name) {
                    Ok(())
                } else {
                    Err(CoreError::Verification(format!(
                        "database '{}' not found after creation",
                        name
                    )))
                }
            })
        })
        .await;

        if retried.result.is_ok() {
            info!("Verified database '{}' exists", name);
        }
        Attempt {
            attempts: retried.attempts,
            command: Some(shown),
            skipped: false,
            result: retried.result,
        }
    }

    fn require_install_root(ctx: &ProvisionContext) -> CoreResult<()> {
        if ctx.install_root.is_dir() {
            Ok(())
        } else {
            Err(CoreError::filesystem(
                &ctx.install_root,
                "install directory does not exist",
            ))
        }
    }

    fn backup_env_file(ctx: &mut ProvisionContext) -> CoreResult<()> {
        let env = ctx.env_file.clone();
        if !env.exists() {
            debug!("No existing env file at {:?}", env);
            return Ok(());
        }

        let backup = create_backup(&env, Local::now())?;
        fs::remove_file(&env).map_err(|e| CoreError::filesystem(&env, e))?;

        info!("Backed up {:?} to {:?}", env, backup);
        ctx.env_backup = Some(backup);
        Ok(())
    }

    fn install_env_template(&self, ctx: &ProvisionContext) -> CoreResult<()> {
        fs::copy(&ctx.env_template, &ctx.env_file)
            .map_err(|e| CoreError::filesystem(&ctx.env_template, e))?;
        set_file_mode(&ctx.env_file, self.config.env_file_mode)?;
        info!("Installed {:?} from template", ctx.env_file);
        Ok(())
    }

    fn rewrite_env_file(&self, ctx: &ProvisionContext) -> CoreResult<()> {
        let url = format!("{}://{}", self.config.health.scheme, ctx.domain()?);
        let values = [
            ("APP_URL", url.as_str()),
            ("DB_HOST", self.config.database.host.as_str()),
            ("DB_DATABASE", ctx.database_name()?),
            ("DB_USERNAME", ctx.database_user()?),
            ("DB_PASSWORD", ctx.database_password()?),
        ];

        let mut env = EnvFile::read(&ctx.env_file)?;
        for (key, value) in values {
            if !env.set(key, value) {
                debug!("{} not in template, appended", key);
            }
        }
        env.write(&ctx.env_file)?;

        info!("Configured {:?}", ctx.env_file);
        Ok(())
    }

    /// Run a `chown`/`chmod` once; failures are filesystem errors.
    async fn change_permissions(&self, spec: CommandSpec, path: &Path) -> Attempt {
        let shown = spec.display();
        info!("Running: {}", shown);
        let result = execute(self.runner.as_ref(), &spec)
            .await
            .map(|_| ())
            .map_err(|e| match e {
                CoreError::CommandFailed { message, .. } => CoreError::filesystem(path, message),
                other => CoreError::filesystem(path, other),
            });
        Attempt::once(result).with_command(shown)
    }

    async fn probe_health(&self, ctx: &ProvisionContext) -> CoreResult<()> {
        let url = self.config.health.url(ctx.domain()?);
        info!("Probing {}", url);
        match self.probe.status(&url).await {
            Ok(status) if is_healthy(status) => {
                info!("Health endpoint returned HTTP {}", status);
                Ok(())
            }
            Ok(status) => Err(CoreError::HealthCheck(format!(
                "{} returned HTTP {}",
                url, status
            ))),
            Err(e) => Err(CoreError::HealthCheck(format!("{} unreachable: {}", url, e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::ScriptedPrompter;
    use crate::stage::Workflows;
    use prov_runner::{MockProbe, MockRunner, MockResponse};
    use std::time::Duration;

    fn fast_config() -> ProvisionConfig {
        let mut config = ProvisionConfig::default();
        config.retry.delay_ms = 1;
        config.install_retry.delay_ms = 1;
        config
    }

    fn provisioner(config: ProvisionConfig, runner: &MockRunner) -> Provisioner {
        Provisioner::new(config, Arc::new(runner.clone()), Arc::new(MockProbe::new()))
    }

    #[tokio::test]
    async fn test_invalid_workflow_fails_before_running() {
        let runner = MockRunner::new();
        let config = fast_config();
        let workflow = Workflow::new("bad", "Bad")
            .stage(Stage::new(WorkflowState::HealthCheck))
            .stage(Stage::new(WorkflowState::Preflight).action(Action::CheckPrerequisites));

        let report = provisioner(config.clone(), &runner)
            .run(&workflow, ProvisionContext::new(&config), &mut ScriptedPrompter::new())
            .await;

        assert_eq!(report.state, WorkflowState::Failed);
        assert_eq!(report.error_kind.as_deref(), Some("WorkflowError"));
        assert_eq!(runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_prerequisite_stops_at_preflight() {
        let runner = MockRunner::new().missing_command("composer");
        let config = fast_config();
        let mut prompter = ScriptedPrompter::new().answer(Field::DatabaseName, "shop_test");

        let report = provisioner(config.clone(), &runner)
            .run(
                &Workflows::provision(&config),
                ProvisionContext::new(&config),
                &mut prompter,
            )
            .await;

        assert_eq!(report.failed_stage, Some(WorkflowState::Preflight));
        assert_eq!(report.error_kind.as_deref(), Some("PrerequisiteMissing"));
        assert_eq!(report.stages.len(), 1);
        assert!(!runner.was_called("run"));
        assert_eq!(prompter.remaining(Field::DatabaseName), 1);
    }

    #[tokio::test]
    async fn test_retryable_command_records_attempts() {
        let runner = MockRunner::new().respond(
            "FLUSH PRIVILEGES",
            vec![
                MockResponse::failure(1, "ERROR 2002 (HY000): Can't connect"),
                MockResponse::success(""),
            ],
        );
        let config = fast_config();
        let mut ctx = ProvisionContext::new(&config);
        ctx.set(Field::DatabaseName, "shop_test").unwrap();

        let stage = Stage::new(WorkflowState::DatabaseSetup)
            .retry(RetryPolicy::new(3, Duration::from_millis(1)))
            .action(Action::Run(Command::FlushPrivileges));
        let workflow = Workflow::new("flush", "Flush").stage(stage);

        let report = provisioner(config, &runner)
            .run(&workflow, ctx, &mut ScriptedPrompter::new())
            .await;

        assert!(report.is_success());
        let action = &report.stages[0].actions[0];
        assert_eq!(action.attempts, 2);
        assert_eq!(action.outcome, ActionOutcome::Succeeded);
        assert_eq!(runner.count_matching("FLUSH PRIVILEGES"), 2);
    }

    #[tokio::test]
    async fn test_permission_failure_is_filesystem_error_without_retry() {
        let runner = MockRunner::new().respond(
            "chown",
            vec![MockResponse::failure(1, "chown: invalid user: 'www-data:www-data'")],
        );
        let config = fast_config();
        let stage = Stage::new(WorkflowState::PermissionSetup)
            .retry(RetryPolicy::new(3, Duration::from_millis(1)))
            .action(Action::SetOwnership(PathBuf::from("storage")));
        let workflow = Workflow::new("perms", "Permissions").stage(stage);

        let report = provisioner(config.clone(), &runner)
            .run(&workflow, ProvisionContext::new(&config), &mut ScriptedPrompter::new())
            .await;

        assert_eq!(report.failed_stage, Some(WorkflowState::PermissionSetup));
        assert_eq!(report.error_kind.as_deref(), Some("FilesystemError"));
        assert_eq!(runner.count_matching("chown"), 1);
        assert!(report.error.unwrap().contains("invalid user"));
    }

    #[tokio::test]
    async fn test_dry_run_skips_local_changes() {
        let runner = MockRunner::new().dry_run();
        let config = fast_config();
        let workflow = Workflow::new("env", "Env").stage(
            Stage::new(WorkflowState::ProjectSetup)
                .action(Action::BackupEnvFile)
                .action(Action::InstallEnvTemplate),
        );

        let report = provisioner(config.clone(), &runner)
            .run(&workflow, ProvisionContext::new(&config), &mut ScriptedPrompter::new())
            .await;

        assert!(report.is_success());
        assert!(report.dry_run);
        assert!(report.stages[0]
            .actions
            .iter()
            .all(|a| a.outcome == ActionOutcome::Skipped));
    }
}
