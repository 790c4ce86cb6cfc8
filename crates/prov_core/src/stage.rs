//! Declarative stage and workflow definitions.
//!
//! A [`Workflow`] is an ordered list of [`Stage`]s, each an ordered list of
//! [`Action`]s plus a retry policy. Nothing here executes anything; the
//! [`crate::Provisioner`] interprets these descriptors.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use prov_runner::CommandSpec;

use crate::config::ProvisionConfig;
use crate::context::ProvisionContext;
use crate::error::{CoreError, CoreResult};
use crate::retry::RetryPolicy;
use crate::validate::{validate_identifier, Field};

/// Workflow states, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    Preflight,
    DatabaseSetup,
    ProjectSetup,
    DependencyInstall,
    ApplicationBootstrap,
    PermissionSetup,
    HealthCheck,
    Done,
    Failed,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preflight => "Preflight",
            Self::DatabaseSetup => "Database Setup",
            Self::ProjectSetup => "Project Setup",
            Self::DependencyInstall => "Dependency Installation",
            Self::ApplicationBootstrap => "Application Bootstrap",
            Self::PermissionSetup => "Permission Setup",
            Self::HealthCheck => "Health Check",
            Self::Done => "Done",
            Self::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a failed action does to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Stop the workflow in `Failed`.
    Abort,
    /// Record a warning and carry on.
    Warn,
}

/// External commands the workflow runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    CreateDatabase,
    CreateUser { host: String },
    GrantPrivileges { host: String },
    FlushPrivileges,
    ListDatabases,
    ComposerInstall,
    GenerateKey,
    RunInstaller,
    StorageLink,
    Migrate,
    ConfigCache,
    RouteCache,
    ViewCache,
    DatabaseIntrospection,
}

/// Escape a string for use inside a single-quoted SQL literal.
pub fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

/// Quote an SQL identifier with backticks.
pub fn sql_identifier(value: &str) -> String {
    format!("`{}`", value.replace('`', "``"))
}

/// Default collation for a character set, if it has a unicode one.
pub fn collation_for(charset: &str) -> Option<String> {
    charset
        .starts_with("utf8")
        .then(|| format!("{}_unicode_ci", charset))
}

impl Command {
    pub fn label(&self) -> String {
        match self {
            Self::CreateDatabase => "create database".to_string(),
            Self::CreateUser { host } => format!("create user @{}", host),
            Self::GrantPrivileges { host } => format!("grant privileges @{}", host),
            Self::FlushPrivileges => "flush privileges".to_string(),
            Self::ListDatabases => "list databases".to_string(),
            Self::ComposerInstall => "composer install".to_string(),
            Self::GenerateKey => "generate application key".to_string(),
            Self::RunInstaller => "run installer".to_string(),
            Self::StorageLink => "link storage".to_string(),
            Self::Migrate => "run migrations".to_string(),
            Self::ConfigCache => "cache config".to_string(),
            Self::RouteCache => "cache routes".to_string(),
            Self::ViewCache => "cache views".to_string(),
            Self::DatabaseIntrospection => "check database connection".to_string(),
        }
    }

    fn sql_client(config: &ProvisionConfig, extra: &[&str], sql: String) -> CommandSpec {
        let db = &config.database;
        let mut spec = CommandSpec::new(&db.client)
            .args(["-u", db.admin_user.as_str()])
            .args(extra.iter().copied())
            .arg("-e")
            .arg(sql);
        if let Some(password) = &db.admin_password {
            spec = spec.env("MYSQL_PWD", password.as_str());
        }
        spec
    }

    fn artisan(config: &ProvisionConfig, ctx: &ProvisionContext, args: &[&str]) -> CommandSpec {
        CommandSpec::new(&config.php)
            .arg("artisan")
            .args(args.iter().copied())
            .cwd(&ctx.install_root)
    }

    /// Build the argument vector for this command.
    ///
    /// Fails with [`CoreError::MissingContext`] when a value it needs has not
    /// been collected yet.
    pub fn render(&self, ctx: &ProvisionContext, config: &ProvisionConfig) -> CoreResult<CommandSpec> {
        let spec = match self {
            Self::CreateDatabase => {
                let name = validate_identifier(ctx.database_name()?)?;
                let charset = validate_identifier(ctx.charset()?)?;
                let mut sql = format!(
                    "CREATE DATABASE IF NOT EXISTS {} CHARACTER SET {}",
                    sql_identifier(&name),
                    charset
                );
                if let Some(collation) = collation_for(&charset) {
                    sql.push_str(&format!(" COLLATE {}", collation));
                }
                sql.push(';');
                Self::sql_client(config, &[], sql)
            }
            Self::CreateUser { host } => {
                let user = ctx.database_user()?;
                let password = ctx.database_password()?;
                let sql = format!(
                    "CREATE USER IF NOT EXISTS {}@{} IDENTIFIED BY {};",
                    sql_literal(user),
                    sql_literal(host),
                    sql_literal(password)
                );
                Self::sql_client(config, &[], sql)
                    .secret(sql_literal(password))
                    .secret(password)
            }
            Self::GrantPrivileges { host } => {
                let name = validate_identifier(ctx.database_name()?)?;
                let user = ctx.database_user()?;
                let sql = format!(
                    "GRANT ALL PRIVILEGES ON {}.* TO {}@{};",
                    sql_identifier(&name),
                    sql_literal(user),
                    sql_literal(host)
                );
                Self::sql_client(config, &[], sql)
            }
            Self::FlushPrivileges => {
                Self::sql_client(config, &[], "FLUSH PRIVILEGES;".to_string())
            }
            Self::ListDatabases => {
                Self::sql_client(config, &["-N", "-B"], "SHOW DATABASES;".to_string())
            }
            Self::ComposerInstall => CommandSpec::new(&config.composer)
                .args([
                    "install",
                    "--no-dev",
                    "--optimize-autoloader",
                    "--no-interaction",
                ])
                .cwd(&ctx.install_root)
                .env("COMPOSER_ALLOW_SUPERUSER", "1"),
            Self::GenerateKey => Self::artisan(config, ctx, &["key:generate", "--force"]),
            Self::RunInstaller => CommandSpec::from_argv(&config.installer)
                .ok_or_else(|| CoreError::Config("installer command is empty".to_string()))?
                .cwd(&ctx.install_root),
            Self::StorageLink => Self::artisan(config, ctx, &["storage:link"]),
            Self::Migrate => Self::artisan(config, ctx, &["migrate", "--force"]),
            Self::ConfigCache => Self::artisan(config, ctx, &["config:cache"]),
            Self::RouteCache => Self::artisan(config, ctx, &["route:cache"]),
            Self::ViewCache => Self::artisan(config, ctx, &["view:cache"]),
            Self::DatabaseIntrospection => Self::artisan(
                config,
                ctx,
                &["tinker", "--execute=DB::connection()->getPdo(); echo 'ok';"],
            ),
        };
        Ok(spec)
    }
}

/// A single step inside a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Check required commands and services.
    CheckPrerequisites,
    /// Prompt for and validate a field.
    Collect(Field),
    /// Run an external command under the stage retry policy.
    Run(Command),
    /// List databases and require the collected name to be present.
    VerifyDatabase,
    /// Require the install root to exist.
    RequireInstallRoot,
    /// Copy an existing env file to a timestamped backup, then remove it.
    BackupEnvFile,
    /// Copy the env template into place and set its mode.
    InstallEnvTemplate,
    /// Rewrite URL, host, database name, username and password.
    RewriteEnvFile,
    /// `chown -R` a directory (relative to the install root).
    SetOwnership(PathBuf),
    /// `chmod -R` a directory (relative to the install root).
    SetMode(PathBuf),
    /// GET the health endpoint.
    ProbeHealthEndpoint,
}

impl Action {
    pub fn label(&self) -> String {
        match self {
            Self::CheckPrerequisites => "check prerequisites".to_string(),
            Self::Collect(field) => format!("collect {}", field),
            Self::Run(command) => command.label(),
            Self::VerifyDatabase => "verify database".to_string(),
            Self::RequireInstallRoot => "require install directory".to_string(),
            Self::BackupEnvFile => "back up env file".to_string(),
            Self::InstallEnvTemplate => "install env template".to_string(),
            Self::RewriteEnvFile => "rewrite env file".to_string(),
            Self::SetOwnership(dir) => format!("set ownership of {}", dir.display()),
            Self::SetMode(dir) => format!("set mode of {}", dir.display()),
            Self::ProbeHealthEndpoint => "probe health endpoint".to_string(),
        }
    }

    /// External commands are retried; local checks and filesystem changes are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Run(_) | Self::VerifyDatabase)
    }

    /// Fields this action reads from the context.
    pub fn requires(&self) -> &'static [Field] {
        match self {
            Self::Run(Command::CreateDatabase) => &[Field::DatabaseName, Field::Charset],
            Self::Run(Command::CreateUser { .. }) => &[Field::DatabaseUser, Field::DatabasePassword],
            Self::Run(Command::GrantPrivileges { .. }) => {
                &[Field::DatabaseName, Field::DatabaseUser]
            }
            Self::VerifyDatabase => &[Field::DatabaseName],
            Self::RewriteEnvFile => &[
                Field::Domain,
                Field::DatabaseName,
                Field::DatabaseUser,
                Field::DatabasePassword,
            ],
            Self::ProbeHealthEndpoint => &[Field::Domain],
            _ => &[],
        }
    }
}

/// A named group of actions that succeeds or fails as a unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub state: WorkflowState,
    pub actions: Vec<Action>,
    #[serde(skip)]
    pub retry: RetryPolicy,
    pub on_failure: FailureMode,
}

impl Stage {
    pub fn new(state: WorkflowState) -> Self {
        Self {
            state,
            actions: Vec::new(),
            retry: RetryPolicy::default(),
            on_failure: FailureMode::Abort,
        }
    }

    pub fn name(&self) -> &'static str {
        self.state.as_str()
    }

    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    pub fn actions(mut self, actions: impl IntoIterator<Item = Action>) -> Self {
        self.actions.extend(actions);
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn on_failure(mut self, mode: FailureMode) -> Self {
        self.on_failure = mode;
        self
    }
}

/// An ordered list of stages.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub stages: Vec<Stage>,
}

impl Workflow {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            stages: Vec::new(),
        }
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Check the structural invariants.
    ///
    /// Stage states must be non-terminal and strictly increasing, and every
    /// field an action reads must be collected by an earlier action.
    pub fn validate(&self) -> CoreResult<()> {
        let mut previous: Option<WorkflowState> = None;
        let mut collected: Vec<Field> = Vec::new();

        for stage in &self.stages {
            if stage.state.is_terminal() {
                return Err(CoreError::InvalidWorkflow(format!(
                    "'{}' cannot be used as a stage",
                    stage.state
                )));
            }
            if let Some(prev) = previous {
                if stage.state <= prev {
                    return Err(CoreError::InvalidWorkflow(format!(
                        "stage '{}' declared after '{}'",
                        stage.state, prev
                    )));
                }
            }
            previous = Some(stage.state);

            for action in &stage.actions {
                if let Some(missing) = action.requires().iter().find(|f| !collected.contains(*f)) {
                    return Err(CoreError::InvalidWorkflow(format!(
                        "'{}' in '{}' needs {} before it is collected",
                        action.label(),
                        stage.state,
                        missing
                    )));
                }
                if let Action::Collect(field) = action {
                    collected.push(*field);
                }
            }
        }
        Ok(())
    }
}

/// Predefined workflows.
pub struct Workflows;

impl Workflows {
    /// Full provisioning:
    /// preflight → database → project → dependencies → bootstrap → permissions → health
    pub fn provision(config: &ProvisionConfig) -> Workflow {
        let retry = config.retry.policy();

        let mut permissions = Stage::new(WorkflowState::PermissionSetup).retry(RetryPolicy::once());
        for dir in &config.writable_dirs {
            permissions = permissions
                .action(Action::SetOwnership(dir.clone()))
                .action(Action::SetMode(dir.clone()));
        }

        Workflow::new("provision", "Provision Environment")
            .stage(Self::preflight_stage())
            .stage(
                Stage::new(WorkflowState::DatabaseSetup)
                    .retry(retry)
                    .actions([
                        Action::Collect(Field::DatabaseName),
                        Action::Collect(Field::Charset),
                        Action::Collect(Field::DatabaseUser),
                        Action::Collect(Field::DatabasePassword),
                        Action::Run(Command::CreateDatabase),
                        Action::Run(Command::CreateUser {
                            host: "localhost".to_string(),
                        }),
                        Action::Run(Command::CreateUser {
                            host: "%".to_string(),
                        }),
                        Action::Run(Command::GrantPrivileges {
                            host: "localhost".to_string(),
                        }),
                        Action::Run(Command::GrantPrivileges {
                            host: "%".to_string(),
                        }),
                        Action::Run(Command::FlushPrivileges),
                        Action::VerifyDatabase,
                    ]),
            )
            .stage(
                Stage::new(WorkflowState::ProjectSetup)
                    .retry(RetryPolicy::once())
                    .actions([
                        Action::Collect(Field::Domain),
                        Action::RequireInstallRoot,
                        Action::BackupEnvFile,
                        Action::InstallEnvTemplate,
                        Action::RewriteEnvFile,
                    ]),
            )
            .stage(
                Stage::new(WorkflowState::DependencyInstall)
                    .retry(config.install_retry.policy())
                    .action(Action::Run(Command::ComposerInstall)),
            )
            .stage(
                Stage::new(WorkflowState::ApplicationBootstrap)
                    .retry(retry)
                    .actions([
                        Action::Run(Command::GenerateKey),
                        Action::Run(Command::RunInstaller),
                        Action::Run(Command::StorageLink),
                        Action::Run(Command::Migrate),
                        Action::Run(Command::ConfigCache),
                        Action::Run(Command::RouteCache),
                        Action::Run(Command::ViewCache),
                    ]),
            )
            .stage(permissions)
            .stage(
                Stage::new(WorkflowState::HealthCheck)
                    .retry(retry)
                    .on_failure(FailureMode::Warn)
                    .actions([
                        Action::Run(Command::DatabaseIntrospection),
                        Action::ProbeHealthEndpoint,
                    ]),
            )
    }

    fn preflight_stage() -> Stage {
        Stage::new(WorkflowState::Preflight)
            .retry(RetryPolicy::once())
            .action(Action::CheckPrerequisites)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_context(config: &ProvisionConfig) -> ProvisionContext {
        let mut ctx = ProvisionContext::new(config);
        ctx.set(Field::DatabaseName, "shop_test").unwrap();
        ctx.set(Field::Charset, "utf8mb4").unwrap();
        ctx.set(Field::DatabaseUser, "o'brien").unwrap();
        ctx.set(Field::DatabasePassword, "pa'ss\\word").unwrap();
        ctx.set(Field::Domain, "shop.example.com").unwrap();
        ctx
    }

    #[test]
    fn test_provision_workflow_order() {
        let workflow = Workflows::provision(&ProvisionConfig::default());
        let states: Vec<_> = workflow.stages.iter().map(|s| s.state).collect();

        assert_eq!(
            states,
            vec![
                WorkflowState::Preflight,
                WorkflowState::DatabaseSetup,
                WorkflowState::ProjectSetup,
                WorkflowState::DependencyInstall,
                WorkflowState::ApplicationBootstrap,
                WorkflowState::PermissionSetup,
                WorkflowState::HealthCheck,
            ]
        );
        assert!(workflow.validate().is_ok());
    }

    #[test]
    fn test_only_health_check_warns() {
        let workflow = Workflows::provision(&ProvisionConfig::default());
        for stage in &workflow.stages {
            let expected = if stage.state == WorkflowState::HealthCheck {
                FailureMode::Warn
            } else {
                FailureMode::Abort
            };
            assert_eq!(stage.on_failure, expected, "{}", stage.name());
        }
    }

    #[test]
    fn test_bootstrap_command_order() {
        let workflow = Workflows::provision(&ProvisionConfig::default());
        let bootstrap = workflow
            .stages
            .iter()
            .find(|s| s.state == WorkflowState::ApplicationBootstrap)
            .unwrap();
        let labels: Vec<_> = bootstrap.actions.iter().map(Action::label).collect();
        assert_eq!(
            labels,
            vec![
                "generate application key",
                "run installer",
                "link storage",
                "run migrations",
                "cache config",
                "cache routes",
                "cache views",
            ]
        );
    }

    #[test]
    fn test_dependency_install_uses_slower_retry() {
        let config = ProvisionConfig::default();
        let workflow = Workflows::provision(&config);
        let install = &workflow.stages[3];
        assert_eq!(install.state, WorkflowState::DependencyInstall);
        assert!(install.retry.delay > workflow.stages[1].retry.delay);
    }

    #[test]
    fn test_validate_rejects_out_of_order_stages() {
        let workflow = Workflow::new("bad", "Bad")
            .stage(Stage::new(WorkflowState::ProjectSetup))
            .stage(Stage::new(WorkflowState::DatabaseSetup));
        assert!(matches!(workflow.validate(), Err(CoreError::InvalidWorkflow(_))));

        let workflow = Workflow::new("bad", "Bad").stage(Stage::new(WorkflowState::Done));
        assert!(matches!(workflow.validate(), Err(CoreError::InvalidWorkflow(_))));
    }

    #[test]
    fn test_validate_rejects_use_before_collect() {
        let workflow = Workflow::new("bad", "Bad").stage(
            Stage::new(WorkflowState::ProjectSetup)
                .action(Action::RewriteEnvFile)
                .action(Action::Collect(Field::Domain)),
        );
        assert!(matches!(workflow.validate(), Err(CoreError::InvalidWorkflow(_))));
    }

    #[test]
    fn test_render_escapes_sql_values() {
        let config = ProvisionConfig::default();
        let ctx = filled_context(&config);

        let spec = Command::CreateUser {
            host: "%".to_string(),
        }
        .render(&ctx, &config)
        .unwrap();

        assert_eq!(spec.program, "mysql");
        assert_eq!(&spec.args[..3], &["-u", "root", "-e"]);
        assert_eq!(
            spec.args[3],
            "CREATE USER IF NOT EXISTS 'o''brien'@'%' IDENTIFIED BY 'pa''ss\\\\word';"
        );
        assert!(!spec.display().contains("pa'ss"));
    }

    #[test]
    fn test_render_create_database() {
        let config = ProvisionConfig::default();
        let ctx = filled_context(&config);

        let spec = Command::CreateDatabase.render(&ctx, &config).unwrap();
        assert_eq!(
            spec.args.last().unwrap(),
            "CREATE DATABASE IF NOT EXISTS `shop_test` CHARACTER SET utf8mb4 COLLATE utf8mb4_unicode_ci;"
        );
    }

    #[test]
    fn test_render_requires_context() {
        let config = ProvisionConfig::default();
        let ctx = ProvisionContext::new(&config);

        let err = Command::CreateDatabase.render(&ctx, &config).unwrap_err();
        assert!(matches!(err, CoreError::MissingContext(_)));
    }

    #[test]
    fn test_admin_password_passed_through_env() {
        let mut config = ProvisionConfig::default();
        config.database.admin_password = Some("r00tpw".to_string());
        let ctx = filled_context(&config);

        let spec = Command::FlushPrivileges.render(&ctx, &config).unwrap();
        assert_eq!(spec.env.get("MYSQL_PWD"), Some(&"r00tpw".to_string()));
        assert!(!spec.args.iter().any(|a| a.contains("r00tpw")));
    }

    #[test]
    fn test_artisan_commands_run_in_install_root() {
        let config = ProvisionConfig::default();
        let ctx = filled_context(&config);

        let spec = Command::Migrate.render(&ctx, &config).unwrap();
        assert_eq!(spec.program, "php");
        assert_eq!(spec.args, vec!["artisan", "migrate", "--force"]);
        assert_eq!(spec.cwd, Some(config.install_root.clone()));
    }

    #[test]
    fn test_collation_for() {
        assert_eq!(collation_for("utf8mb4").as_deref(), Some("utf8mb4_unicode_ci"));
        assert_eq!(collation_for("latin1"), None);
    }
}
