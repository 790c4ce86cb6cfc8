//! # prov_core
//!
//! Provisioning workflow engine for provisioner.
//!
//! This crate provides the state machine, stage descriptors, and the generic
//! stage runner that set up a storefront backend: database, project
//! configuration, dependencies, application bootstrap, permissions, and a
//! final health check.
//!
//! # Architecture
//!
//! - **Context**: write-once record of the values collected during a run
//! - **Stages**: pure data describing ordered actions and a retry policy
//! - **Provisioner**: interprets stages against an injected command runner
//! - **Reports**: per-stage results persisted as JSON
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prov_core::{ProvisionConfig, ProvisionContext, Provisioner, StdioPrompter, Workflows};
//! use prov_runner::{HttpProbe, ProcessRunner, ProcessRunnerOptions};
//!
//! let config = ProvisionConfig::default();
//! let provisioner = Provisioner::new(
//!     config.clone(),
//!     Arc::new(ProcessRunner::new(ProcessRunnerOptions::default())),
//!     Arc::new(HttpProbe::new(config.health_timeout())?),
//! );
//!
//! let report = provisioner
//!     .run(&Workflows::provision(&config), ProvisionContext::new(&config), &mut StdioPrompter)
//!     .await;
//! std::process::exit(report.exit_code().into());
//! ```

pub mod config;
pub mod context;
pub mod envfile;
pub mod error;
pub mod orchestrator;
pub mod preflight;
pub mod prompt;
pub mod report;
pub mod retry;
pub mod stage;
pub mod validate;

// Re-export main types for convenience
pub use config::{Answers, DatabaseSettings, HealthSettings, ProvisionConfig, RetrySettings};
pub use context::ProvisionContext;
pub use envfile::{backup_path, create_backup, EnvFile};
pub use error::{CoreError, CoreResult};
pub use orchestrator::Provisioner;
pub use preflight::{command_exists, service_is_active, Preflight, PreflightReport};
pub use prompt::{collect, Prompter, ScriptedPrompter, StdioPrompter};
pub use report::{ActionOutcome, ActionRecord, RunReport, StageOutcome, StageResult, LATEST_REPORT};
pub use retry::{run_with_retry, Retried, RetryPolicy};
pub use stage::{Action, Command, FailureMode, Stage, Workflow, WorkflowState, Workflows};
pub use validate::{
    validate_domain, validate_enum, validate_identifier, validate_non_empty, Field, FieldRules,
    ValidationError,
};
