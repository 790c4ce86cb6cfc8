//! Persistent run reports.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::context::ProvisionContext;
use crate::error::{CoreError, CoreResult};
use crate::stage::WorkflowState;

/// Name of the copy of the most recent report.
pub const LATEST_REPORT: &str = "latest.json";

/// Outcome of a single action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Succeeded,
    Failed,
    /// Failed inside a stage that only warns.
    Warned,
    /// Not executed (dry run).
    Skipped,
}

/// One executed action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub label: String,
    pub outcome: ActionOutcome,
    pub attempts: u32,
    /// Command line with secrets masked
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ActionRecord {
    pub fn new(label: impl Into<String>, outcome: ActionOutcome, attempts: u32) -> Self {
        Self {
            label: label.into(),
            outcome,
            attempts,
            command: None,
            message: None,
        }
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Outcome of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Succeeded,
    /// Completed with warnings.
    Warned,
    Failed,
}

/// One executed stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: WorkflowState,
    pub outcome: StageOutcome,
    pub actions: Vec<ActionRecord>,
    /// Error that failed the stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl StageResult {
    pub fn duration_ms(&self) -> i64 {
        (self.completed_at - self.started_at).num_milliseconds()
    }
}

/// Everything recorded about one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub workflow_name: String,
    /// Current state; `Done` or `Failed` once the run is over
    pub state: WorkflowState,
    /// Stage that aborted the run
    pub failed_stage: Option<WorkflowState>,
    pub stages: Vec<StageResult>,
    pub warnings: Vec<String>,
    pub error: Option<String>,
    /// Short error kind such as `CommandFailure`
    pub error_kind: Option<String>,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Collected values, password excluded
    pub context: ProvisionContext,
}

impl RunReport {
    pub fn new(
        workflow_id: impl Into<String>,
        workflow_name: impl Into<String>,
        initial: WorkflowState,
        context: ProvisionContext,
    ) -> Self {
        Self {
            run_id: context.run_id,
            workflow_id: workflow_id.into(),
            workflow_name: workflow_name.into(),
            state: initial,
            failed_stage: None,
            stages: Vec::new(),
            warnings: Vec::new(),
            error: None,
            error_kind: None,
            dry_run: false,
            started_at: context.started_at,
            completed_at: None,
            context,
        }
    }

    /// Move to `Failed`, recording the stage and the error.
    pub fn fail(&mut self, stage: WorkflowState, error: &CoreError) {
        self.failed_stage = Some(stage);
        self.error = Some(error.to_string());
        self.error_kind = Some(error.kind().to_string());
        self.state = WorkflowState::Failed;
        self.completed_at = Some(Utc::now());
    }

    pub fn finish(&mut self) {
        self.state = WorkflowState::Done;
        self.completed_at = Some(Utc::now());
    }

    pub fn is_success(&self) -> bool {
        self.state == WorkflowState::Done
    }

    /// Process exit code for this run.
    pub fn exit_code(&self) -> u8 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    /// One-line outcome, e.g. `Done (7 stages, 1 warning)`.
    pub fn summary(&self) -> String {
        let warnings = match self.warnings.len() {
            0 => String::new(),
            1 => ", 1 warning".to_string(),
            n => format!(", {} warnings", n),
        };
        match (self.state, self.failed_stage) {
            (WorkflowState::Failed, Some(stage)) => format!(
                "Failed at {}: {}",
                stage,
                self.error.as_deref().unwrap_or("unknown error")
            ),
            (state, _) => format!("{} ({} stages{})", state, self.stages.len(), warnings),
        }
    }

    pub fn stage(&self, state: WorkflowState) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == state)
    }

    pub fn report_path(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.json", self.run_id))
    }

    /// Write the report as `<run_id>.json` and refresh `latest.json`.
    pub fn save(&self, dir: &Path) -> CoreResult<PathBuf> {
        fs::create_dir_all(dir).map_err(|e| CoreError::filesystem(dir, e))?;
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| CoreError::Serialization(e.to_string()))?;

        let path = self.report_path(dir);
        fs::write(&path, &json).map_err(|e| CoreError::filesystem(&path, e))?;
        let latest = dir.join(LATEST_REPORT);
        fs::write(&latest, &json).map_err(|e| CoreError::filesystem(&latest, e))?;

        debug!("Saved run report to {:?}", path);
        Ok(path)
    }

    pub fn load(path: &Path) -> CoreResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| CoreError::filesystem(path, e))?;
        serde_json::from_str(&content).map_err(|e| CoreError::Serialization(e.to_string()))
    }

    /// Most recent report in `dir`, if any run has been recorded.
    pub fn load_latest(dir: &Path) -> CoreResult<Option<Self>> {
        let path = dir.join(LATEST_REPORT);
        if !path.exists() {
            return Ok(None);
        }
        Self::load(&path).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProvisionConfig;
    use crate::validate::Field;
    use tempfile::TempDir;

    fn report() -> RunReport {
        let mut ctx = ProvisionContext::new(&ProvisionConfig::default());
        ctx.set(Field::DatabaseName, "shop_test").unwrap();
        ctx.set(Field::DatabasePassword, "s3cretpassw0rd").unwrap();
        RunReport::new("provision", "Provision Environment", WorkflowState::Preflight, ctx)
    }

    #[test]
    fn test_exit_codes() {
        let mut done = report();
        done.finish();
        assert_eq!(done.exit_code(), 0);

        let mut failed = report();
        failed.fail(
            WorkflowState::DependencyInstall,
            &CoreError::CommandFailed {
                command: "composer install".into(),
                exit_code: 1,
                message: "network unreachable".into(),
            },
        );
        assert_eq!(failed.exit_code(), 1);
        assert_eq!(failed.failed_stage, Some(WorkflowState::DependencyInstall));
        assert_eq!(failed.error_kind.as_deref(), Some("CommandFailure"));
        assert_eq!(
            failed.summary(),
            "Failed at Dependency Installation: Command failed: composer install (exit code 1): network unreachable"
        );
    }

    #[test]
    fn test_save_and_load_latest() {
        let dir = TempDir::new().unwrap();
        let mut first = report();
        first.finish();
        first.save(dir.path()).unwrap();

        let mut second = report();
        second.warnings.push("health endpoint returned 503".into());
        second.finish();
        let path = second.save(dir.path()).unwrap();

        assert!(path.ends_with(format!("{}.json", second.run_id)));
        assert!(first.report_path(dir.path()).exists());

        let latest = RunReport::load_latest(dir.path()).unwrap().unwrap();
        assert_eq!(latest.run_id, second.run_id);
        assert_eq!(latest.warnings.len(), 1);
        assert_eq!(latest.context.database_name().unwrap(), "shop_test");
    }

    #[test]
    fn test_saved_report_omits_password() {
        let dir = TempDir::new().unwrap();
        let path = report().save(dir.path()).unwrap();
        let content = fs::read_to_string(path).unwrap();
        assert!(!content.contains("s3cretpassw0rd"));
    }

    #[test]
    fn test_load_latest_without_runs() {
        let dir = TempDir::new().unwrap();
        assert!(RunReport::load_latest(dir.path()).unwrap().is_none());
    }
}
