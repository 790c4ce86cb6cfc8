//! Mock runner and probe for testing.
//!
//! Provides configurable implementations of [`CommandRunner`] and
//! [`HealthProbe`] for unit tests that must not touch the host.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::command::CommandSpec;
use crate::error::{RunnerError, RunnerResult};
use crate::probe::HealthProbe;
use crate::runner::{CommandOutput, CommandRunner};

/// Predefined mock response for a command execution.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl MockResponse {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            duration_ms: 10,
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
            duration_ms: 10,
        }
    }
}

/// Captured call information for verification.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub method: String,
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: HashMap<String, String>,
}

impl CapturedCall {
    /// Program and arguments joined by spaces.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Scripted responses for commands whose command line contains `pattern`.
#[derive(Debug, Clone)]
struct Script {
    pattern: String,
    responses: VecDeque<MockResponse>,
}

/// Mock command runner for testing.
///
/// Calls are captured in order. Responses are scripted per command-line
/// substring; the last scripted response for a pattern repeats once the
/// queue is drained. Unmatched commands succeed with empty output.
#[derive(Clone, Default)]
pub struct MockRunner {
    scripts: Arc<RwLock<Vec<Script>>>,
    captured_calls: Arc<RwLock<Vec<CapturedCall>>>,
    missing_commands: Arc<RwLock<HashSet<String>>>,
    inactive_services: Arc<RwLock<HashSet<String>>>,
    spawn_failures: Arc<RwLock<Vec<String>>>,
    dry_run: bool,
}

impl MockRunner {
    /// Create a new mock runner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script responses for commands containing `pattern`.
    pub fn respond(self, pattern: impl Into<String>, responses: Vec<MockResponse>) -> Self {
        self.scripts.write().push(Script {
            pattern: pattern.into(),
            responses: responses.into(),
        });
        self
    }

    /// Make a command unresolvable.
    pub fn missing_command(self, name: impl Into<String>) -> Self {
        self.missing_commands.write().insert(name.into());
        self
    }

    /// Make a service report as inactive.
    pub fn inactive_service(self, name: impl Into<String>) -> Self {
        self.inactive_services.write().insert(name.into());
        self
    }

    /// Fail to spawn commands containing `pattern`.
    pub fn spawn_failure(self, pattern: impl Into<String>) -> Self {
        self.spawn_failures.write().push(pattern.into());
        self
    }

    /// Report as a dry-run runner.
    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Get the number of calls made.
    pub fn call_count(&self) -> usize {
        self.captured_calls.read().len()
    }

    /// Check if a specific method was called.
    pub fn was_called(&self, method: &str) -> bool {
        self.captured_calls.read().iter().any(|c| c.method == method)
    }

    /// Get calls to a specific method.
    pub fn get_method_calls(&self, method: &str) -> Vec<CapturedCall> {
        self.captured_calls
            .read()
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    /// Command lines passed to `run`, in order.
    pub fn command_lines(&self) -> Vec<String> {
        self.get_method_calls("run")
            .iter()
            .map(CapturedCall::command_line)
            .collect()
    }

    /// Number of `run` calls whose command line contains `pattern`.
    pub fn count_matching(&self, pattern: &str) -> usize {
        self.command_lines()
            .iter()
            .filter(|line| line.contains(pattern))
            .count()
    }

    /// Record a call.
    fn record_call(&self, method: &str, spec: Option<&CommandSpec>, name: Option<&str>) {
        let call = match spec {
            Some(spec) => CapturedCall {
                method: method.to_string(),
                program: spec.program.clone(),
                args: spec.args.clone(),
                cwd: spec.cwd.clone(),
                env: spec.env.clone().into_iter().collect(),
            },
            None => CapturedCall {
                method: method.to_string(),
                program: name.unwrap_or_default().to_string(),
                args: Vec::new(),
                cwd: None,
                env: HashMap::new(),
            },
        };
        self.captured_calls.write().push(call);
    }

    /// Get the next response for a command line.
    fn next_response(&self, line: &str) -> MockResponse {
        let mut scripts = self.scripts.write();
        let Some(script) = scripts.iter_mut().find(|s| line.contains(&s.pattern)) else {
            return MockResponse::success("");
        };
        if script.responses.len() > 1 {
            script.responses.pop_front().unwrap_or_else(|| MockResponse::success(""))
        } else {
            script
                .responses
                .front()
                .cloned()
                .unwrap_or_else(|| MockResponse::success(""))
        }
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, spec: &CommandSpec) -> RunnerResult<CommandOutput> {
        self.record_call("run", Some(spec), None);

        let line = std::iter::once(spec.program.as_str())
            .chain(spec.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");

        if self.spawn_failures.read().iter().any(|p| line.contains(p)) {
            return Err(RunnerError::SpawnFailed {
                program: spec.program.clone(),
                message: "mock spawn failure".to_string(),
            });
        }

        let response = self.next_response(&line);
        let started_at = Utc::now();
        let finished_at = started_at + chrono::Duration::milliseconds(response.duration_ms as i64);

        Ok(CommandOutput {
            exit_code: response.exit_code,
            stdout: response.stdout,
            stderr: response.stderr,
            started_at,
            finished_at,
            duration_ms: response.duration_ms,
        })
    }

    async fn command_exists(&self, name: &str) -> bool {
        self.record_call("command_exists", None, Some(name));
        !self.missing_commands.read().contains(name)
    }

    async fn service_is_active(&self, name: &str) -> bool {
        self.record_call("service_is_active", None, Some(name));
        !self.inactive_services.read().contains(name)
    }

    fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

/// Scripted outcome for a health probe.
#[derive(Debug, Clone)]
enum ProbeScript {
    Status(u16),
    Unreachable(String),
}

/// Mock health probe.
#[derive(Clone)]
pub struct MockProbe {
    outcome: Arc<RwLock<ProbeScript>>,
    urls: Arc<RwLock<Vec<String>>>,
}

impl Default for MockProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProbe {
    /// A probe that answers 200.
    pub fn new() -> Self {
        Self {
            outcome: Arc::new(RwLock::new(ProbeScript::Status(200))),
            urls: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Answer every request with `status`.
    pub fn with_status(self, status: u16) -> Self {
        *self.outcome.write() = ProbeScript::Status(status);
        self
    }

    /// Fail every request as if the host were unreachable.
    pub fn unreachable(self, message: impl Into<String>) -> Self {
        *self.outcome.write() = ProbeScript::Unreachable(message.into());
        self
    }

    /// URLs probed so far.
    pub fn probed_urls(&self) -> Vec<String> {
        self.urls.read().clone()
    }
}

#[async_trait]
impl HealthProbe for MockProbe {
    async fn status(&self, url: &str) -> RunnerResult<u16> {
        self.urls.write().push(url.to_string());
        match self.outcome.read().clone() {
            ProbeScript::Status(code) => Ok(code),
            ProbeScript::Unreachable(message) => Err(RunnerError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                message,
            ))),
        }
    }
}
