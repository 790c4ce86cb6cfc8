//! # prov_runner
//!
//! External command execution layer for provisioner.
//!
//! Everything the provisioning workflow treats as an opaque collaborator lives
//! here: spawning processes, resolving command names, querying the service
//! manager, and probing HTTP endpoints.
//!
//! # Features
//!
//! - **Argument vectors**: commands are described by [`CommandSpec`] and passed
//!   to the process as discrete arguments, never through a shell line
//! - **Secret redaction**: values marked secret are masked in logs
//! - **Dry-Run Mode**: log commands without executing them
//! - **Mock Runner / Probe**: for testing without touching the host
//!
//! # Example
//!
//! ```rust,no_run
//! use prov_runner::{CommandRunner, CommandSpec, ProcessRunner, ProcessRunnerOptions};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runner = ProcessRunner::new(ProcessRunnerOptions::default());
//!
//!     let spec = CommandSpec::new("composer")
//!         .args(["install", "--no-dev"])
//!         .cwd("/var/www/storefront");
//!
//!     let output = runner.run(&spec).await?;
//!     println!("Exit code: {}", output.exit_code);
//!
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod error;
pub mod mock;
pub mod probe;
pub mod process;
pub mod runner;

pub use command::CommandSpec;
pub use error::{RunnerError, RunnerResult};
pub use mock::{CapturedCall, MockProbe, MockResponse, MockRunner};
pub use probe::{is_healthy, HealthProbe, HttpProbe};
pub use process::{ProcessRunner, ProcessRunnerOptions};
pub use runner::{CommandOutput, CommandRunner};
