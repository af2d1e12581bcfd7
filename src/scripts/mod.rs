//! Script Execution Core
//!
//! Runs one allow-listed script per call for a given user, safely.
//!
//! # Security Features
//!
//! - **Allow-listing**: only exact, configured script names can run
//! - **Argv Invocation**: interpreters are started directly, never through a shell
//! - **Path Containment**: the resolved script must live under the scripts directory
//! - **Clean Environment**: children receive a fixed, minimal environment
//! - **Timeout Enforcement**: every run is bounded, with group-wide termination
//!
//! # Architecture
//!
//! - `types.rs`: request and result records
//! - `validator.rs`: user id, allow-list and argument checks
//! - `paths.rs`: script type detection and path containment
//! - `environment.rs`: child environment
//! - `timeout.rs`: timeout policy and child termination
//! - `executor.rs`: the executor tying the pieces together
//!
//! # Example
//!
//! ```no_run
//! use scriptgate::scripts::{ExecutionRequest, ExecutorConfig, ScriptExecutor};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let executor = ScriptExecutor::new(ExecutorConfig::new(
//!         "scripts",
//!         Duration::from_secs(30),
//!         vec!["script1.sh".to_string()],
//!     ))?;
//!
//!     match executor.execute(&ExecutionRequest::new("abc1234", "script1.sh")).await {
//!         Ok(result) => println!("Exit code: {}\n{}", result.exit_code, result.output),
//!         Err(err) => eprintln!("Refused: {}", err),
//!     }
//!
//!     Ok(())
//! }
//! ```

mod environment;
mod executor;
mod paths;
mod timeout;
mod types;
mod validator;

pub use environment::{host_is_windows, SecureEnvironment};
pub use executor::{
    ExecutionError, ExecutorConfig, ExecutorConfigError, Interpreters, ScriptExecutor, MAX_OUTPUT_SIZE,
};
pub use paths::{is_path_safe, resolve_contained, script_path, ScriptType};
pub use timeout::{ExecutionTimeout, DEFAULT_GRACE_PERIOD_MS, DEFAULT_TIMEOUT_SECS};
pub use types::{ExecutionRequest, ExecutionResult};
pub use validator::{
    dangerous_pattern, has_path_characters, validate_argument, RequestValidator, ValidationError,
    DANGEROUS_PATTERNS, USER_ID_PATTERN,
};
pub use tokio_util::sync::CancellationToken;
