//! Script Executor
//!
//! This module runs one allow-listed script per call. It implements request
//! validation, path containment, timeout handling, combined output capture and
//! proper error handling.
//!
//! Per call: validate → resolve → launch → wait (exit, timeout or cancel) →
//! drain output → build result. Nothing is shared between calls except the
//! read-only configuration.

use super::environment::SecureEnvironment;
use super::paths::{resolve_contained, script_path, ScriptType};
use super::timeout::{kill_process_group, reap_with_group, ExecutionTimeout, DEFAULT_GRACE_PERIOD_MS};
use super::types::{ExecutionRequest, ExecutionResult};
use super::validator::{RequestValidator, ValidationError};
use crate::metrics;
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Maximum captured output size in bytes (1MB)
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Appended to output that hit the size cap
const TRUNCATION_MARKER: &str = "\n…[output truncated]";

/// Read chunk size for the output pumps
const READ_CHUNK: usize = 8 * 1024;

/// Interpreter command per script type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Interpreters {
    pub python: String,
    pub bash: String,
    pub zsh: String,
}

impl Default for Interpreters {
    fn default() -> Self {
        Self {
            python: ScriptType::Python.interpreter().to_string(),
            bash: ScriptType::Bash.interpreter().to_string(),
            zsh: ScriptType::Zsh.interpreter().to_string(),
        }
    }
}

impl Interpreters {
    /// Get the interpreter for a script type
    pub fn for_type(&self, script_type: ScriptType) -> &str {
        match script_type {
            ScriptType::Python => &self.python,
            ScriptType::Bash => &self.bash,
            ScriptType::Zsh => &self.zsh,
        }
    }
}

/// Construction-time executor parameters
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Root holding the `python/`, `bash/` and `zsh/` subdirectories
    pub scripts_dir: PathBuf,

    /// Maximum wall-clock time per execution
    pub max_execution_time: Duration,

    /// Delay between SIGTERM and SIGKILL on timeout or cancel
    pub kill_grace_period: Duration,

    /// Exact script file names that may run
    pub allowed_scripts: Vec<String>,

    /// Accepted user id shape
    pub user_id_pattern: Regex,

    /// Interpreter per script type
    pub interpreters: Interpreters,

    /// Cap on captured combined output
    pub max_output_size: usize,
}

impl ExecutorConfig {
    /// Create a config with default interpreters, grace period and output cap
    pub fn new(
        scripts_dir: impl Into<PathBuf>,
        max_execution_time: Duration,
        allowed_scripts: Vec<String>,
    ) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            max_execution_time,
            kill_grace_period: Duration::from_millis(DEFAULT_GRACE_PERIOD_MS),
            allowed_scripts,
            user_id_pattern: super::validator::USER_ID_PATTERN.clone(),
            interpreters: Interpreters::default(),
            max_output_size: MAX_OUTPUT_SIZE,
        }
    }

    /// Set the kill grace period
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.kill_grace_period = grace;
        self
    }

    /// Set the output cap
    pub fn with_max_output_size(mut self, size: usize) -> Self {
        self.max_output_size = size;
        self
    }

    /// Override the interpreter for one script type
    pub fn with_interpreter(mut self, script_type: ScriptType, command: impl Into<String>) -> Self {
        let command = command.into();
        match script_type {
            ScriptType::Python => self.interpreters.python = command,
            ScriptType::Bash => self.interpreters.bash = command,
            ScriptType::Zsh => self.interpreters.zsh = command,
        }
        self
    }

    /// Replace all interpreters
    pub fn with_interpreters(mut self, interpreters: Interpreters) -> Self {
        self.interpreters = interpreters;
        self
    }
}

/// Executor construction failures
#[derive(Debug, thiserror::Error)]
pub enum ExecutorConfigError {
    #[error("Scripts directory '{0}' does not exist")]
    ScriptsDirMissing(PathBuf),

    #[error("Scripts path '{0}' is not a directory")]
    NotADirectory(PathBuf),

    #[error("Max execution time must be positive")]
    ZeroTimeout,

    #[error("Max output size must be positive")]
    ZeroOutputSize,
}

/// A call that was refused before any child was launched
///
/// Always carries the result record built for the call.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("invalid request: {source}")]
    InvalidRequest {
        source: ValidationError,
        result: Box<ExecutionResult>,
    },

    #[error("script path is not safe: {}", path.display())]
    UnsafePath {
        path: PathBuf,
        result: Box<ExecutionResult>,
    },
}

impl ExecutionError {
    /// Get the result built for the refused call
    pub fn result(&self) -> &ExecutionResult {
        match self {
            ExecutionError::InvalidRequest { result, .. } => result,
            ExecutionError::UnsafePath { result, .. } => result,
        }
    }

    /// Take the result built for the refused call
    pub fn into_result(self) -> ExecutionResult {
        match self {
            ExecutionError::InvalidRequest { result, .. } => *result,
            ExecutionError::UnsafePath { result, .. } => *result,
        }
    }
}

/// How the child's run ended
#[derive(Debug)]
enum Termination {
    Exited(ExitStatus),
    TimedOut,
    Cancelled,
    LaunchFailed(io::Error),
    WaitFailed(io::Error),
}

impl Termination {
    fn label(&self) -> &'static str {
        match self {
            Termination::Exited(status) if status.success() => "success",
            Termination::Exited(_) => "failed",
            Termination::TimedOut => "timeout",
            Termination::Cancelled => "cancelled",
            Termination::LaunchFailed(_) | Termination::WaitFailed(_) => "launch_failed",
        }
    }
}

/// What woke the wait loop
enum Wake {
    Exited(io::Result<ExitStatus>),
    Deadline,
    Cancelled,
}

/// Combined stdout/stderr shared by both pump tasks
#[derive(Debug, Clone)]
struct OutputBuffer {
    inner: Arc<Mutex<CapturedOutput>>,
    limit: usize,
}

#[derive(Debug, Default)]
struct CapturedOutput {
    bytes: Vec<u8>,
    truncated: bool,
}

impl OutputBuffer {
    fn new(limit: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CapturedOutput::default())),
            limit,
        }
    }

    fn append(&self, chunk: &[u8]) {
        let mut captured = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let room = self.limit.saturating_sub(captured.bytes.len());
        if chunk.len() > room {
            captured.truncated = true;
        }
        let take = chunk.len().min(room);
        captured.bytes.extend_from_slice(&chunk[..take]);
    }

    fn take(&self) -> CapturedOutput {
        let mut captured = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *captured)
    }
}

/// Executor for allow-listed scripts
///
/// # Security
///
/// 1. Requests are validated (user id, allow-list, argument denylist)
/// 2. The script path must resolve inside the scripts directory
/// 3. The interpreter runs without a shell, with argv only
/// 4. The child environment is replaced, never inherited
/// 5. stdin is closed and a timeout is always enforced
///
/// # Example
///
/// ```no_run
/// use scriptgate::scripts::{ExecutionRequest, ExecutorConfig, ScriptExecutor};
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = ExecutorConfig::new(
///         "scripts",
///         Duration::from_secs(30),
///         vec!["script1.py".to_string()],
///     );
///     let executor = ScriptExecutor::new(config)?;
///
///     let result = executor
///         .execute(&ExecutionRequest::new("abc1234", "script1.py"))
///         .await
///         .map_err(|e| anyhow::anyhow!(e.to_string()))?;
///     println!("{}", result.summary());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ScriptExecutor {
    config: ExecutorConfig,
    validator: RequestValidator,
    timeout: ExecutionTimeout,
    environment: SecureEnvironment,
}

impl ScriptExecutor {
    /// Create an executor, checking the scripts directory and limits
    pub fn new(config: ExecutorConfig) -> Result<Self, ExecutorConfigError> {
        if config.max_execution_time.is_zero() {
            return Err(ExecutorConfigError::ZeroTimeout);
        }
        if config.max_output_size == 0 {
            return Err(ExecutorConfigError::ZeroOutputSize);
        }
        match std::fs::metadata(&config.scripts_dir) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(ExecutorConfigError::NotADirectory(config.scripts_dir.clone())),
            Err(_) => return Err(ExecutorConfigError::ScriptsDirMissing(config.scripts_dir.clone())),
        }

        let validator = RequestValidator::new(config.allowed_scripts.clone())
            .with_user_id_pattern(config.user_id_pattern.clone());
        let timeout = ExecutionTimeout::new(config.max_execution_time)
            .with_grace_period(config.kill_grace_period);

        Ok(Self {
            config,
            validator,
            timeout,
            environment: SecureEnvironment::for_host(),
        })
    }

    /// Execute a request with no external cancellation
    pub async fn execute(&self, req: &ExecutionRequest) -> Result<ExecutionResult, ExecutionError> {
        self.execute_with_cancel(req, &CancellationToken::new()).await
    }

    /// Execute a request, stopping the child early if `cancel` fires
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError` (which still carries a result) if:
    /// - the request fails validation
    /// - the script path escapes the scripts directory or is missing
    ///
    /// A child that fails to start, exits non-zero, times out or is cancelled
    /// yields `Ok` with `success == false`.
    #[instrument(skip_all, fields(user_id = %req.user_id, script = %req.script))]
    pub async fn execute_with_cancel(
        &self,
        req: &ExecutionRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, ExecutionError> {
        let started = Instant::now();
        let executed_at = Utc::now();

        if let Err(reason) = self.validator.validate(req) {
            warn!(event = "request_rejected", reason = %reason, "Request validation failed");
            metrics::record_rejection("invalid_request");
            let result = ExecutionResult::rejected(
                format!("Invalid request: {}", reason),
                executed_at,
                started.elapsed(),
            );
            return Err(ExecutionError::InvalidRequest {
                source: reason,
                result: Box::new(result),
            });
        }

        let script_type = ScriptType::detect(&req.script);
        let interpreter = self.config.interpreters.for_type(script_type);
        let path = script_path(&req.script, script_type, &self.config.scripts_dir);

        let Some(resolved) = resolve_contained(&path, &self.config.scripts_dir) else {
            warn!(event = "unsafe_path", path = %path.display(), "Script path validation failed");
            metrics::record_rejection("unsafe_path");
            let result = ExecutionResult::rejected(
                "Script path validation failed",
                executed_at,
                started.elapsed(),
            );
            return Err(ExecutionError::UnsafePath {
                path,
                result: Box::new(result),
            });
        };

        let mut args = script_type.leading_args(&resolved);
        args.push(req.user_id.clone());
        args.extend(req.arguments.iter().cloned());

        info!(%script_type, interpreter, "Starting script");

        let (termination, captured) = self.run_child(interpreter, &args, cancel).await;
        let duration = started.elapsed();

        if captured.truncated {
            warn!(limit = self.config.max_output_size, "Script output truncated");
        }
        let output = decode_output(captured);

        let (success, exit_code, error) = match &termination {
            Termination::Exited(status) => {
                let code = status.code().unwrap_or(-1);
                if status.success() {
                    (true, code, String::new())
                } else {
                    (false, code, describe_status(status))
                }
            }
            Termination::TimedOut => (
                false,
                -1,
                format!("execution timed out after {:?}", self.config.max_execution_time),
            ),
            Termination::Cancelled => (false, -1, "execution cancelled".to_string()),
            Termination::LaunchFailed(err) => (
                false,
                -1,
                format!("failed to start interpreter '{}': {}", interpreter, err),
            ),
            Termination::WaitFailed(err) => (false, -1, format!("failed to wait for script: {}", err)),
        };

        metrics::record_execution(&req.script, termination.label(), duration);

        if success {
            info!(
                success,
                exit_code,
                duration_ms = duration.as_millis() as u64,
                "Script completed successfully"
            );
        } else {
            warn!(
                success,
                exit_code,
                duration_ms = duration.as_millis() as u64,
                error = %error,
                "Script failed"
            );
        }

        Ok(ExecutionResult {
            success,
            output,
            error,
            exit_code,
            duration,
            executed_at,
        })
    }

    /// Spawn the interpreter, wait for it and collect its merged output
    async fn run_child(
        &self,
        interpreter: &str,
        args: &[String],
        cancel: &CancellationToken,
    ) -> (Termination, CapturedOutput) {
        let mut cmd = Command::new(interpreter);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        self.environment.apply(&mut cmd);

        #[cfg(unix)]
        cmd.process_group(0);

        let buffer = OutputBuffer::new(self.config.max_output_size);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                warn!(interpreter, error = %err, "Failed to spawn interpreter");
                return (Termination::LaunchFailed(err), buffer.take());
            }
        };
        let pid = child.id();
        debug!(pid = ?pid, "Child spawned");
        let group = GroupGuard::new(pid);

        let mut pumps: Vec<JoinHandle<()>> = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            pumps.push(tokio::spawn(pump(stdout, buffer.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            pumps.push(tokio::spawn(pump(stderr, buffer.clone())));
        }

        let wake = tokio::select! {
            status = reap_with_group(&mut child, pid) => Wake::Exited(status),
            _ = time::sleep(self.timeout.duration()) => Wake::Deadline,
            _ = cancel.cancelled() => Wake::Cancelled,
        };

        let termination = match wake {
            Wake::Exited(Ok(status)) => Termination::Exited(status),
            Wake::Exited(Err(err)) => {
                self.stop(&mut child).await;
                Termination::WaitFailed(err)
            }
            Wake::Deadline => {
                warn!(timeout = ?self.timeout.duration(), "Script timed out");
                self.stop(&mut child).await;
                Termination::TimedOut
            }
            Wake::Cancelled => {
                warn!("Script execution cancelled by caller");
                self.stop(&mut child).await;
                Termination::Cancelled
            }
        };
        // Child reaped and its group cleared on every branch above.
        group.disarm();

        let drain = async {
            for pump in pumps.iter_mut() {
                let _ = pump.await;
            }
        };
        if time::timeout(self.timeout.grace_period(), drain).await.is_err() {
            // Only a process that left the group can still hold the pipes.
            warn!("Output pipes still open after child exit, abandoning them");
            for pump in &pumps {
                pump.abort();
            }
        }

        (termination, buffer.take())
    }

    async fn stop(&self, child: &mut tokio::process::Child) {
        if let Err(err) = self.timeout.terminate(child).await {
            warn!(error = %err, "Failed to reap child");
        }
    }

    /// Get a reference to the validator
    pub fn validator(&self) -> &RequestValidator {
        &self.validator
    }

    /// Get a reference to the config
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Get the scripts directory
    pub fn scripts_dir(&self) -> &Path {
        &self.config.scripts_dir
    }

    /// Get the child environment
    pub fn environment(&self) -> &SecureEnvironment {
        &self.environment
    }
}

/// Kills the child's process group if `run_child` is dropped mid-flight
///
/// `kill_on_drop` only reaches the direct child.
struct GroupGuard {
    pid: Option<u32>,
}

impl GroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self { pid }
    }

    fn disarm(mut self) {
        self.pid = None;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if let Some(pid) = self.pid {
            warn!(pid, "Execution abandoned before completion, killing process group");
            kill_process_group(pid);
        }
    }
}

/// Copy a child stream into the shared buffer until EOF
async fn pump<R: AsyncRead + Unpin>(mut reader: R, buffer: OutputBuffer) {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => buffer.append(&chunk[..n]),
            Err(err) => {
                debug!(error = %err, "Output stream read failed");
                break;
            }
        }
    }
}

/// Lossy UTF-8 decode; invalid sequences become U+FFFD
///
/// A character split by the size cap is dropped rather than replaced.
fn decode_output(mut captured: CapturedOutput) -> String {
    if captured.truncated {
        trim_partial_char(&mut captured.bytes);
    }
    let mut output = match String::from_utf8(captured.bytes) {
        Ok(text) => text,
        Err(err) => {
            debug!("Script output contained invalid UTF-8, replacing");
            String::from_utf8_lossy(err.as_bytes()).into_owned()
        }
    };
    if captured.truncated {
        output.push_str(TRUNCATION_MARKER);
    }
    output
}

/// Drop an incomplete UTF-8 sequence at the end of `bytes`
fn trim_partial_char(bytes: &mut Vec<u8>) {
    let floor = bytes.len().saturating_sub(3);
    let Some(start) = (floor..bytes.len()).rev().find(|&i| bytes[i] & 0xC0 != 0x80) else {
        return;
    };
    if let Err(err) = std::str::from_utf8(&bytes[start..]) {
        if err.error_len().is_none() {
            bytes.truncate(start);
        }
    }
}

/// Describe a non-successful exit status
fn describe_status(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exit status {}", code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("terminated by signal {}", signal);
        }
    }

    "terminated abnormally".to_string()
}
