//! Execution Request and Result Records
//!
//! The contract between the executor and its callers. Both records are plain
//! values: a request is built per call by the caller and a result is handed
//! back exactly once per call.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A request to run one allow-listed script for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// User identifier, passed to the script as its first argument
    pub user_id: String,

    /// Script file name; must match an allow-list entry exactly
    pub script: String,

    /// Extra arguments appended after the user identifier
    #[serde(default)]
    pub arguments: Vec<String>,
}

impl ExecutionRequest {
    /// Create a request without extra arguments
    pub fn new(user_id: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            script: script.into(),
            arguments: Vec::new(),
        }
    }

    /// Append extra arguments
    pub fn with_arguments<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments.extend(arguments.into_iter().map(Into::into));
        self
    }
}

/// Outcome of a single execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// True iff the child started and exited with code 0
    pub success: bool,

    /// Combined stdout and stderr, lossily decoded as UTF-8
    pub output: String,

    /// Empty on success, diagnostic otherwise
    pub error: String,

    /// Child exit status, or -1 if it never started or was killed
    pub exit_code: i32,

    /// Wall-clock time from the start of the call to result assembly
    pub duration: Duration,

    /// When the call started
    pub executed_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// Result for a call that never reached a running child
    pub(crate) fn rejected(error: impl Into<String>, executed_at: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: error.into(),
            exit_code: -1,
            duration,
            executed_at,
        }
    }

    /// Whether the child was stopped by the timeout
    pub fn timed_out(&self) -> bool {
        !self.success && self.error.contains("timed out")
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        if self.success {
            format!(
                "Success (exit code: {}, {:?}, {} bytes output)",
                self.exit_code,
                self.duration,
                self.output.len()
            )
        } else {
            format!(
                "Failed (exit code: {}, {:?}): {}",
                self.exit_code, self.duration, self.error
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = ExecutionRequest::new("abc1234", "script1.py").with_arguments(["one", "two"]);
        assert_eq!(req.user_id, "abc1234");
        assert_eq!(req.script, "script1.py");
        assert_eq!(req.arguments, vec!["one".to_string(), "two".to_string()]);
    }

    #[test]
    fn test_request_deserialize_without_arguments() {
        let req: ExecutionRequest =
            serde_json::from_str(r#"{"user_id":"abc1234","script":"script1.py"}"#).unwrap();
        assert!(req.arguments.is_empty());
    }

    #[test]
    fn test_rejected_result() {
        let started = Utc::now();
        let result = ExecutionResult::rejected("Invalid request: nope", started, Duration::ZERO);
        assert!(!result.success);
        assert_eq!(result.exit_code, -1);
        assert!(result.output.is_empty());
        assert_eq!(result.executed_at, started);
        assert!(result.summary().contains("Failed"));
    }

    #[test]
    fn test_timed_out_flag() {
        let mut result = ExecutionResult::rejected("execution timed out after 1s", Utc::now(), Duration::from_secs(1));
        assert!(result.timed_out());

        result.error = "exit status 2".to_string();
        assert!(!result.timed_out());
    }
}
