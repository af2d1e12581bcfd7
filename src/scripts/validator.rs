//! Request Validation
//!
//! Pure checks applied to every execution request before anything touches the
//! filesystem:
//!
//! - the user identifier must match `^[A-Za-z0-9]{7,12}$`
//! - the script must be an exact allow-list entry with no path characters
//! - no argument may contain a shell metacharacter or a denylisted token
//!
//! Arguments are handed to the interpreter as argv, never through a shell, so
//! the argument denylist is deliberately coarse.

use lazy_static::lazy_static;
use regex::Regex;

use super::types::ExecutionRequest;

lazy_static! {
    /// Accepted user identifier shape
    pub static ref USER_ID_PATTERN: Regex =
        Regex::new(r"^[A-Za-z0-9]{7,12}$").expect("user id pattern must compile");
}

/// Substrings that reject an argument, matched against its lowercased form.
///
/// `"sh"` subsumes `"bash"` and rejects any argument containing those two
/// letters in a row (e.g. `"push"`).
pub const DANGEROUS_PATTERNS: &[&str] = &[
    ";", "&", "|", "`", "$", "(", ")", "{", "}", "[", "]", "&&", "||", ">>", "<<", "<", ">",
    "rm ", "del ", "format ", "mkfs", "dd ", "wget", "curl", "nc ", "netcat", "python", "sh",
    "bash", "cmd", "powershell",
];

/// Substrings never allowed in a script name
const PATH_CHARACTERS: &[&str] = &["..", "/", "\\"];

/// Reasons a request is refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("invalid user ID format: {0}")]
    InvalidUserId(String),

    #[error("script not in whitelist: {0}")]
    NotAllowed(String),

    #[error("invalid characters in script name: {0}")]
    InvalidScriptName(String),

    #[error("dangerous pattern detected in argument: {0}")]
    DangerousArgument(String),
}

/// Validator holding the allow-list and the compiled user id pattern
///
/// Built once and shared read-only across calls.
#[derive(Debug, Clone)]
pub struct RequestValidator {
    allowed_scripts: Vec<String>,
    user_id_pattern: Regex,
}

impl RequestValidator {
    /// Create a validator for the given allow-list
    pub fn new(allowed_scripts: Vec<String>) -> Self {
        Self {
            allowed_scripts,
            user_id_pattern: USER_ID_PATTERN.clone(),
        }
    }

    /// Replace the user id pattern
    pub fn with_user_id_pattern(mut self, pattern: Regex) -> Self {
        self.user_id_pattern = pattern;
        self
    }

    /// Check a user identifier. No trimming is done here.
    pub fn validate_user_id(&self, user_id: &str) -> bool {
        !user_id.is_empty() && self.user_id_pattern.is_match(user_id)
    }

    /// Check a script name against the allow-list and for path characters
    pub fn validate_script(&self, script: &str) -> bool {
        self.is_allowed(script) && !has_path_characters(script)
    }

    /// Validate a whole request, reporting the first failing check
    ///
    /// Order: user id, allow-list membership, path characters, arguments.
    pub fn validate(&self, req: &ExecutionRequest) -> Result<(), ValidationError> {
        if !self.validate_user_id(&req.user_id) {
            return Err(ValidationError::InvalidUserId(req.user_id.clone()));
        }

        if !self.is_allowed(&req.script) {
            return Err(ValidationError::NotAllowed(req.script.clone()));
        }

        if has_path_characters(&req.script) {
            return Err(ValidationError::InvalidScriptName(req.script.clone()));
        }

        if let Some(arg) = req.arguments.iter().find(|arg| !validate_argument(arg)) {
            return Err(ValidationError::DangerousArgument(arg.clone()));
        }

        Ok(())
    }

    /// Check if a script is in the allow-list (exact byte equality)
    pub fn is_allowed(&self, script: &str) -> bool {
        self.allowed_scripts.iter().any(|allowed| allowed == script)
    }

    /// Get the allow-list in configured order
    pub fn allowed_scripts(&self) -> &[String] {
        &self.allowed_scripts
    }

    /// Get the user id pattern
    pub fn user_id_pattern(&self) -> &Regex {
        &self.user_id_pattern
    }
}

/// Returns false if the argument contains any dangerous pattern
pub fn validate_argument(arg: &str) -> bool {
    dangerous_pattern(arg).is_none()
}

/// First dangerous pattern found in the argument, case-insensitive
pub fn dangerous_pattern(arg: &str) -> Option<&'static str> {
    let lowered = arg.to_lowercase();
    DANGEROUS_PATTERNS
        .iter()
        .copied()
        .find(|pattern| lowered.contains(pattern))
}

/// Whether a script name contains `..`, `/` or `\`
pub fn has_path_characters(name: &str) -> bool {
    PATH_CHARACTERS.iter().any(|p| name.contains(p))
}
