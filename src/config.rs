// Configuration File Support
//
// This module provides configuration file parsing for the ScriptGate service.
// Supports TOML format with environment variable overrides.
// The configuration file defaults to ./scriptgate.toml and can be changed with --config.
//
// The listen port is not overridden here: PORT is read verbatim at bind time by
// port discovery (see port.rs).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::scripts::{
    has_path_characters, ExecutorConfig, Interpreters, DEFAULT_GRACE_PERIOD_MS, DEFAULT_TIMEOUT_SECS,
    MAX_OUTPUT_SIZE,
};

/// Default configuration file name, resolved against the working directory
pub const DEFAULT_CONFIG_FILE: &str = "scriptgate.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// HTTP server configuration
    pub server: ServerConfig,

    /// Script execution configuration
    pub scripts: ScriptsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,

    /// Fixed listen port; discovery is used when unset
    pub port: Option<u16>,

    /// Directory served under /static
    pub static_dir: PathBuf,

    /// HTML template for the submission form
    pub template_path: PathBuf,

    /// Maximum accepted request body size
    pub body_limit_bytes: usize,

    /// First port tried by discovery
    pub port_range_start: u16,

    /// Number of ports in the discovery range
    pub port_range_len: u16,

    /// Per-request timeout in seconds, on top of the script timeout
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: None,
            static_dir: PathBuf::from("static"),
            template_path: PathBuf::from("templates/form.html"),
            body_limit_bytes: 1024 * 1024,
            port_range_start: 8001,
            port_range_len: 15,
            request_timeout_secs: 60,
        }
    }
}

/// Script execution configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScriptsConfig {
    /// Root holding python/, bash/ and zsh/
    pub scripts_dir: PathBuf,

    /// Maximum wall-clock time per execution
    pub max_execution_time_secs: u64,

    /// Exact script names that may run
    pub allowed_scripts: Vec<String>,

    /// Delay between SIGTERM and SIGKILL
    pub kill_grace_period_ms: u64,

    /// Cap on captured output
    pub max_output_bytes: usize,

    /// Interpreter per script type
    pub interpreters: Interpreters,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            scripts_dir: PathBuf::from("scripts"),
            max_execution_time_secs: DEFAULT_TIMEOUT_SECS,
            allowed_scripts: vec![
                "script1.py".to_string(),
                "script2.py".to_string(),
                "script1.sh".to_string(),
                "script1.zsh".to_string(),
            ],
            kill_grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            max_output_bytes: MAX_OUTPUT_SIZE,
            interpreters: Interpreters::default(),
        }
    }
}

impl Config {
    /// Load configuration from ./scriptgate.toml
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        Self::load_from_path(Self::config_path())
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed, or if
    /// the result fails validation.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    /// Load configuration, reading overrides through `env`
    pub fn load_with_env<P, F>(path: P, env: F) -> Result<Self>
    where
        P: AsRef<Path>,
        F: Fn(&str) -> Option<String>,
    {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };

        let config = config.apply_env_overrides(env);
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    pub fn config_path() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - SCRIPTGATE_LOG_LEVEL
    /// - SCRIPTGATE_LOG_FORMAT
    /// - SCRIPTGATE_SCRIPTS_DIR
    /// - SCRIPTGATE_MAX_EXECUTION_SECS
    ///
    /// An empty directory or an unparseable timeout is ignored; log settings
    /// are checked later by [`Config::validate`].
    fn apply_env_overrides<F>(mut self, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = env("SCRIPTGATE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = env("SCRIPTGATE_LOG_FORMAT") {
            self.logging.format = format;
        }

        if let Some(dir) = env("SCRIPTGATE_SCRIPTS_DIR") {
            if !dir.is_empty() {
                self.scripts.scripts_dir = PathBuf::from(dir);
            }
        }
        if let Some(secs) = env("SCRIPTGATE_MAX_EXECUTION_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                if secs > 0 {
                    self.scripts.max_execution_time_secs = secs;
                }
            }
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        if self.server.body_limit_bytes == 0 {
            anyhow::bail!("Body limit must be > 0");
        }
        if self.server.port_range_len == 0 {
            anyhow::bail!("Port range length must be > 0");
        }
        if self.server.port_range_start.checked_add(self.server.port_range_len - 1).is_none() {
            anyhow::bail!("Port range exceeds 65535");
        }
        if self.server.request_timeout_secs == 0 {
            anyhow::bail!("Request timeout must be > 0");
        }

        if self.scripts.max_execution_time_secs == 0 {
            anyhow::bail!("Max execution time must be > 0");
        }
        // A run must be able to time out and be reaped before the request does.
        let run_limit = self
            .max_execution_time()
            .saturating_add(Duration::from_millis(self.scripts.kill_grace_period_ms));
        if Duration::from_secs(self.server.request_timeout_secs) <= run_limit {
            anyhow::bail!(
                "Request timeout ({}s) must exceed max execution time plus kill grace period ({:?})",
                self.server.request_timeout_secs,
                run_limit
            );
        }
        if self.scripts.max_output_bytes == 0 {
            anyhow::bail!("Max output size must be > 0");
        }
        if self.scripts.allowed_scripts.is_empty() {
            anyhow::bail!("At least one allowed script must be configured");
        }
        for script in &self.scripts.allowed_scripts {
            if has_path_characters(script) {
                anyhow::bail!("Allowed script '{}' must be a bare file name", script);
            }
            if ![".py", ".sh", ".zsh"].iter().any(|ext| script.ends_with(ext)) {
                anyhow::bail!("Allowed script '{}' must end in .py, .sh or .zsh", script);
            }
        }

        let interpreters = &self.scripts.interpreters;
        for (name, command) in [
            ("python", &interpreters.python),
            ("bash", &interpreters.bash),
            ("zsh", &interpreters.zsh),
        ] {
            if command.trim().is_empty() {
                anyhow::bail!("Interpreter for '{}' must not be empty", name);
            }
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }

    /// Maximum wall-clock time per execution
    pub fn max_execution_time(&self) -> Duration {
        Duration::from_secs(self.scripts.max_execution_time_secs)
    }

    /// Build the executor parameters described by this configuration
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig::new(
            self.scripts.scripts_dir.clone(),
            self.max_execution_time(),
            self.scripts.allowed_scripts.clone(),
        )
        .with_grace_period(Duration::from_millis(self.scripts.kill_grace_period_ms))
        .with_max_output_size(self.scripts.max_output_bytes)
        .with_interpreters(self.scripts.interpreters.clone())
    }
}
