//! Structured Logging
//!
//! Builds the process-wide `tracing` subscriber from [`LoggingConfig`]:
//!
//! - `compact` (default): one line per event
//! - `pretty`: multi-line, for local debugging
//! - `json`: one JSON object per event, for log shippers
//!
//! `RUST_LOG` directives are honoured on top of the configured level.

use anyhow::{Context, Result};
use tracing::{Level, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Output format for log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl LogFormat {
    /// Parse a configured format name (case-insensitive)
    pub fn parse(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("Unknown log format: {}", other),
        }
    }
}

/// Resolve the effective level; `verbose` forces DEBUG
pub fn effective_level(config: &LoggingConfig, verbose: bool) -> Result<Level> {
    if verbose {
        return Ok(Level::DEBUG);
    }
    config
        .level
        .to_lowercase()
        .parse()
        .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
}

/// Knobs that come from the process rather than the config file
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    /// Force DEBUG regardless of the configured level
    pub verbose: bool,

    /// Extra filter directives, normally the value of `RUST_LOG`
    pub directives: Option<String>,

    /// Colourise output
    pub ansi: bool,
}

impl LogOptions {
    /// Options for the running process
    pub fn from_env(verbose: bool) -> Self {
        use std::io::IsTerminal;

        Self {
            verbose,
            directives: std::env::var(EnvFilter::DEFAULT_ENV).ok(),
            ansi: std::io::stderr().is_terminal(),
        }
    }
}

/// Build a subscriber writing to `writer`
pub fn build_subscriber<W>(
    config: &LoggingConfig,
    options: &LogOptions,
    writer: W,
) -> Result<Box<dyn Subscriber + Send + Sync>>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let level = effective_level(config, options.verbose)?;
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .parse_lossy(options.directives.as_deref().unwrap_or_default());

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(options.ansi)
        .with_target(true);

    let subscriber: Box<dyn Subscriber + Send + Sync> = match LogFormat::parse(&config.format)? {
        LogFormat::Compact => Box::new(builder.compact().finish()),
        LogFormat::Pretty => Box::new(builder.pretty().finish()),
        LogFormat::Json => Box::new(builder.json().finish()),
    };

    Ok(subscriber)
}

/// Install the global subscriber, logging to stderr
///
/// # Errors
///
/// Returns an error if the configuration is invalid or a global subscriber
/// is already installed.
pub fn init(config: &LoggingConfig, verbose: bool) -> Result<()> {
    let subscriber = build_subscriber(config, &LogOptions::from_env(verbose), std::io::stderr)?;
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to install tracing subscriber")?;
    Ok(())
}
