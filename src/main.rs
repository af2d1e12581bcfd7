// ScriptGate - Main Entry Point
//
// Serves the script submission form, or runs one allow-listed script from the
// command line through the same executor.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use scriptgate::config::Config;
use scriptgate::scripts::{ExecutionRequest, ScriptExecutor};
use scriptgate::server::{self, AppState};
use scriptgate::{logging, metrics, port};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// ScriptGate: allow-listed script runner
#[derive(Parser, Debug)]
#[command(name = "scriptgate")]
#[command(author = "ScriptGate Contributors")]
#[command(version)]
#[command(about = "Run allow-listed scripts for validated users behind a web form", long_about = None)]
struct Args {
    /// Configuration file (default: ./scriptgate.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server (default)
    Serve {
        /// Listen port; overrides PORT and the config file
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one script and print its output
    Run {
        /// Script file name, e.g. script1.py
        script: String,

        /// User identifier passed as the first script argument
        user_id: String,

        /// Extra arguments appended after the user identifier
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    logging::init(&config.logging, args.verbose)?;

    match args.command {
        Some(Commands::Run {
            script,
            user_id,
            args,
        }) => run_once(&config, script, user_id, args).await,
        Some(Commands::Serve { port }) => {
            serve(&config, port).await?;
            Ok(ExitCode::SUCCESS)
        }
        None => {
            serve(&config, None).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Start the web server and block until shutdown
async fn serve(config: &Config, cli_port: Option<u16>) -> Result<()> {
    metrics::init().context("Failed to initialize metrics")?;

    let executor = ScriptExecutor::new(config.executor_config())
        .context("Failed to create script executor")?;

    let env_port = std::env::var("PORT").ok();
    // --port, then PORT, then the config file, then discovery
    let port = match (cli_port, env_port.as_deref(), config.server.port) {
        (Some(port), _, _) => port.to_string(),
        (None, Some(env), _) if !env.is_empty() => env.to_string(),
        (None, _, Some(port)) => port.to_string(),
        _ => port::find_available_port(
            env_port.as_deref(),
            &config.server.host,
            config.server.port_range_start,
            config.server.port_range_len,
        )?,
    };
    let addr = format!("{}:{}", config.server.host, port);

    let shutdown = CancellationToken::new();
    let state = AppState::new(executor, config.server.template_path.clone()).with_shutdown(shutdown.clone());
    let router = server::build_router(state, &config.server);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        scripts_dir = %config.scripts.scripts_dir.display(),
        allowed = config.scripts.allowed_scripts.len(),
        "ScriptGate starting on port {}",
        port
    );

    tokio::spawn(wait_for_shutdown(shutdown.clone()));
    server::serve(router, &addr, shutdown).await
}

/// Run a single script from the command line
async fn run_once(config: &Config, script: String, user_id: String, args: Vec<String>) -> Result<ExitCode> {
    let executor = ScriptExecutor::new(config.executor_config())
        .context("Failed to create script executor")?;

    let request = ExecutionRequest::new(user_id, script).with_arguments(args);

    let cancel = CancellationToken::new();
    tokio::spawn(wait_for_shutdown(cancel.clone()));

    let result = match executor.execute_with_cancel(&request, &cancel).await {
        Ok(result) => result,
        Err(err) => {
            eprintln!("{}", err.result().error);
            return Ok(ExitCode::FAILURE);
        }
    };

    print!("{}", result.output);
    eprintln!("{}", result.summary());

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Cancel `token` on Ctrl-C or SIGTERM
async fn wait_for_shutdown(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
    token.cancel();
}
