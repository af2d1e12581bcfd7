//! HTTP front end
//!
//! Routes:
//!
//! | Method | Path          | Handler                     |
//! |--------|---------------|-----------------------------|
//! | GET    | `/`           | form with a fresh CSRF token |
//! | POST   | `/run-script` | validate, execute, JSON      |
//! | GET    | `/static/*`   | static assets               |
//! | GET    | `/health`     | liveness                    |
//! | GET    | `/metrics`    | Prometheus text             |
//!
//! Every response carries the security headers; every request passes the
//! rate limiter first.

pub mod csrf;
pub mod handlers;
pub mod response;
pub mod security;

use anyhow::{Context, Result};
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

use crate::config::ServerConfig;
use crate::scripts::ScriptExecutor;
use security::{AllowAll, RateLimiter};

/// State shared by all handlers
#[derive(Clone)]
pub struct AppState {
    pub executor: Arc<ScriptExecutor>,
    pub template_path: PathBuf,
    pub rate_limiter: Arc<dyn RateLimiter>,
    /// Cancelled on shutdown; running scripts are stopped through child tokens
    pub shutdown: CancellationToken,
}

impl AppState {
    /// State with the permissive rate limiter
    pub fn new(executor: ScriptExecutor, template_path: impl Into<PathBuf>) -> Self {
        Self {
            executor: Arc::new(executor),
            template_path: template_path.into(),
            rate_limiter: Arc::new(AllowAll),
            shutdown: CancellationToken::new(),
        }
    }

    /// Replace the rate limiter
    pub fn with_rate_limiter(mut self, limiter: Arc<dyn RateLimiter>) -> Self {
        self.rate_limiter = limiter;
        self
    }

    /// Use an externally owned shutdown token
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

/// Build the application router with its middleware stack
///
/// Layers, innermost first: body limit, rate limiter, security headers,
/// request timeout, request tracing.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/", get(handlers::form_page))
        .route("/run-script", post(handlers::run_script))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics_text))
        .nest_service("/static", ServeDir::new(&config.static_dir))
        .layer(DefaultBodyLimit::max(config.body_limit_bytes))
        .layer(middleware::from_fn_with_state(state.clone(), security::rate_limit))
        .layer(middleware::from_fn(security::security_headers))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(config.request_timeout_secs),
        ))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

/// Serve `router` on `addr` until `shutdown` fires
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(router: Router, addr: &str, shutdown: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(addr = %listener.local_addr().context("Listener has no local address")?, "ScriptGate listening");

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await
    .context("HTTP server error")?;

    info!("Server stopped");
    Ok(())
}
