//! Transport-level protections
//!
//! - security response headers on every route
//! - client identification for security events
//! - the rate limiting seam

use async_trait::async_trait;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::USER_AGENT;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use tracing::{info, warn};

use super::response::ApiError;
use super::AppState;

/// Content security policy sent with every response
pub const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; script-src 'self' 'unsafe-inline' cdn.jsdelivr.net; style-src 'self' 'unsafe-inline' cdn.jsdelivr.net; font-src 'self'; img-src 'self' data: cdn.jsdelivr.net";

const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("x-xss-protection", "1; mode=block"),
    ("content-security-policy", CONTENT_SECURITY_POLICY),
];

/// Middleware adding the security headers to every response
pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    for &(name, value) in SECURITY_HEADERS {
        headers.insert(HeaderName::from_static(name), HeaderValue::from_static(value));
    }
    response
}

/// Who sent a request, as far as the transport can tell
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub ip: String,
    pub user_agent: String,
}

impl ClientInfo {
    /// Identify the client
    ///
    /// IP order: first `X-Forwarded-For` entry, `X-Real-IP`, peer address.
    pub fn from_parts(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let ip = header_value(headers, "x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .or_else(|| header_value(headers, "x-real-ip"))
            .map(str::to_string)
            .or_else(|| peer.map(|addr| addr.to_string()))
            .unwrap_or_else(|| "unknown".to_string());

        let user_agent = headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        Self { ip, user_agent }
    }

    /// Identify the client of a request
    pub fn from_request(request: &Request) -> Self {
        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Self::from_parts(request.headers(), peer)
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Security-relevant events worth an audit line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    FormParseError,
    MissingCsrfToken,
    InvalidUserId,
    InvalidScript,
    RateLimited,
    ScriptExecutionRequest,
    ScriptExecutionCompleted,
}

impl SecurityEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            SecurityEvent::FormParseError => "form_parse_error",
            SecurityEvent::MissingCsrfToken => "missing_csrf_token",
            SecurityEvent::InvalidUserId => "invalid_user_id",
            SecurityEvent::InvalidScript => "invalid_script",
            SecurityEvent::RateLimited => "rate_limited",
            SecurityEvent::ScriptExecutionRequest => "script_execution_request",
            SecurityEvent::ScriptExecutionCompleted => "script_execution_completed",
        }
    }

    /// Whether the event indicates a refused or suspicious request
    pub fn is_rejection(self) -> bool {
        !matches!(
            self,
            SecurityEvent::ScriptExecutionRequest | SecurityEvent::ScriptExecutionCompleted
        )
    }
}

/// Emit one security event
pub fn log_security_event(event: SecurityEvent, client: &ClientInfo, details: &str) {
    if event.is_rejection() {
        warn!(
            event = event.as_str(),
            client_ip = %client.ip,
            user_agent = %client.user_agent,
            details,
            "Security event"
        );
    } else {
        info!(
            event = event.as_str(),
            client_ip = %client.ip,
            user_agent = %client.user_agent,
            details,
            "Security event"
        );
    }
}

/// Decides whether a client may make another request
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check(&self, client: &ClientInfo) -> bool;
}

/// Limiter that never refuses
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

#[async_trait]
impl RateLimiter for AllowAll {
    async fn check(&self, _client: &ClientInfo) -> bool {
        true
    }
}

/// Middleware consulting the configured [`RateLimiter`]
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let client = ClientInfo::from_request(&request);
    if !state.rate_limiter.check(&client).await {
        log_security_event(SecurityEvent::RateLimited, &client, request.uri().path());
        crate::metrics::record_rejection("rate_limited");
        return ApiError::RateLimited.into_response();
    }
    next.run(request).await
}
