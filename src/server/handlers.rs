//! Route handlers

use axum::extract::{FromRequest, Multipart, Query, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Form;
use std::sync::Arc;
use tracing::{error, warn};

use super::csrf::{self, CSRF_FIELD};
use super::response::{ApiError, ApiResponse};
use super::security::{log_security_event, ClientInfo, SecurityEvent};
use super::AppState;
use crate::metrics;
use crate::scripts::{ExecutionError, ExecutionRequest};

const TOKEN_PLACEHOLDER: &str = "{{csrf_token}}";
const OPTIONS_PLACEHOLDER: &str = "{{script_options}}";

/// Submitted form fields, body values first, then query values
#[derive(Debug, Default)]
pub struct FormFields {
    pairs: Vec<(String, String)>,
}

impl FormFields {
    /// First value for `name`
    pub fn get(&self, name: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// First value for `name`, trimmed; empty if absent
    pub fn trimmed(&self, name: &str) -> &str {
        self.get(name).map(str::trim).unwrap_or_default()
    }
}

/// Read urlencoded or multipart fields from a request
async fn read_form(request: Request) -> Result<FormFields, ApiError> {
    let mut query_pairs = Query::<Vec<(String, String)>>::try_from_uri(request.uri())
        .map(|Query(pairs)| pairs)
        .unwrap_or_default();

    let content_type = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_lowercase();

    let mut pairs = if content_type.starts_with("multipart/form-data") {
        read_multipart(request).await?
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        let Form(pairs) = Form::<Vec<(String, String)>>::from_request(request, &())
            .await
            .map_err(|rejection| {
                if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                    ApiError::PayloadTooLarge
                } else {
                    ApiError::BadForm(rejection.body_text())
                }
            })?;
        pairs
    } else {
        Vec::new()
    };

    pairs.append(&mut query_pairs);
    Ok(FormFields { pairs })
}

async fn read_multipart(request: Request) -> Result<Vec<(String, String)>, ApiError> {
    let mut multipart = Multipart::from_request(request, &())
        .await
        .map_err(|rejection| ApiError::BadForm(rejection.body_text()))?;

    let mut pairs = Vec::new();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) if err.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                return Err(ApiError::PayloadTooLarge)
            }
            Err(err) => return Err(ApiError::BadForm(err.body_text())),
        };

        // Uploaded files are not form fields
        if field.file_name().is_some() {
            continue;
        }
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        let value = field
            .text()
            .await
            .map_err(|err| ApiError::BadForm(err.body_text()))?;
        pairs.push((name, value));
    }
    Ok(pairs)
}

/// `GET /`: the submission form with a fresh CSRF token
pub async fn form_page(State(state): State<AppState>) -> Response {
    let template = match tokio::fs::read_to_string(&state.template_path).await {
        Ok(template) => template,
        Err(err) => {
            error!(path = %state.template_path.display(), error = %err, "Failed to read form template");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response();
        }
    };

    let token = csrf::generate_token();
    let options: String = state
        .executor
        .validator()
        .allowed_scripts()
        .iter()
        .map(|script| {
            let escaped = escape_html(script);
            format!("<option value=\"{escaped}\">{escaped}</option>\n")
        })
        .collect();

    let page = template
        .replace(TOKEN_PLACEHOLDER, &token)
        .replace(OPTIONS_PLACEHOLDER, &options);

    Html(page).into_response()
}

/// `POST /run-script`: validate the form and run the script
pub async fn run_script(State(state): State<AppState>, request: Request) -> Response {
    let client = ClientInfo::from_request(&request);
    let headers = request.headers().clone();

    let fields = match read_form(request).await {
        Ok(fields) => fields,
        Err(err) => {
            log_security_event(SecurityEvent::FormParseError, &client, &err.to_string());
            metrics::record_rejection("form_parse_error");
            return err.into_response();
        }
    };

    if csrf::presented_token(&headers, fields.get(CSRF_FIELD)).is_none() {
        log_security_event(
            SecurityEvent::MissingCsrfToken,
            &client,
            "no token in headers or form",
        );
        metrics::record_rejection("missing_csrf_token");
        return ApiError::MissingCsrf.into_response();
    }

    let user_id = fields.trimmed("userId");
    let script = fields.trimmed("script");
    let validator = state.executor.validator();

    if !validator.validate_user_id(user_id) {
        log_security_event(SecurityEvent::InvalidUserId, &client, user_id);
        metrics::record_rejection("invalid_user_id");
        return ApiError::InvalidUserId.into_response();
    }

    if !validator.validate_script(script) {
        log_security_event(SecurityEvent::InvalidScript, &client, script);
        metrics::record_rejection("invalid_script");
        return ApiError::ScriptNotAllowed.into_response();
    }

    log_security_event(
        SecurityEvent::ScriptExecutionRequest,
        &client,
        &format!("user:{} script:{}", user_id, script),
    );

    // The run lives in its own task so the executor's terminate-and-reap path
    // still runs when this handler is dropped by a disconnect or the request
    // timeout; dropping the guard cancels it.
    let req = ExecutionRequest::new(user_id, script);
    let cancel = state.shutdown.child_token();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let executor = Arc::clone(&state.executor);
    let task = tokio::spawn(async move { executor.execute_with_cancel(&req, &cancel).await });

    let outcome = match task.await {
        Ok(outcome) => outcome,
        Err(err) => {
            return ApiError::Execution(format!("execution task failed: {}", err)).into_response();
        }
    };

    let result = match outcome {
        Ok(result) => result,
        Err(err @ ExecutionError::InvalidRequest { .. }) => {
            warn!(error = %err, "Executor rejected request");
            return ApiError::InvalidRequest(err.to_string()).into_response();
        }
        Err(err @ ExecutionError::UnsafePath { .. }) => {
            return ApiError::Execution(err.to_string()).into_response();
        }
    };

    log_security_event(
        SecurityEvent::ScriptExecutionCompleted,
        &client,
        &format!(
            "user:{} script:{} success:{} duration:{:?} exit_code:{}",
            user_id, script, result.success, result.duration, result.exit_code
        ),
    );

    (StatusCode::OK, axum::Json(ApiResponse::from_result(&result))).into_response()
}

/// `GET /health`
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// `GET /metrics`: Prometheus text format
pub async fn metrics_text() -> Response {
    match metrics::gather_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text).into_response(),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error gathering metrics: {}", e),
            )
                .into_response()
        }
    }
}

/// Escape text for an HTML element or quoted attribute
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
