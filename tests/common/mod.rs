//! Shared helpers for HTTP integration tests.
#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

use scriptgate::config::ServerConfig;
use scriptgate::scripts::{ExecutorConfig, ScriptExecutor};
use scriptgate::server::{build_router, AppState};

/// A router over a temporary scripts directory
pub struct TestApp {
    pub router: Router,
    pub dir: TempDir,
}

/// Scripts every test app provides
pub const ALLOWED: &[&str] = &["hello.sh", "fail.sh", "slow.sh", "orphan.sh", "missing.sh"];

fn write_script(root: &Path, name: &str, body: &str) {
    fs::write(root.join("bash").join(name), body).unwrap();
}

pub fn manifest_path(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join(relative)
}

/// Build a test `ServerConfig` pointing at the repository's template and assets
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: None,
        static_dir: manifest_path("static"),
        template_path: manifest_path("templates/form.html"),
        body_limit_bytes: 1024 * 1024,
        port_range_start: 8001,
        port_range_len: 15,
        request_timeout_secs: 30,
    }
}

/// Build the application with the production middleware stack
pub fn build_test_app() -> TestApp {
    build_test_app_with(test_config(), |state| state)
}

pub fn build_test_app_with(config: ServerConfig, customize: impl FnOnce(AppState) -> AppState) -> TestApp {
    build_test_app_with_limit(config, Duration::from_secs(1), customize)
}

/// Like [`build_test_app_with`] with a chosen script time limit
pub fn build_test_app_with_limit(
    config: ServerConfig,
    max_execution_time: Duration,
    customize: impl FnOnce(AppState) -> AppState,
) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let scripts = dir.path().join("scripts");
    for sub in ["python", "bash", "zsh"] {
        fs::create_dir_all(scripts.join(sub)).unwrap();
    }
    write_script(&scripts, "hello.sh", "echo \"hello $1\"\n");
    write_script(&scripts, "fail.sh", "echo partial\necho oops >&2\nexit 4\n");
    write_script(&scripts, "slow.sh", "sleep 10\n");
    write_script(
        &scripts,
        "orphan.sh",
        &format!("sleep 30 &\necho $! > {}\nsleep 10\n", orphan_pid_file(dir.path()).display()),
    );

    let executor = ScriptExecutor::new(
        ExecutorConfig::new(
            &scripts,
            max_execution_time,
            ALLOWED.iter().map(|s| s.to_string()).collect(),
        )
        .with_grace_period(Duration::from_millis(200)),
    )
    .unwrap();

    let state = customize(AppState::new(executor, config.template_path.clone()));
    TestApp {
        router: build_router(state, &config),
        dir,
    }
}

/// Where `orphan.sh` records the pid of the process it leaves behind
pub fn orphan_pid_file(root: &Path) -> PathBuf {
    root.join("orphan.pid")
}

/// Whether `pid` is running; zombies count as gone
#[cfg(target_os = "linux")]
pub fn is_running(pid: u32) -> bool {
    let Ok(stat) = fs::read_to_string(format!("/proc/{}/stat", pid)) else {
        return false;
    };
    match stat.rfind(')') {
        Some(end) => !matches!(stat[end + 1..].trim_start().chars().next(), Some('Z') | Some('X')),
        None => false,
    }
}

pub async fn send(app: &TestApp, request: Request<Body>) -> Response<Body> {
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &TestApp, uri: &str) -> Response<Body> {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

/// POST an urlencoded form
pub async fn post_form(app: &TestApp, body: &str) -> Response<Body> {
    let request = Request::post("/run-script")
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
