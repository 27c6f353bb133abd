//! Shared helpers for the HTTP integration tests below — builds a real
//! `AppState`/router pair against a fresh temp directory so each test gets
//! its own spool/replay-state files, no network, and no shared mutable
//! state between tests (mirrors `ferrex-server`'s `setup_test_state`).

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use ingest_gateway::config::{Config, OpsMode, ReplayMode};
use ingest_gateway::state::AppState;
use tempfile::TempDir;
use tower::ServiceExt;

pub fn base_config(dir: &std::path::Path, ops_mode: OpsMode) -> Config {
    Config {
        port: 0,
        ops_mode,
        external_sync: false,
        json_limit_bytes: 2 * 1024 * 1024,
        dedupe_window_ms: 2000,
        store_limit: 200,
        queue_limit: 500,
        worker_interval_ms: 1500,
        worker_batch_size: 5,
        worker_max_retry: 5,
        worker_backoff_base_ms: 2000,
        sheet_id: None,
        events_sheet_name: "events".to_string(),
        google_service_account_json_b64: None,
        google_service_account_json: None,
        gas_webapp_url: None,
        itplaylab_secret: None,
        gas_timeout_ms: 2500,
        jsonl_fallback: false,
        jsonl_always: false,
        jsonl_dir: dir.to_path_buf(),
        jsonl_file: "ingest_fallback.jsonl".to_string(),
        jsonl_max_bytes: 104_857_600,
        jsonl_tail_max_bytes: 2_097_152,
        replay_enabled: false,
        replay_interval_ms: 3000,
        replay_batch_size: 10,
        replay_max_bytes_per_tick: 1_048_576,
        replay_mode: ReplayMode::FallbackOnly,
        replay_state_file: "replay_state.json".to_string(),
    }
}

/// A test harness bundling the temp dir (kept alive for the test's
/// duration) with the router built on top of it.
pub struct Harness {
    pub _dir: TempDir,
    pub router: Router,
    pub state: Arc<AppState>,
}

pub fn harness_with(config: Config) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config;
    config.jsonl_dir = dir.path().to_path_buf();
    let state = Arc::new(AppState::new(config).unwrap());
    let router = ingest_gateway::http::router(state.clone());
    Harness {
        _dir: dir,
        router,
        state,
    }
}

pub fn harness(ops_mode: OpsMode) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = base_config(dir.path(), ops_mode);
    harness_with(config)
}

pub async fn post_json(router: &Router, path: &str, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    send(router, request).await
}

pub async fn post_empty(router: &Router, path: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("POST")
        .uri(path)
        .body(Body::empty())
        .unwrap();
    send(router, request).await
}

pub async fn get(router: &Router, path: &str) -> (StatusCode, serde_json::Value) {
    let request = Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .unwrap();
    send(router, request).await
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}
