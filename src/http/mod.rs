//! HTTP surface (spec §6).
//!
//! Enriched onto this codebase from scratch — the router/state/error-enum
//! shape follows the axum conventions used elsewhere in the corpus: a
//! `Router<Arc<AppState>>` with one handler function per route and a single
//! `ApiError` type implementing `IntoResponse`.

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::CONTENT_LENGTH;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::http::error::ApiError;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let json_limit = state.config.json_limit_bytes;

    Router::new()
        .route("/events", post(handlers::post_events))
        .route("/ingest", post(handlers::post_ingest))
        .route("/health", get(handlers::get_health))
        .route("/store/recent", get(handlers::get_store_recent))
        .route("/sync/status", get(handlers::get_sync_status))
        .route("/sync/run", post(handlers::post_sync_run))
        .route("/fallback/status", get(handlers::get_fallback_status))
        .route("/fallback/tail", get(handlers::get_fallback_tail))
        .route("/replay/status", get(handlers::get_replay_status))
        .route("/replay/run", post(handlers::post_replay_run))
        .fallback(handlers::not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            enforce_json_limit,
        ))
        // Defense in depth: a client lying about Content-Length (or a
        // chunked body with none at all) is still bounded here, just with a
        // plain-text 413 instead of our JSON error shape.
        .layer(tower_http::limit::RequestBodyLimitLayer::new(json_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Reject oversized bodies with the spec's JSON `PAYLOAD_TOO_LARGE` shape
/// (spec §6/§7) before they ever reach a handler, using the declared
/// `Content-Length` header against `JSON_LIMIT`.
async fn enforce_json_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let declared_len = request
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());

    if let Some(len) = declared_len {
        if len > state.config.json_limit_bytes {
            return ApiError::PayloadTooLarge(format!(
                "body of {len} bytes exceeds JSON_LIMIT of {} bytes",
                state.config.json_limit_bytes
            ))
            .into_response();
        }
    }

    next.run(request).await
}

/// Free bytes on the filesystem backing `path` — used by `/health` (spec
/// §11 supplement, ported from the original heartbeat's disk-free check).
#[cfg(unix)]
pub fn disk_free_bytes(path: &std::path::Path) -> u64 {
    use std::ffi::CString;
    use std::mem::MaybeUninit;

    let probe = if path.exists() {
        path.to_path_buf()
    } else {
        path.parent().map(|p| p.to_path_buf()).unwrap_or_default()
    };
    let path_str = match CString::new(probe.to_string_lossy().as_bytes()) {
        Ok(s) => s,
        Err(_) => return 0,
    };

    unsafe {
        let mut stat: MaybeUninit<libc::statvfs> = MaybeUninit::uninit();
        if libc::statvfs(path_str.as_ptr(), stat.as_mut_ptr()) == 0 {
            let s = stat.assume_init();
            (s.f_bavail as u64) * (s.f_frsize as u64)
        } else {
            0
        }
    }
}

#[cfg(not(unix))]
pub fn disk_free_bytes(_path: &std::path::Path) -> u64 {
    0
}
