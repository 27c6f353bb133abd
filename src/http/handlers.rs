//! Route handlers (spec §4.11, §6 — Ingest Controller + status endpoints).

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::http::error::ApiError;
use crate::ids::{new_event_id, new_job_id, new_trace_id, now_iso, now_ms};
use crate::model::{AcceptedEvent, EventMeta, EventsBody, IngestBody, PackedPayload, SpoolRecord};
use crate::state::AppState;
use crate::summary::SummaryRecord;
use crate::workers::{queue_worker, replay_worker};

type SharedState = Arc<AppState>;

fn client_meta(headers: &HeaderMap, source: &str, user_id: &str) -> EventMeta {
    let ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or(v).trim().to_string());
    let ua = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    EventMeta {
        source: source.to_string(),
        user_id: user_id.to_string(),
        ip,
        ua,
    }
}

#[derive(Serialize)]
struct EventsResponse {
    ok: bool,
    received: usize,
    appended: usize,
    dropped_duplicates: usize,
    latency_ms: u64,
    mode: &'static str,
    bytes: usize,
    stored: usize,
    duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    queue_length: Option<usize>,
    external: bool,
}

/// `POST /events` — accepts either the standard `{events:[...]}` shape or a
/// legacy `{action:"append_events_tsv", lines:[...]}` shape.
pub async fn post_events(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<Json<EventsResponse>, ApiError> {
    let started = Instant::now();
    let bytes_len = body.len();
    state.bump_received();

    let parsed: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))?;
    let events_body: EventsBody = serde_json::from_value(parsed)
        .map_err(|e| ApiError::BadRequest(format!("unrecognised /events body: {e}")))?;

    let mut accepted: Vec<AcceptedEvent> = Vec::new();
    let mut dropped_duplicates = 0usize;
    let now = now_ms();

    if let Some(items) = &events_body.events {
        for item in items {
            let source = item
                .source
                .clone()
                .or_else(|| events_body.source.clone())
                .unwrap_or_else(|| "unknown".to_string());
            let user_id = item
                .user_id
                .clone()
                .or_else(|| events_body.user_id.clone())
                .unwrap_or_else(|| "anonymous".to_string());
            let event_type = item.event_type.clone().unwrap_or_else(|| "unknown".to_string());
            let id = item
                .event_id
                .clone()
                .unwrap_or_else(|| new_event_id(&source, &user_id));

            let canonical = serde_json::to_vec(item).unwrap_or_default();
            let fingerprint = crate::model::sha256_hex(&canonical);

            let is_duplicate = state.mode.store_enabled()
                && state.dedupe.lock().unwrap().check_and_record(&fingerprint, now);
            if is_duplicate {
                dropped_duplicates += 1;
                continue;
            }

            let meta = client_meta(&headers, &source, &user_id);
            let payload = PackedPayload::new(
                event_type,
                item.occurred_at.clone(),
                meta,
                item.payload.clone(),
                json!(item),
            );
            accepted.push(AcceptedEvent {
                id,
                fingerprint,
                payload,
            });
        }
    } else if events_body.action.as_deref() == Some("append_events_tsv") {
        let lines = events_body.lines.clone().unwrap_or_default();
        let default_source = events_body.source.clone().unwrap_or_else(|| "legacy".to_string());
        let default_user = events_body.user_id.clone().unwrap_or_else(|| "anonymous".to_string());

        for line in &lines {
            let (id, raw_payload) = match line.split_once('\t') {
                Some((id, rest)) => (id.to_string(), rest.to_string()),
                None => (new_event_id(&default_source, &default_user), line.clone()),
            };
            let fingerprint = id.clone();

            let is_duplicate = state.mode.store_enabled()
                && state.dedupe.lock().unwrap().check_and_record(&fingerprint, now);
            if is_duplicate {
                dropped_duplicates += 1;
                continue;
            }

            let data = serde_json::from_str::<Value>(&raw_payload)
                .unwrap_or_else(|_| json!({ "raw_line": line }));
            let meta = client_meta(&headers, &default_source, &default_user);
            let payload = PackedPayload::new(
                "legacy.tsv",
                None,
                meta,
                data.clone(),
                json!({"raw_line": line}),
            );
            accepted.push(AcceptedEvent {
                id,
                fingerprint,
                payload,
            });
        }
    } else {
        return Err(ApiError::BadRequest(
            "body must contain `events` or `action:\"append_events_tsv\"` + `lines`".to_string(),
        ));
    }

    let received = accepted.len() + dropped_duplicates;
    let appended = accepted.len();

    if state.mode.store_enabled() {
        let mut summary = state.summary.lock().unwrap();
        for event in &accepted {
            summary.push(SummaryRecord {
                ts_ms: now,
                fingerprint: event.fingerprint.clone(),
                bytes: bytes_len,
                duplicate: false,
            });
        }
    }

    let mut queue_length = None;
    if state.mode.sync_enabled() {
        // One queue item per request, carrying the whole canonical body
        // (spec §4.11/§9; contract documented in DESIGN.md) — not one item
        // per event, which would duplicate the entire body into the sink
        // once per accepted event.
        if let Some(first) = accepted.first() {
            let canonical_body = String::from_utf8_lossy(&body).to_string();
            let mut queue = state.queue.lock().unwrap();
            queue.enqueue(crate::queue::QueueItem {
                id: first.id.clone(),
                fingerprint: first.fingerprint.clone(),
                bytes: bytes_len,
                received_at: now_iso(),
                payload_str: canonical_body,
                retry: 0,
                last_error: None,
                next_attempt_at_ms: now,
            });
            queue_length = Some(queue.len());
        } else {
            queue_length = Some(state.queue.lock().unwrap().len());
        }
    }

    let stored = state.summary.lock().unwrap().len();

    Ok(Json(EventsResponse {
        ok: true,
        received,
        appended,
        dropped_duplicates,
        latency_ms: started.elapsed().as_millis() as u64,
        mode: state.mode.mode_label(),
        bytes: bytes_len,
        stored,
        duplicate: dropped_duplicates > 0,
        queue_length,
        external: state.mode.sync_enabled(),
    }))
}

#[derive(Serialize)]
struct IngestResponse {
    ok: bool,
    job_id: String,
    trace_id: String,
    received_at: String,
    latency_ms: u64,
    mode: &'static str,
}

/// `POST /ingest` — single-event path to the webhook, with JSONL spool
/// fallback/audit.
#[tracing::instrument(skip(state, headers, raw_body), fields(job_id, trace_id))]
pub async fn post_ingest(
    State(state): State<SharedState>,
    headers: HeaderMap,
    raw_body: axum::body::Bytes,
) -> Result<Json<IngestResponse>, ApiError> {
    let started = Instant::now();
    let parsed: Value = serde_json::from_slice(&raw_body)
        .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {e}")))?;
    let body: IngestBody = serde_json::from_value(parsed)
        .map_err(|e| ApiError::BadRequest(format!("missing or invalid field: {e}")))?;
    state.bump_received();
    let received_at = now_iso();
    let job_id = new_job_id();
    let trace_id = headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(new_trace_id);

    // Every log line emitted for the rest of this request carries both ids
    // as span fields rather than string-interpolated into each message.
    tracing::Span::current()
        .record("job_id", tracing::field::display(&job_id))
        .record("trace_id", tracing::field::display(&trace_id));

    let payload_value = json!({
        "source": body.source,
        "event_type": body.event_type,
        "payload": body.payload,
    });

    if state.mode.jsonl_always_enabled() {
        let record = SpoolRecord {
            ts: now_iso(),
            kind: "ingest".to_string(),
            stage: "jsonl.always".to_string(),
            reason: None,
            job_id: job_id.clone(),
            trace_id: trace_id.clone(),
            source: body.source.clone(),
            event_type: body.event_type.clone(),
            payload: body.payload.clone(),
            received_at: received_at.clone(),
            ingest_latency_ms: started.elapsed().as_millis() as i64,
            replayed_at: None,
        };
        if let Err(e) = state.spool.append(&record) {
            tracing::warn!(error = %e, "jsonl.always spool append failed");
        }
    }

    let webhook_result = state.webhook.post(&payload_value).await;
    if !webhook_result.ok && state.mode.jsonl_fallback_enabled() {
        let reason = webhook_result
            .error
            .clone()
            .unwrap_or_else(|| "webhook_rejected".to_string());
        let record = SpoolRecord {
            ts: now_iso(),
            kind: "ingest".to_string(),
            stage: "jsonl.fallback".to_string(),
            reason: Some(reason),
            job_id: job_id.clone(),
            trace_id: trace_id.clone(),
            source: body.source.clone(),
            event_type: body.event_type.clone(),
            payload: body.payload.clone(),
            received_at: received_at.clone(),
            ingest_latency_ms: started.elapsed().as_millis() as i64,
            replayed_at: None,
        };
        if let Err(e) = state.spool.append(&record) {
            tracing::warn!(error = %e, "jsonl.fallback spool append failed");
        }
    }

    Ok(Json(IngestResponse {
        ok: true,
        job_id,
        trace_id,
        received_at,
        latency_ms: started.elapsed().as_millis() as u64,
        mode: state.mode.mode_label(),
    }))
}

/// `GET /health` — side-effect-free status snapshot.
pub async fn get_health(State(state): State<SharedState>) -> Json<Value> {
    let spool_path = state.spool.path();
    let spool_bytes = std::fs::metadata(spool_path).map(|m| m.len()).unwrap_or(0);
    let queue_counters = state.queue.lock().unwrap().counters;

    Json(json!({
        "ok": true,
        "mode": state.mode.mode_label(),
        "received": state.received_count.load(std::sync::atomic::Ordering::Relaxed),
        "stored": state.summary.lock().unwrap().len(),
        "queue": {
            "length": state.queue.lock().unwrap().len(),
            "dropped": queue_counters.dropped,
            "synced": queue_counters.synced,
            "failed": queue_counters.failed,
        },
        "jsonl": {
            "enabled": state.mode.jsonl_enabled(),
            "path": spool_path.display().to_string(),
            "bytes": spool_bytes,
        },
        "replay": {
            "enabled": state.mode.replay_enabled(),
        },
        "disk_free_bytes": crate::http::disk_free_bytes(spool_path),
    }))
}

/// `GET /store/recent` — 404 when STORE is disabled (ECHO mode).
pub async fn get_store_recent(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    if !state.mode.store_enabled() {
        return Err(ApiError::NotFound);
    }
    let summary = state.summary.lock().unwrap();
    let recent = summary.tail(20);
    Ok(Json(json!({
        "ok": true,
        "mode": state.mode.mode_label(),
        "stored": summary.len(),
        "recent": recent,
    })))
}

/// `GET /sync/status` — 404 unless `OPS_MODE=FULL`.
pub async fn get_sync_status(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    if !matches!(state.mode.ops_mode, crate::config::OpsMode::Full) {
        return Err(ApiError::NotFound);
    }
    let queue = state.queue.lock().unwrap();
    Ok(Json(json!({
        "ok": true,
        "external": state.mode.sync_enabled(),
        "queue_length": queue.len(),
        "counters": queue.counters,
    })))
}

/// `POST /sync/run` — manual single-tick trigger for the queue worker.
pub async fn post_sync_run(State(state): State<SharedState>) -> Json<Value> {
    if !state.mode.sync_enabled() {
        return Json(json!({"ok": true, "synced": 0, "detail": "Worker disabled"}));
    }
    let result = queue_worker::tick_once(&state).await;
    Json(json!({"ok": true, "result": result}))
}

/// `GET /fallback/status`.
pub async fn get_fallback_status(State(state): State<SharedState>) -> Json<Value> {
    let path = state.spool.path();
    let meta = std::fs::metadata(path).ok();
    Json(json!({
        "path": path.display().to_string(),
        "bytes": meta.as_ref().map(|m| m.len()).unwrap_or(0),
        "updated_at": meta.and_then(|m| m.modified().ok()).map(|t| {
            let datetime: chrono::DateTime<chrono::Utc> = t.into();
            datetime.to_rfc3339()
        }),
    }))
}

#[derive(Deserialize)]
pub struct TailQuery {
    #[serde(default)]
    n: Option<usize>,
}

/// `GET /fallback/tail?n=1..500` (default 50) — tails at most
/// `JSONL_TAIL_MAX_BYTES` from the end of the spool.
pub async fn get_fallback_tail(
    State(state): State<SharedState>,
    Query(query): Query<TailQuery>,
) -> Result<Json<Value>, ApiError> {
    let n = query.n.unwrap_or(50).clamp(1, 500);
    let path = state.spool.path();
    let file_size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let read_offset = file_size.saturating_sub(state.config.jsonl_tail_max_bytes);

    let result = crate::spool::read_from(path, read_offset, state.config.jsonl_tail_max_bytes)
        .map_err(|e| ApiError::Internal(format!("tail read failed: {e}")))?;

    let lines: Vec<Value> = result.lines.into_iter().rev().take(n).rev().collect();
    Ok(Json(json!({
        "ok": true,
        "lines": lines,
    })))
}

/// `GET /replay/status`.
pub async fn get_replay_status(State(state): State<SharedState>) -> Json<Value> {
    let replay_state = state.replay_cache.lock().unwrap().clone();
    Json(json!({
        "replay_enabled": state.mode.replay_enabled(),
        "stats": {
            "sent": replay_state.sent,
            "failed": replay_state.failed,
        },
        "state": replay_state,
        "jsonl": {
            "path": state.spool.path().display().to_string(),
        },
    }))
}

/// `POST /replay/run` — manual single-tick trigger for the replay worker.
pub async fn post_replay_run(State(state): State<SharedState>) -> Json<Value> {
    let result = replay_worker::tick_once(&state).await;
    Json(json!({"ok": true, "result": result}))
}

pub async fn not_found() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"ok": false, "error": "NOT_FOUND"})),
    )
}
