//! Replay worker (spec §4.10, C11).
//!
//! Advances a persisted byte offset through the spool, re-submitting each
//! record to the webhook. The offset only ever advances past records that
//! were actually delivered — on the first failure in a tick, everything
//! already sent this tick is kept, the rest is left for the next tick.

use serde::Serialize;
use serde_json::Value;

use crate::config::ReplayMode;
use crate::ids::now_iso;
use crate::spool::{read_spans, LineSpan};
use crate::state::AppState;
use crate::workers::BusyGuard;

#[derive(Debug, Serialize)]
pub struct TickResult {
    pub sent: u64,
    pub failed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

impl TickResult {
    fn skipped(reason: &'static str) -> Self {
        Self {
            sent: 0,
            failed: 0,
            skipped: Some(true),
            reason: Some(reason),
        }
    }

    fn done(sent: u64, failed: u64) -> Self {
        Self {
            sent,
            failed,
            skipped: None,
            reason: None,
        }
    }
}

fn candidate_stage(value: &Value, mode: ReplayMode) -> bool {
    let stage = value.get("stage").and_then(Value::as_str).unwrap_or("");
    match mode {
        ReplayMode::FallbackOnly => stage == "jsonl.fallback",
        ReplayMode::All => stage == "jsonl.fallback" || stage == "jsonl.always",
    }
}

/// Re-shape a spooled record for the webhook: copy verbatim, stamp
/// `replayed_at` (spec §4.10, final paragraph).
fn reshape_for_replay(mut record: Value) -> Value {
    if let Value::Object(map) = &mut record {
        map.insert("replayed_at".to_string(), Value::String(now_iso()));
    }
    record
}

pub async fn tick_once(state: &AppState) -> TickResult {
    let Some(_guard) = BusyGuard::try_acquire(&state.replay_busy) else {
        return TickResult::skipped("replay_busy");
    };

    if !state.mode.jsonl_enabled() {
        return TickResult::skipped("jsonl_disabled");
    }
    if !state.mode.replay_enabled() {
        return TickResult::skipped("replay_disabled");
    }

    let spool_path = state.spool.path();
    if !spool_path.exists() {
        return TickResult::skipped("no_jsonl_file");
    }

    let mut replay_state = state.replay_cache.lock().unwrap().clone();
    let spans = match read_spans(
        spool_path,
        replay_state.offset,
        state.config.replay_max_bytes_per_tick,
    ) {
        Ok(spans) => spans,
        Err(e) => {
            tracing::warn!(error = %e, "replay worker failed to read spool");
            return TickResult::skipped("spool_read_error");
        }
    };

    let mut candidates: Vec<&LineSpan> = spans
        .iter()
        .filter(|span| {
            span.value
                .as_ref()
                .map(|v| candidate_stage(v, state.config.replay_mode))
                .unwrap_or(false)
        })
        .collect();
    candidates.truncate(state.config.replay_batch_size);

    if candidates.is_empty() {
        if let Some(last) = spans.last() {
            replay_state.offset = last.end_offset;
        }
        replay_state.last_error = None;
        persist(state, &replay_state);
        return TickResult::done(0, 0);
    }

    let mut sent = 0u64;
    for span in candidates {
        let record = reshape_for_replay(span.value.clone().unwrap());
        let result = state.webhook.post(&record).await;
        if result.ok {
            if let Some(suppressed) = state.webhook_errors.record_success() {
                tracing::info!(suppressed, "webhook recovered after consecutive failures");
            }
            sent += 1;
            replay_state.offset = span.end_offset;
            replay_state.sent += 1;
        } else {
            replay_state.failed += 1;
            replay_state.last_error = result.error.clone().or_else(|| Some("webhook_rejected".to_string()));
            if state.webhook_errors.record_error() {
                tracing::warn!(error = ?result.error, "replay worker send failed");
            }
            persist(state, &replay_state);
            return TickResult::done(sent, 1);
        }
    }

    replay_state.last_error = None;
    persist(state, &replay_state);
    TickResult::done(sent, 0)
}

fn persist(state: &AppState, replay_state: &crate::spool::replay_state::ReplayState) {
    if let Err(e) = crate::spool::replay_state::save(&state.replay_state_path(), replay_state.clone())
    {
        tracing::warn!(error = %e, "failed to persist replay state");
    }
    *state.replay_cache.lock().unwrap() = replay_state.clone();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, OpsMode};
    use crate::model::SpoolRecord;
    use crate::spool::SpoolWriter;
    use serde_json::json;

    fn test_config(dir: &std::path::Path) -> Config {
        Config {
            port: 3000,
            ops_mode: OpsMode::Full,
            external_sync: false,
            json_limit_bytes: 2_000_000,
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
            jsonl_fallback: true,
            jsonl_always: false,
            jsonl_dir: dir.to_path_buf(),
            jsonl_file: "spool.jsonl".to_string(),
            jsonl_max_bytes: 104_857_600,
            jsonl_tail_max_bytes: 2_097_152,
            replay_enabled: true,
            replay_interval_ms: 3000,
            replay_batch_size: 10,
            replay_max_bytes_per_tick: 1_048_576,
            replay_mode: ReplayMode::FallbackOnly,
            replay_state_file: "replay_state.json".to_string(),
        }
    }

    fn record(stage: &str) -> SpoolRecord {
        SpoolRecord {
            ts: "2026-01-01T00:00:00Z".to_string(),
            kind: "ingest".to_string(),
            stage: stage.to_string(),
            reason: None,
            job_id: "job_1".to_string(),
            trace_id: "trace_1".to_string(),
            source: "web".to_string(),
            event_type: "click".to_string(),
            payload: json!({"n": 1}),
            received_at: "2026-01-01T00:00:00Z".to_string(),
            ingest_latency_ms: 3,
            replayed_at: None,
        }
    }

    #[tokio::test]
    async fn skips_when_no_spool_file_exists() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(test_config(dir.path())).unwrap();
        let result = tick_once(&state).await;
        assert_eq!(result.reason, Some("no_jsonl_file"));
    }

    #[tokio::test]
    async fn stops_on_first_failure_and_keeps_successful_offset() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());
        let spool_path = config.spool_path();
        let writer = SpoolWriter::new(spool_path, config.jsonl_max_bytes);
        writer.append(&record("jsonl.fallback")).unwrap();
        writer.append(&record("jsonl.fallback")).unwrap();
        writer.append(&record("jsonl.fallback")).unwrap();

        // No GAS_WEBAPP_URL configured -> webhook.post always fails fast
        // with missing_config, so every candidate "fails". This exercises
        // the stop-on-first-failure path without needing a live mock server
        // wired through AppState construction.
        let state = AppState::new(config).unwrap();
        let result = tick_once(&state).await;
        assert_eq!(result.sent, 0);
        assert_eq!(result.failed, 1);
        let cached = state.replay_cache.lock().unwrap();
        assert_eq!(cached.offset, 0);
        assert!(cached.last_error.is_some());
    }

    #[tokio::test]
    async fn jsonl_disabled_skips_tick() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(dir.path());
        config.jsonl_fallback = false;
        config.jsonl_always = false;
        let state = AppState::new(config).unwrap();
        let result = tick_once(&state).await;
        assert_eq!(result.reason, Some("jsonl_disabled"));
    }
}
