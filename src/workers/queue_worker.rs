//! Queue worker (spec §4.9, C10).
//!
//! Drains the forward queue to the batch sink on a fixed interval. Never
//! started unless `OPS_MODE=FULL` and `EXTERNAL_SYNC=ON` (spec §4.12); the
//! caller (main.rs) is responsible for that gate, not this module.

use serde::Serialize;

use crate::ids::now_ms;
use crate::sink::SinkRow;
use crate::state::AppState;
use crate::workers::BusyGuard;

#[derive(Debug, Serialize)]
pub struct TickResult {
    pub synced: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl TickResult {
    fn synced(n: u64) -> Self {
        Self {
            synced: n,
            reason: None,
            error: None,
            detail: None,
        }
    }

    fn skipped(reason: &'static str) -> Self {
        Self {
            synced: 0,
            reason: Some(reason),
            error: None,
            detail: None,
        }
    }

    fn failed(detail: String) -> Self {
        Self {
            synced: 0,
            reason: None,
            error: Some("sync_failed"),
            detail: Some(detail),
        }
    }
}

/// Run one tick. Returns `reason:"worker_busy"` if a tick is already
/// in flight.
pub async fn tick_once(state: &AppState) -> TickResult {
    let Some(_guard) = BusyGuard::try_acquire(&state.worker_busy) else {
        return TickResult::skipped("worker_busy");
    };

    if let Some(missing) = state.sink.missing_config() {
        return TickResult::skipped(missing);
    }

    let now = now_ms();
    let candidates = state.queue.lock().unwrap().candidates(now);
    if candidates.is_empty() {
        return TickResult::synced(0);
    }

    let rows: Vec<SinkRow> = candidates
        .iter()
        .map(|item| SinkRow {
            id: item.id.clone(),
            payload_str: item.payload_str.clone(),
            received_at: item.received_at.clone(),
        })
        .collect();

    match state.sink.append_batch(&rows).await {
        Ok(()) => {
            if let Some(suppressed) = state.sink_errors.record_success() {
                tracing::info!(suppressed, "batch sink recovered after consecutive failures");
            }
            let ids: Vec<String> = candidates.iter().map(|item| item.id.clone()).collect();
            let mut queue = state.queue.lock().unwrap();
            queue.remove_all(&ids);
            queue.counters.synced += ids.len() as u64;
            TickResult::synced(ids.len() as u64)
        }
        Err(e) => {
            let message = e.to_string();
            state.queue.lock().unwrap().defer_due(now, &message);
            if state.sink_errors.record_error() {
                tracing::warn!(error = %message, "queue worker tick failed");
            }
            TickResult::failed(message)
        }
    }
}
