//! Wire and domain types shared by the ingest controller and the background
//! workers (spec §3 — Data Model).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Metadata captured about the request an event arrived on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMeta {
    pub source: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ua: Option<String>,
}

/// The packed payload stored in the summary ring / forwarded to the sink.
///
/// Shape fixed by spec §4.11: `{v:1, event_type, occurred_at, meta, data, raw}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackedPayload {
    pub v: u32,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<String>,
    pub meta: EventMeta,
    pub data: Value,
    pub raw: Value,
}

impl PackedPayload {
    pub fn new(
        event_type: impl Into<String>,
        occurred_at: Option<String>,
        meta: EventMeta,
        data: Value,
        raw: Value,
    ) -> Self {
        Self {
            v: 1,
            event_type: event_type.into(),
            occurred_at,
            meta,
            data,
            raw,
        }
    }
}

/// A single accepted event, carried through the /events request path.
#[derive(Debug, Clone)]
pub struct AcceptedEvent {
    pub id: String,
    pub fingerprint: String,
    pub payload: PackedPayload,
}

/// Inbound shape for a standard (non-legacy) `/events` item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardEventIn {
    pub event_id: Option<String>,
    pub event_type: Option<String>,
    pub source: Option<String>,
    pub user_id: Option<String>,
    pub occurred_at: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

/// Top-level `/events` body. Either `events` (standard) or `action` +
/// `lines` (legacy TSV) is present — never both, never neither.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct EventsBody {
    #[serde(default)]
    pub events: Option<Vec<StandardEventIn>>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub lines: Option<Vec<String>>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// `/ingest` request body — all three fields required (spec §4.11).
#[derive(Debug, Clone, Deserialize)]
pub struct IngestBody {
    pub source: String,
    pub event_type: String,
    #[serde(default)]
    pub payload: Value,
}

/// A spool JSONL record (spec §3 — Spool record).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpoolRecord {
    pub ts: String,
    pub kind: String,
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub job_id: String,
    pub trace_id: String,
    pub source: String,
    pub event_type: String,
    pub payload: Value,
    pub received_at: String,
    pub ingest_latency_ms: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replayed_at: Option<String>,
}

/// Canonical (stable-key) JSON serialisation, used as the fingerprint input
/// for standard `/events` bodies (spec §3 — Fingerprint).
///
/// `serde_json::Value` objects preserve insertion order by default; callers
/// are expected to serialise the body as it was received so fingerprints are
/// stable across repeated identical requests without re-sorting keys that
/// weren't sorted on the wire either.
pub fn sha256_hex(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}
