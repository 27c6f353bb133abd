//! Clock, timestamp, and identifier helpers shared across the ingest path.
//!
//! Centralising these keeps the id formats (`evt_…`, `job_…`) in one place
//! instead of scattered format! calls.

use chrono::Utc;
use rand::Rng;

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current time as an RFC3339 / ISO-8601 string.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

/// An ISO timestamp with colons replaced, safe to use inside a filename
/// (used for spool rotation suffixes per spec §4.4).
pub fn now_iso_filename_safe() -> String {
    now_iso().replace(':', "-")
}

fn random_hex(n: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..n)
        .map(|_| std::char::from_digit(rng.gen_range(0..16), 16).unwrap())
        .collect()
}

/// Synthesize an event id: `evt_<source>_<user>_<ms-epoch>_<4-hex>`.
pub fn new_event_id(source: &str, user: &str) -> String {
    format!("evt_{}_{}_{}_{}", source, user, now_ms(), random_hex(4))
}

/// Synthesize a job id: `job_<UTC-iso-compacted>_<6-hex>`.
pub fn new_job_id() -> String {
    let compact = Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
    format!("job_{}_{}", compact, random_hex(6))
}

/// A fresh trace id, used when the caller doesn't supply `X-Request-Id`.
pub fn new_trace_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_id_has_expected_shape() {
        let id = new_event_id("web", "u1");
        assert!(id.starts_with("evt_web_u1_"));
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 5);
        assert_eq!(parts[4].len(), 4);
    }

    #[test]
    fn job_id_starts_with_job() {
        let id = new_job_id();
        assert!(id.starts_with("job_"));
    }

    #[test]
    fn filename_safe_iso_has_no_colons() {
        assert!(!now_iso_filename_safe().contains(':'));
    }
}
