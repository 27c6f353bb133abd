//! Gateway configuration — environment-variable driven (spec §6), following
//! the same "default unless overridden" pattern as the original shipper
//! config: read with a documented default, only `bail!` on a value that's
//! present but unparsable.

use std::path::PathBuf;

use anyhow::{Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpsMode {
    Echo,
    Store,
    Full,
}

impl OpsMode {
    fn parse(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "ECHO" => Ok(Self::Echo),
            "STORE" => Ok(Self::Store),
            "FULL" => Ok(Self::Full),
            other => anyhow::bail!("Unknown OPS_MODE: {other}. Use ECHO, STORE, or FULL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayMode {
    FallbackOnly,
    All,
}

impl ReplayMode {
    fn parse(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "FALLBACK_ONLY" => Ok(Self::FallbackOnly),
            "ALL" => Ok(Self::All),
            other => anyhow::bail!("Unknown REPLAY_MODE: {other}. Use FALLBACK_ONLY or ALL"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub ops_mode: OpsMode,
    pub external_sync: bool,
    pub json_limit_bytes: usize,

    pub dedupe_window_ms: i64,
    pub store_limit: usize,

    pub queue_limit: usize,
    pub worker_interval_ms: u64,
    pub worker_batch_size: usize,
    pub worker_max_retry: u32,
    pub worker_backoff_base_ms: i64,

    pub sheet_id: Option<String>,
    pub events_sheet_name: String,
    pub google_service_account_json_b64: Option<String>,
    pub google_service_account_json: Option<String>,

    pub gas_webapp_url: Option<String>,
    pub itplaylab_secret: Option<String>,
    pub gas_timeout_ms: u64,

    pub jsonl_fallback: bool,
    pub jsonl_always: bool,
    pub jsonl_dir: PathBuf,
    pub jsonl_file: String,
    pub jsonl_max_bytes: u64,
    pub jsonl_tail_max_bytes: u64,

    pub replay_enabled: bool,
    pub replay_interval_ms: u64,
    pub replay_batch_size: usize,
    pub replay_max_bytes_per_tick: u64,
    pub replay_mode: ReplayMode,
    pub replay_state_file: String,
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_on(key: &str, default_on: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => v.eq_ignore_ascii_case("on"),
        Err(_) => default_on,
    }
}

fn env_num<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(v) => v
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}

/// Parse a human `JSON_LIMIT` like `2mb` into bytes. Falls back to the
/// literal number of bytes if no unit suffix is present.
fn parse_size(s: &str, default_bytes: usize) -> Result<usize> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(default_bytes);
    }
    let lower = s.to_lowercase();
    if let Some(num) = lower.strip_suffix("mb") {
        return num
            .trim()
            .parse::<f64>()
            .map(|n| (n * 1024.0 * 1024.0) as usize)
            .context("invalid JSON_LIMIT");
    }
    if let Some(num) = lower.strip_suffix("kb") {
        return num
            .trim()
            .parse::<f64>()
            .map(|n| (n * 1024.0) as usize)
            .context("invalid JSON_LIMIT");
    }
    lower.parse::<usize>().context("invalid JSON_LIMIT")
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            port: env_num("PORT", 3000u16)?,
            ops_mode: OpsMode::parse(&env_str("OPS_MODE", "FULL"))?,
            external_sync: env_on("EXTERNAL_SYNC", false),
            json_limit_bytes: parse_size(&env_str("JSON_LIMIT", "2mb"), 2 * 1024 * 1024)?,

            dedupe_window_ms: env_num("DEDUPE_WINDOW_MS", 2000i64)?,
            store_limit: env_num("STORE_LIMIT", 200usize)?,

            queue_limit: env_num("QUEUE_LIMIT", 500usize)?,
            worker_interval_ms: env_num("WORKER_INTERVAL_MS", 1500u64)?,
            worker_batch_size: env_num("WORKER_BATCH_SIZE", 5usize)?,
            worker_max_retry: env_num("WORKER_MAX_RETRY", 5u32)?,
            worker_backoff_base_ms: env_num("WORKER_BACKOFF_BASE_MS", 2000i64)?,

            sheet_id: env_opt("SHEET_ID"),
            events_sheet_name: env_str("EVENTS_SHEET_NAME", "events"),
            google_service_account_json_b64: env_opt("GOOGLE_SERVICE_ACCOUNT_JSON_B64"),
            google_service_account_json: env_opt("GOOGLE_SERVICE_ACCOUNT_JSON"),

            gas_webapp_url: env_opt("GAS_WEBAPP_URL"),
            itplaylab_secret: env_opt("ITPLAYLAB_SECRET"),
            gas_timeout_ms: env_num("GAS_TIMEOUT_MS", 2500u64)?,

            jsonl_fallback: env_on("JSONL_FALLBACK", false),
            jsonl_always: env_on("JSONL_ALWAYS", false),
            jsonl_dir: PathBuf::from(env_str("JSONL_DIR", "/var/data")),
            jsonl_file: env_str("JSONL_FILE", "ingest_fallback.jsonl"),
            jsonl_max_bytes: env_num("JSONL_MAX_BYTES", 104_857_600u64)?,
            jsonl_tail_max_bytes: env_num("JSONL_TAIL_MAX_BYTES", 2_097_152u64)?,

            replay_enabled: env_on("REPLAY_ENABLED", false),
            replay_interval_ms: env_num("REPLAY_INTERVAL_MS", 3000u64)?,
            replay_batch_size: env_num("REPLAY_BATCH_SIZE", 10usize)?,
            replay_max_bytes_per_tick: env_num("REPLAY_MAX_BYTES_PER_TICK", 1_048_576u64)?,
            replay_mode: ReplayMode::parse(&env_str("REPLAY_MODE", "FALLBACK_ONLY"))?,
            replay_state_file: env_str("REPLAY_STATE_FILE", "replay_state.json"),
        })
    }

    pub fn spool_path(&self) -> PathBuf {
        self.jsonl_dir.join(&self.jsonl_file)
    }

    pub fn replay_state_path(&self) -> PathBuf {
        self.jsonl_dir.join(&self.replay_state_file)
    }

    pub fn jsonl_enabled(&self) -> bool {
        self.jsonl_always || self.jsonl_fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_size_handles_mb_suffix() {
        assert_eq!(parse_size("2mb", 0).unwrap(), 2 * 1024 * 1024);
    }

    #[test]
    fn parse_size_handles_plain_number() {
        assert_eq!(parse_size("1024", 0).unwrap(), 1024);
    }

    #[test]
    fn ops_mode_parses_case_insensitively() {
        assert_eq!(OpsMode::parse("full").unwrap(), OpsMode::Full);
        assert!(OpsMode::parse("bogus").is_err());
    }
}
