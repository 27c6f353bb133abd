//! Mode machine (spec §4.12, C13).
//!
//! Three base modes gate which subsystems run at all; three toggles further
//! gate subsystems that are only meaningful in `FULL`. Nothing here owns
//! state — it's a pure function of [`crate::config::Config`], queried by the
//! HTTP handlers and the worker loops on every decision.

use crate::config::{Config, OpsMode};

#[derive(Debug, Clone, Copy)]
pub struct ModeMachine {
    pub ops_mode: OpsMode,
    external_sync: bool,
    jsonl_always: bool,
    jsonl_fallback: bool,
    replay_enabled: bool,
}

impl ModeMachine {
    pub fn from_config(config: &Config) -> Self {
        Self {
            ops_mode: config.ops_mode,
            external_sync: config.external_sync,
            jsonl_always: config.jsonl_always,
            jsonl_fallback: config.jsonl_fallback,
            replay_enabled: config.replay_enabled,
        }
    }

    /// Dedup window + summary ring are active in STORE and FULL.
    pub fn store_enabled(&self) -> bool {
        !matches!(self.ops_mode, OpsMode::Echo)
    }

    /// Forward queue + queue worker are active only in FULL with sync armed.
    pub fn sync_enabled(&self) -> bool {
        matches!(self.ops_mode, OpsMode::Full) && self.external_sync
    }

    pub fn jsonl_always_enabled(&self) -> bool {
        self.jsonl_always
    }

    pub fn jsonl_fallback_enabled(&self) -> bool {
        self.jsonl_fallback
    }

    pub fn jsonl_enabled(&self) -> bool {
        self.jsonl_always || self.jsonl_fallback
    }

    pub fn replay_enabled(&self) -> bool {
        self.replay_enabled
    }

    pub fn mode_label(&self) -> &'static str {
        match self.ops_mode {
            OpsMode::Echo => "ECHO",
            OpsMode::Store => "STORE",
            OpsMode::Full => "FULL",
        }
    }
}
