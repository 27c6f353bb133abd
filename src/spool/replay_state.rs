//! Replay state store (spec §4.6, C7).
//!
//! Tracks the byte offset the replay worker has fully consumed through. Load
//! is tolerant of a missing or malformed file (treated as zeroes); save is
//! atomic via temp-file-plus-rename so a crash mid-write never leaves a
//! truncated or torn file behind.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::ids::now_iso;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplayState {
    pub offset: u64,
    pub updated_at: String,
    pub last_error: Option<String>,
    pub sent: u64,
    pub failed: u64,
}

impl Default for ReplayState {
    fn default() -> Self {
        Self {
            offset: 0,
            updated_at: now_iso(),
            last_error: None,
            sent: 0,
            failed: 0,
        }
    }
}

/// Zeroes out on any read/parse failure, per spec.
pub fn load(path: &Path) -> ReplayState {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return ReplayState::default();
    };
    serde_json::from_str(&raw).unwrap_or_default()
}

/// Atomic write: serialise to a sibling temp file, then rename over the
/// target. `updated_at` is stamped with the current time regardless of what
/// the caller passed in.
pub fn save(path: &Path, mut state: ReplayState) -> std::io::Result<()> {
    state.updated_at = now_iso();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_string_pretty(&state)?;

    let tmp_path = tmp_sibling(path);
    std::fs::write(&tmp_path, body)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}
