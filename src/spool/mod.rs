//! Durable JSONL spool (spec §4.4–§4.5, C5/C6).
//!
//! A single-writer, append-only log used both as an always-on audit trail
//! and as the fallback path when the webhook sink is unavailable. Rotation
//! renames the active file aside once it crosses `JSONL_MAX_BYTES`; replay
//! reads the file from a persisted byte offset (see [`replay_state`]).

pub mod replay_state;

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::ids::now_iso_filename_safe;
use crate::model::SpoolRecord;

/// Serialises writes behind a mutex owned by the caller (see
/// [`crate::state::AppState`]); this type itself holds no lock, matching the
/// spec's "either a writer task or a mutex around open-append-close" note.
pub struct SpoolWriter {
    path: PathBuf,
    max_bytes: u64,
}

#[derive(Debug)]
pub struct AppendError {
    pub message: String,
}

impl std::fmt::Display for AppendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl SpoolWriter {
    pub fn new(path: PathBuf, max_bytes: u64) -> Self {
        Self { path, max_bytes }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record as a single `\n`-terminated JSON line, rotating the
    /// file first if it has grown past `max_bytes`. Failures are returned to
    /// the caller, never panicked on — the ingest request must proceed
    /// regardless (spec §4.4, §7).
    pub fn append(&self, record: &SpoolRecord) -> Result<(), AppendError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| AppendError {
                message: format!("create_dir_all failed: {e}"),
            })?;
        }

        self.rotate_if_needed()?;

        let mut line = serde_json::to_string(record).map_err(|e| AppendError {
            message: format!("serialize failed: {e}"),
        })?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| AppendError {
                message: format!("open failed: {e}"),
            })?;
        file.write_all(line.as_bytes()).map_err(|e| AppendError {
            message: format!("write failed: {e}"),
        })?;
        Ok(())
    }

    fn rotate_if_needed(&self) -> Result<(), AppendError> {
        let meta = match fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(AppendError {
                    message: format!("stat failed: {e}"),
                })
            }
        };
        if meta.len() < self.max_bytes {
            return Ok(());
        }
        let mut rotated_name = self.path.as_os_str().to_os_string();
        rotated_name.push(format!(".{}.bak", now_iso_filename_safe()));
        let rotated = PathBuf::from(rotated_name);
        fs::rename(&self.path, &rotated).map_err(|e| AppendError {
            message: format!("rotate failed: {e}"),
        })
    }
}

pub struct ReadResult {
    pub lines: Vec<Value>,
    pub new_offset: u64,
    pub eof: bool,
}

/// Read up to `max_bytes` of JSONL starting at `offset`, parsing complete
/// lines and silently skipping malformed ones. Trailing incomplete lines are
/// left unconsumed for the next call (spec §4.5).
pub fn read_from(path: &Path, offset: u64, max_bytes: u64) -> std::io::Result<ReadResult> {
    let file_size = match fs::metadata(path) {
        Ok(m) => m.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ReadResult {
                lines: Vec::new(),
                new_offset: offset,
                eof: true,
            })
        }
        Err(e) => return Err(e),
    };

    if offset >= file_size {
        return Ok(ReadResult {
            lines: Vec::new(),
            new_offset: offset,
            eof: true,
        });
    }

    let to_read = max_bytes.min(file_size - offset);
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; to_read as usize];
    file.read_exact(&mut buf)?;

    let last_newline = buf.iter().rposition(|&b| b == b'\n');
    let (consumed, new_offset) = match last_newline {
        Some(idx) => (&buf[..=idx], offset + idx as u64 + 1),
        None => (&buf[..0], offset),
    };

    let mut lines = Vec::new();
    for raw_line in consumed.split(|&b| b == b'\n') {
        if raw_line.is_empty() {
            continue;
        }
        if let Ok(value) = serde_json::from_slice::<Value>(raw_line) {
            lines.push(value);
        }
    }

    let eof = new_offset >= file_size;
    Ok(ReadResult {
        lines,
        new_offset,
        eof,
    })
}

/// One JSONL line, with the absolute offset of the byte just past its
/// newline. `value` is `None` for a malformed line — the span still counts
/// toward the file's offset, it's just not a replay candidate.
pub struct LineSpan {
    pub end_offset: u64,
    pub value: Option<Value>,
}

/// Like [`read_from`], but keeps each line's individual end offset instead
/// of collapsing the whole batch into one `new_offset`. The replay worker
/// needs this to advance the persisted offset only past records it actually
/// sent (spec §4.10's stop-on-first-failure rule).
pub fn read_spans(path: &Path, offset: u64, max_bytes: u64) -> std::io::Result<Vec<LineSpan>> {
    let file_size = match fs::metadata(path) {
        Ok(m) => m.len(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    if offset >= file_size {
        return Ok(Vec::new());
    }

    let to_read = max_bytes.min(file_size - offset);
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; to_read as usize];
    file.read_exact(&mut buf)?;

    let last_newline = match buf.iter().rposition(|&b| b == b'\n') {
        Some(idx) => idx,
        None => return Ok(Vec::new()),
    };

    let mut spans = Vec::new();
    let mut line_start = 0usize;
    for (i, _) in buf[..=last_newline]
        .iter()
        .enumerate()
        .filter(|(_, &b)| b == b'\n')
    {
        let raw_line = &buf[line_start..i];
        let value = if raw_line.is_empty() {
            None
        } else {
            serde_json::from_slice::<Value>(raw_line).ok()
        };
        spans.push(LineSpan {
            end_offset: offset + i as u64 + 1,
            value,
        });
        line_start = i + 1;
    }
    Ok(spans)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::new_trace_id;
    use serde_json::json;
    use tempfile::tempdir;

    fn record(stage: &str) -> SpoolRecord {
        SpoolRecord {
            ts: "2026-01-01T00:00:00Z".to_string(),
            kind: "ingest".to_string(),
            stage: stage.to_string(),
            reason: None,
            job_id: "job_1".to_string(),
            trace_id: new_trace_id(),
            source: "web".to_string(),
            event_type: "click".to_string(),
            payload: json!({"n": 1}),
            received_at: "2026-01-01T00:00:00Z".to_string(),
            ingest_latency_ms: 3,
            replayed_at: None,
        }
    }

    #[test]
    fn append_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spool.jsonl");
        let writer = SpoolWriter::new(path.clone(), 1024 * 1024);
        writer.append(&record("jsonl.always")).unwrap();
        writer.append(&record("jsonl.fallback")).unwrap();

        let result = read_from(&path, 0, 1_000_000).unwrap();
        assert_eq!(result.lines.len(), 2);
        assert!(result.eof);
        assert_eq!(result.lines[0]["stage"], "jsonl.always");
    }

    #[test]
    fn read_from_missing_file_is_eof_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.jsonl");
        let result = read_from(&path, 0, 1024).unwrap();
        assert!(result.lines.is_empty());
        assert!(result.eof);
        assert_eq!(result.new_offset, 0);
    }

    #[test]
    fn incomplete_trailing_line_is_not_consumed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spool.jsonl");
        fs::write(&path, b"{\"a\":1}\n{\"a\":2}").unwrap(); // no trailing newline
        let result = read_from(&path, 0, 1024).unwrap();
        assert_eq!(result.lines.len(), 1);
        assert_eq!(result.new_offset, 8); // up to and including first \n
        assert!(!result.eof);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spool.jsonl");
        fs::write(&path, b"not json\n{\"a\":1}\n").unwrap();
        let result = read_from(&path, 0, 1024).unwrap();
        assert_eq!(result.lines.len(), 1);
        assert_eq!(result.lines[0]["a"], 1);
    }

    #[test]
    fn offset_at_or_past_file_size_is_eof() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spool.jsonl");
        fs::write(&path, b"{\"a\":1}\n").unwrap();
        let size = fs::metadata(&path).unwrap().len();
        let result = read_from(&path, size, 1024).unwrap();
        assert!(result.lines.is_empty());
        assert!(result.eof);
    }

    #[test]
    fn spans_carry_individual_end_offsets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spool.jsonl");
        fs::write(&path, b"{\"a\":1}\n{\"a\":2}\n{\"a\":3}\n").unwrap();
        let spans = read_spans(&path, 0, 1024).unwrap();
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].end_offset, 8);
        assert_eq!(spans[1].end_offset, 16);
        assert_eq!(spans[2].end_offset, 24);
        assert!(spans.iter().all(|s| s.value.is_some()));
    }

    #[test]
    fn spans_keep_malformed_lines_with_no_value() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spool.jsonl");
        fs::write(&path, b"not json\n{\"a\":1}\n").unwrap();
        let spans = read_spans(&path, 0, 1024).unwrap();
        assert_eq!(spans.len(), 2);
        assert!(spans[0].value.is_none());
        assert!(spans[1].value.is_some());
    }

    #[test]
    fn rotation_renames_file_once_over_max_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("spool.jsonl");
        let writer = SpoolWriter::new(path.clone(), 10); // tiny limit forces rotation
        writer.append(&record("jsonl.always")).unwrap();
        assert!(fs::metadata(&path).unwrap().len() >= 10);
        writer.append(&record("jsonl.always")).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert!(entries.iter().any(|n| n.ends_with(".bak")));
        // Fresh file holds only the most recent append.
        let result = read_from(&path, 0, 1_000_000).unwrap();
        assert_eq!(result.lines.len(), 1);
    }

    #[test]
    fn append_creates_missing_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("spool.jsonl");
        let writer = SpoolWriter::new(path.clone(), 1024 * 1024);
        writer.append(&record("jsonl.always")).unwrap();
        assert!(path.exists());
    }
}
