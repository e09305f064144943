// crates/state/src/audit.rs
//! Append-only audit log, one file per session per UTC day.
//!
//! Line format: `<crc32-hex>\t<json>\n`. The tag covers the JSON payload;
//! a line whose tag disagrees is skipped with a warning rather than
//! poisoning the whole log. Records newer than a recovered snapshot are
//! replayed on startup.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use redline_types::{AuditAction, ChangeId, SessionId, StateError};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::canonical::crc_tag;

/// One durable audit record. This is the replay unit for crash recovery:
/// status transitions can be reconstructed from these alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub session_id: SessionId,
    pub change_id: ChangeId,
    pub action: AuditAction,
    pub actor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

fn day_file(dir: &Path, at: DateTime<Utc>) -> PathBuf {
    dir.join(format!("{}.log", at.format("%Y-%m-%d")))
}

/// Append one record to the session's log for its day.
pub fn append(dir: &Path, record: &AuditRecord) -> Result<(), StateError> {
    fs::create_dir_all(dir).map_err(|source| StateError::WriteFailed {
        path: dir.display().to_string(),
        source,
    })?;
    let json = serde_json::to_string(record)?;
    let line = format!("{}\t{}\n", crc_tag(json.as_bytes()), json);
    let path = day_file(dir, record.at);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|source| StateError::WriteFailed {
            path: path.display().to_string(),
            source,
        })?;
    file.write_all(line.as_bytes())
        .map_err(|source| StateError::WriteFailed {
            path: path.display().to_string(),
            source,
        })
}

/// Every record in the session's log strictly newer than `since`, in
/// time order. Corrupt lines are counted and skipped.
pub fn read_since(dir: &Path, since: Option<DateTime<Utc>>) -> (Vec<AuditRecord>, usize) {
    let mut records = Vec::new();
    let mut corrupt = 0usize;

    let mut files: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("log"))
            .collect(),
        Err(_) => return (records, corrupt),
    };
    files.sort();

    for path in files {
        let Ok(text) = fs::read_to_string(&path) else {
            warn!(path = %path.display(), "unreadable audit file skipped");
            corrupt += 1;
            continue;
        };
        for line in text.lines() {
            if line.is_empty() {
                continue;
            }
            let Some((tag, json)) = line.split_once('\t') else {
                corrupt += 1;
                continue;
            };
            if crc_tag(json.as_bytes()) != tag {
                warn!(path = %path.display(), "audit line failed integrity check");
                corrupt += 1;
                continue;
            }
            match serde_json::from_str::<AuditRecord>(json) {
                Ok(record) => {
                    if since.is_none_or(|s| record.at > s) {
                        records.push(record);
                    }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unparseable audit line");
                    corrupt += 1;
                }
            }
        }
    }
    records.sort_by_key(|r| (r.at, r.change_id));
    (records, corrupt)
}
