// crates/state/src/recovery.rs
//! Crash recovery: restore each session from its newest verifiable
//! snapshot, quarantine what cannot be restored, and replay audit
//! records newer than the restored state.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use redline_types::{AuditAction, ChangeStatus, SessionId};
use tracing::{info, warn};

use crate::audit::{self, AuditRecord};
use crate::snapshot::{decode_snapshot, list_snapshots, snapshot_captured_at, SessionBody};

/// Where a recovered body came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoverySource {
    /// The live `sessions/<id>.json` file verified clean.
    Primary,
    /// A checkpoint from `backups/<id>/`; the file name.
    Snapshot(String),
}

/// Result of recovering one session.
#[derive(Debug)]
pub struct RecoveredSession {
    pub session_id: SessionId,
    pub body: Option<SessionBody>,
    pub source: Option<RecoverySource>,
    /// True when nothing verifiable survived; the session is quarantined.
    pub corrupt: bool,
    /// Audit records newer than the restored state that were applied.
    pub replayed: Vec<AuditRecord>,
    /// Audit records that could not be applied (unknown or terminal
    /// changes); surfaced for the caller's recovery summary.
    pub orphaned: usize,
    /// Corrupt audit lines skipped while reading.
    pub corrupt_audit_lines: usize,
}

/// Try the primary session file, then snapshots newest-first. Replays
/// audit on whatever was restored.
pub fn recover_session(
    session_id: SessionId,
    primary: &Path,
    backups_dir: &Path,
    audit_dir: &Path,
) -> RecoveredSession {
    let mut attempted: Vec<PathBuf> = Vec::new();

    // 1. The live file, when it verifies.
    if primary.exists() {
        attempted.push(primary.to_path_buf());
        match std::fs::read(primary)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                decode_snapshot(&bytes, primary).map_err(|e| e.to_string())
            }) {
            Ok(body) => {
                info!(session = %session_id, "primary session file verified");
                return finish(session_id, body, RecoverySource::Primary, None, audit_dir);
            }
            Err(reason) => {
                warn!(session = %session_id, reason, "primary session file failed verification");
            }
        }
    }

    // 2. Snapshots, newest first; fall back one at a time.
    for path in list_snapshots(backups_dir) {
        attempted.push(path.clone());
        match std::fs::read(&path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| decode_snapshot(&bytes, &path).map_err(|e| e.to_string()))
        {
            Ok(body) => {
                let name = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default()
                    .to_string();
                info!(session = %session_id, snapshot = %name, "recovered from snapshot");
                let captured_at = snapshot_captured_at(&path);
                return finish(
                    session_id,
                    body,
                    RecoverySource::Snapshot(name),
                    captured_at,
                    audit_dir,
                );
            }
            Err(reason) => {
                warn!(
                    session = %session_id,
                    path = %path.display(),
                    reason,
                    "snapshot failed verification; trying older"
                );
            }
        }
    }

    warn!(
        session = %session_id,
        attempted = attempted.len(),
        "no recoverable state; session quarantined as corrupt"
    );
    RecoveredSession {
        session_id,
        body: None,
        source: None,
        corrupt: true,
        replayed: Vec::new(),
        orphaned: 0,
        corrupt_audit_lines: 0,
    }
}

/// Apply audit records newer than the restored state: only status
/// transitions are reconstructible, and only onto still-pending changes.
fn finish(
    session_id: SessionId,
    mut body: SessionBody,
    source: RecoverySource,
    restored_at: Option<DateTime<Utc>>,
    audit_dir: &Path,
) -> RecoveredSession {
    let (records, corrupt_audit_lines) = audit::read_since(audit_dir, restored_at);
    let mut replayed = Vec::new();
    let mut orphaned = 0usize;

    for record in records {
        let target_status = match record.action {
            AuditAction::Accepted => Some(ChangeStatus::Accepted),
            AuditAction::Rejected => Some(ChangeStatus::Rejected),
            AuditAction::Superseded => Some(ChangeStatus::Superseded),
            _ => None,
        };
        let Some(target_status) = target_status else {
            continue;
        };
        match body.changes.iter_mut().find(|c| c.id == record.change_id) {
            Some(change) if change.status == ChangeStatus::Pending => {
                change.status = target_status;
                change.audit.push(redline_types::AuditEntry {
                    actor: record.actor.clone(),
                    action: record.action,
                    at: record.at,
                    reason: record.reason.clone(),
                });
                replayed.push(record);
            }
            Some(change) if change.status == target_status => {
                // Already reflected in the restored state.
            }
            _ => orphaned += 1,
        }
    }

    if !replayed.is_empty() {
        info!(
            session = %session_id,
            replayed = replayed.len(),
            orphaned,
            "audit replay complete"
        );
    }
    RecoveredSession {
        session_id,
        body: Some(body),
        source: Some(source),
        corrupt: false,
        replayed,
        orphaned,
        corrupt_audit_lines,
    }
}
