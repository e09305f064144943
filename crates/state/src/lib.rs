// crates/state/src/lib.rs
//! Session persistence: directory layout, transactions, snapshots,
//! crash recovery, schema migrations, and the memory policy.
//!
//! Layout, one root per namespace:
//!
//! ```text
//! <root>/sessions/<session_id>.json      live session bodies
//! <root>/backups/<session_id>/…          checkpoints, newest wins
//! <root>/audit/<session_id>/<day>.log    append-only audit entries
//! <root>/documents/<document_key>.json   document → active session
//! ```

pub mod audit;
pub mod canonical;
pub mod memory;
pub mod migrate;
pub mod recovery;
pub mod snapshot;
pub mod txn;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use redline_types::{PersistenceConfig, SessionId, SnapshotId, StateError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use audit::AuditRecord;
pub use memory::MemoryCache;
pub use migrate::{Migration, MigrationRegistry, MigrationReport};
pub use recovery::{RecoveredSession, RecoverySource};
pub use snapshot::SessionBody;
pub use txn::FileTransaction;

/// Document-to-session binding stored under `documents/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DocumentBinding {
    document_key: String,
    session_id: SessionId,
}

/// Owner of one persistence namespace.
#[derive(Debug)]
pub struct StateManager {
    root: PathBuf,
    config: PersistenceConfig,
}

impl StateManager {
    /// Open (creating directories as needed) a namespace rooted at
    /// `root`.
    pub fn open(root: impl Into<PathBuf>, config: PersistenceConfig) -> Result<Self, StateError> {
        let root = root.into();
        for sub in ["sessions", "documents", "backups", "audit"] {
            let dir = root.join(sub);
            fs::create_dir_all(&dir).map_err(|source| StateError::WriteFailed {
                path: dir.display().to_string(),
                source,
            })?;
        }
        info!(root = %root.display(), "state manager opened");
        Ok(Self { root, config })
    }

    /// Default namespace under the user's data directory.
    pub fn open_default(config: PersistenceConfig) -> Result<Self, StateError> {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("redline");
        Self::open(base, config)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    fn session_path(&self, id: SessionId) -> PathBuf {
        self.root.join("sessions").join(format!("{id}.json"))
    }

    fn backups_dir(&self, id: SessionId) -> PathBuf {
        self.root.join("backups").join(id.to_string())
    }

    fn audit_dir(&self, id: SessionId) -> PathBuf {
        self.root.join("audit").join(id.to_string())
    }

    fn document_path(&self, document_key: &str) -> PathBuf {
        self.root
            .join("documents")
            .join(format!("{}.json", sanitize_key(document_key)))
    }

    /// Persist the live body (checksummed, atomic) through a transaction.
    pub fn save_session(&self, body: &SessionBody) -> Result<(), StateError> {
        let (bytes, _) = snapshot::encode_snapshot(body, usize::MAX)?;
        let mut txn = FileTransaction::new();
        txn.write(self.session_path(body.session_id()), bytes);
        txn.commit()
    }

    /// Load and checksum-verify the live body.
    pub fn load_session(&self, id: SessionId) -> Result<SessionBody, StateError> {
        let path = self.session_path(id);
        let bytes = fs::read(&path).map_err(|source| StateError::WriteFailed {
            path: path.display().to_string(),
            source,
        })?;
        snapshot::decode_snapshot(&bytes, &path)
    }

    /// Every session id with a live file.
    pub fn list_sessions(&self) -> Vec<SessionId> {
        let dir = self.root.join("sessions");
        let Ok(entries) = fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut ids: Vec<SessionId> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name();
                let name = name.to_str()?;
                name.strip_suffix(".json")?.parse().ok()
            })
            .collect();
        ids.sort();
        ids
    }

    /// Write a checkpoint into the session's backup directory.
    pub fn checkpoint(
        &self,
        body: &SessionBody,
        now: DateTime<Utc>,
    ) -> Result<SnapshotId, StateError> {
        let dir = self.backups_dir(body.session_id());
        let (snapshot_id, _) = snapshot::write_snapshot(
            &dir,
            body,
            now,
            self.config.compression_threshold_bytes,
            self.config.max_snapshots_per_session,
        )?;
        Ok(snapshot_id)
    }

    /// Recover one session: live file, else newest good snapshot, else
    /// quarantine. Replays newer audit records onto the result.
    pub fn recover(&self, id: SessionId) -> RecoveredSession {
        let recovered = recovery::recover_session(
            id,
            &self.session_path(id),
            &self.backups_dir(id),
            &self.audit_dir(id),
        );
        if recovered.corrupt {
            self.quarantine(id);
        }
        recovered
    }

    /// Recover everything found in the namespace (startup pass).
    pub fn recover_all(&self) -> Vec<RecoveredSession> {
        let mut seen: Vec<SessionId> = self.list_sessions();
        // Sessions that only have backups still deserve recovery.
        if let Ok(entries) = fs::read_dir(self.root.join("backups")) {
            for entry in entries.filter_map(|e| e.ok()) {
                if let Some(id) = entry
                    .file_name()
                    .to_str()
                    .and_then(|s| s.parse::<SessionId>().ok())
                {
                    if !seen.contains(&id) {
                        seen.push(id);
                    }
                }
            }
        }
        seen.sort();
        seen.into_iter().map(|id| self.recover(id)).collect()
    }

    fn quarantine(&self, id: SessionId) {
        let marker = self
            .root
            .join("sessions")
            .join(format!("{id}.corrupt"));
        if let Err(e) = fs::write(&marker, b"quarantined\n") {
            warn!(session = %id, error = %e, "failed to write quarantine marker");
        }
    }

    pub fn is_quarantined(&self, id: SessionId) -> bool {
        self.root
            .join("sessions")
            .join(format!("{id}.corrupt"))
            .exists()
    }

    /// Bind a document key to its active session.
    pub fn bind_document(
        &self,
        document_key: &str,
        session_id: SessionId,
    ) -> Result<(), StateError> {
        let binding = DocumentBinding {
            document_key: document_key.to_string(),
            session_id,
        };
        let bytes = canonical::encode(&binding)?;
        let mut txn = FileTransaction::new();
        txn.write(self.document_path(document_key), bytes);
        txn.commit()
    }

    /// The active session for a document, if bound.
    pub fn session_for_document(&self, document_key: &str) -> Option<SessionId> {
        let bytes = fs::read(self.document_path(document_key)).ok()?;
        let binding: DocumentBinding = serde_json::from_slice(&bytes).ok()?;
        Some(binding.session_id)
    }

    /// Append one audit record to the session's log.
    pub fn append_audit(&self, record: &AuditRecord) -> Result<(), StateError> {
        audit::append(&self.audit_dir(record.session_id), record)
    }

    /// Audit records strictly newer than `since`.
    pub fn read_audit_since(
        &self,
        id: SessionId,
        since: Option<DateTime<Utc>>,
    ) -> (Vec<AuditRecord>, usize) {
        audit::read_since(&self.audit_dir(id), since)
    }

    /// Migrate a stored session body to `target_version`, taking a
    /// backup first. On failure the stored file is untouched.
    pub fn migrate_session(
        &self,
        id: SessionId,
        registry: &MigrationRegistry,
        target_version: u32,
        now: DateTime<Utc>,
    ) -> Result<MigrationReport, (StateError, MigrationReport)> {
        let body = self.load_session(id).map_err(|e| {
            (
                e,
                MigrationReport {
                    from_version: 0,
                    to_version: target_version,
                    steps: Vec::new(),
                    rolled_back: false,
                },
            )
        })?;
        let from_version = body.version;

        // Pre-migration backup.
        if let Err(e) = self.checkpoint(&body, now) {
            return Err((
                e,
                MigrationReport {
                    from_version,
                    to_version: target_version,
                    steps: Vec::new(),
                    rolled_back: false,
                },
            ));
        }

        let mut value = serde_json::to_value(&body).map_err(|e| {
            (
                StateError::Serialize(e),
                MigrationReport {
                    from_version,
                    to_version: target_version,
                    steps: Vec::new(),
                    rolled_back: false,
                },
            )
        })?;
        let report = registry.migrate(id, &mut value, from_version, target_version)?;

        let migrated: SessionBody = serde_json::from_value(value).map_err(|e| {
            (
                StateError::Serialize(e),
                report.clone(),
            )
        })?;
        self.save_session(&migrated).map_err(|e| (e, report.clone()))?;
        info!(
            session = %id,
            from = from_version,
            to = target_version,
            "session migrated"
        );
        Ok(report)
    }
}

fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
