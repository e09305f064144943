// crates/state/src/snapshot.rs
//! Snapshot bodies: the canonical persisted form of one session.
//!
//! A snapshot file is `{version, session, changes, batches, metadata,
//! checksum}` where the checksum is SHA-256 over the canonical encoding
//! of everything before it. Files are named
//! `<timestamp_millis>_<snapshot_id>.json[.gz]` so a lexicographic sort
//! is a time sort and newest-wins needs no parsing.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use redline_types::{Change, ChangeGroup, Session, SessionId, SnapshotId, StateError};
use serde::{Deserialize, Serialize};
use std::io::Write;
use tracing::{debug, warn};

use crate::canonical;
use crate::txn::atomic_write;

/// Everything persisted for one session, minus the checksum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionBody {
    pub version: u32,
    pub session: Session,
    pub changes: Vec<Change>,
    pub batches: Vec<ChangeGroup>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl SessionBody {
    pub fn new(session: Session) -> Self {
        Self {
            version: session.version,
            session,
            changes: Vec::new(),
            batches: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session.id
    }

    pub fn checksum(&self) -> Result<String, StateError> {
        Ok(canonical::checksum(self)?)
    }
}

/// The on-disk shape: body fields plus the checksum.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotFile {
    version: u32,
    session: Session,
    changes: Vec<Change>,
    batches: Vec<ChangeGroup>,
    #[serde(default)]
    metadata: BTreeMap<String, serde_json::Value>,
    checksum: String,
}

impl SnapshotFile {
    fn from_body(body: &SessionBody) -> Result<Self, StateError> {
        Ok(Self {
            version: body.version,
            session: body.session.clone(),
            changes: body.changes.clone(),
            batches: body.batches.clone(),
            metadata: body.metadata.clone(),
            checksum: body.checksum()?,
        })
    }

    fn into_verified_body(self, path: &Path) -> Result<SessionBody, StateError> {
        let body = SessionBody {
            version: self.version,
            session: self.session,
            changes: self.changes,
            batches: self.batches,
            metadata: self.metadata,
        };
        let computed = body.checksum()?;
        if computed != self.checksum {
            return Err(StateError::ChecksumMismatch {
                path: path.display().to_string(),
                expected: self.checksum,
                computed,
            });
        }
        Ok(body)
    }
}

/// Serialize a body (checksummed) to bytes, gzip-compressing at or above
/// the threshold. Returns `(bytes, compressed)`.
pub fn encode_snapshot(
    body: &SessionBody,
    compression_threshold: usize,
) -> Result<(Vec<u8>, bool), StateError> {
    let file = SnapshotFile::from_body(body)?;
    let plain = canonical::encode(&file)?;
    if plain.len() >= compression_threshold {
        let gzip = |bytes: &[u8]| -> std::io::Result<Vec<u8>> {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(bytes)?;
            encoder.finish()
        };
        match gzip(&plain) {
            Ok(compressed) => Ok((compressed, true)),
            Err(source) => Err(StateError::WriteFailed {
                path: "<gzip>".into(),
                source,
            }),
        }
    } else {
        Ok((plain, false))
    }
}

/// Parse and checksum-verify snapshot bytes (transparently gunzipping).
pub fn decode_snapshot(bytes: &[u8], path: &Path) -> Result<SessionBody, StateError> {
    const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
    let plain: Vec<u8> = if bytes.starts_with(&GZIP_MAGIC) {
        let mut decoder = GzDecoder::new(bytes);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|source| StateError::WriteFailed {
                path: path.display().to_string(),
                source,
            })?;
        out
    } else {
        bytes.to_vec()
    };
    let file: SnapshotFile =
        serde_json::from_slice(&plain).map_err(StateError::Serialize)?;
    file.into_verified_body(path)
}

/// Write a checkpoint into `dir`, pruning old snapshots beyond
/// `max_snapshots`.
pub fn write_snapshot(
    dir: &Path,
    body: &SessionBody,
    now: DateTime<Utc>,
    compression_threshold: usize,
    max_snapshots: usize,
) -> Result<(SnapshotId, PathBuf), StateError> {
    let snapshot_id = SnapshotId::new();
    let (bytes, compressed) = encode_snapshot(body, compression_threshold)?;
    let extension = if compressed { "json.gz" } else { "json" };
    let name = format!(
        "{:020}_{snapshot_id}.{extension}",
        now.timestamp_millis().max(0)
    );
    let path = dir.join(&name);
    atomic_write(&path, &bytes).map_err(|source| StateError::WriteFailed {
        path: path.display().to_string(),
        source,
    })?;
    debug!(path = %path.display(), bytes = bytes.len(), compressed, "snapshot written");

    prune_snapshots(dir, max_snapshots);
    Ok((snapshot_id, path))
}

/// Snapshot files in `dir`, newest first.
pub fn list_snapshots(dir: &Path) -> Vec<PathBuf> {
    let mut names: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                let name = p.file_name().and_then(|n| n.to_str()).unwrap_or("");
                name.ends_with(".json") || name.ends_with(".json.gz")
            })
            .collect(),
        Err(_) => return Vec::new(),
    };
    names.sort();
    names.reverse();
    names
}

/// The millisecond timestamp a snapshot file was captured at, parsed from
/// its name.
pub fn snapshot_captured_at(path: &Path) -> Option<DateTime<Utc>> {
    let name = path.file_name()?.to_str()?;
    let millis: i64 = name.split('_').next()?.parse().ok()?;
    DateTime::from_timestamp_millis(millis)
}

fn prune_snapshots(dir: &Path, max_snapshots: usize) {
    let snapshots = list_snapshots(dir);
    for stale in snapshots.iter().skip(max_snapshots.max(1)) {
        if let Err(e) = fs::remove_file(stale) {
            warn!(path = %stale.display(), error = %e, "failed to prune snapshot");
        }
    }
}
