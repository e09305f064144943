// crates/types/src/session.rs
//! Session records: the lifecycle container for one document-editing
//! episode.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChangeId, GroupId, SessionId};

/// Current on-disk schema version. Bump alongside a registered migration.
pub const SCHEMA_VERSION: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Closed,
    /// No recoverable snapshot survived; quarantined, never written to.
    Corrupt,
}

/// A persistent container for the changes and batches of one
/// document-editing episode. Append-only while `Active`; an ended session
/// is an immutable snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub document_key: String,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Submission order; the store owns the records themselves.
    pub change_ids: Vec<ChangeId>,
    pub group_ids: Vec<GroupId>,
    /// Opaque caller metadata. BTreeMap keeps the canonical encoding
    /// deterministic.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub version: u32,
}

impl Session {
    pub fn new(document_key: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            document_key: document_key.into(),
            state: SessionState::Active,
            started_at,
            ended_at: None,
            change_ids: Vec::new(),
            group_ids: Vec::new(),
            metadata: BTreeMap::new(),
            version: SCHEMA_VERSION,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn close(&mut self, at: DateTime<Utc>) {
        if self.state == SessionState::Active {
            self.state = SessionState::Closed;
            self.ended_at = Some(at);
        }
    }

    pub fn record_change(&mut self, id: ChangeId) {
        if !self.change_ids.contains(&id) {
            self.change_ids.push(id);
        }
    }

    pub fn record_group(&mut self, id: GroupId) {
        if !self.group_ids.contains(&id) {
            self.group_ids.push(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_close_is_idempotent() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let t1 = t0 + chrono::Duration::hours(1);
        let t2 = t0 + chrono::Duration::hours(2);

        let mut session = Session::new("doc.md", t0);
        assert!(session.is_active());

        session.close(t1);
        assert_eq!(session.state, SessionState::Closed);
        assert_eq!(session.ended_at, Some(t1));

        // A second close must not move the end time.
        session.close(t2);
        assert_eq!(session.ended_at, Some(t1));
    }

    #[test]
    fn test_record_change_dedupes() {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let mut session = Session::new("doc.md", t0);
        let id = ChangeId::new();
        session.record_change(id);
        session.record_change(id);
        assert_eq!(session.change_ids.len(), 1);
    }
}
