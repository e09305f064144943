// crates/store/src/store.rs
//! The change store proper: primary map plus index maintenance and the
//! status-transition rules.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use redline_types::{
    AuditAction, AuditEntry, Change, ChangeId, ChangeStatus, GroupId, Outcome, SessionId,
    StoreError,
};
use tracing::debug;

use crate::index::Indices;

#[derive(Debug, Clone, Default)]
pub struct ChangeStore {
    changes: HashMap<ChangeId, Change>,
    indices: Indices,
    /// Bumped on every mutation; query caches key their validity on it.
    mutation_count: u64,
}

impl ChangeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn mutation_count(&self) -> u64 {
        self.mutation_count
    }

    pub fn indices(&self) -> &Indices {
        &self.indices
    }

    pub fn contains(&self, id: &ChangeId) -> bool {
        self.changes.contains_key(id)
    }

    pub fn get(&self, id: &ChangeId) -> Result<&Change, StoreError> {
        self.changes.get(id).ok_or(StoreError::UnknownId(*id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.values()
    }

    /// Insert a new change. The change arrives with whatever status the
    /// consolidation engine decided (usually Pending).
    pub fn insert(&mut self, change: Change) -> Result<(), StoreError> {
        if self.changes.contains_key(&change.id) {
            return Err(StoreError::DuplicateId(change.id));
        }
        self.indices.add(&change);
        self.changes.insert(change.id, change);
        self.mutation_count += 1;
        Ok(())
    }

    /// Drop a change entirely (memory-policy eviction of terminal
    /// records; never used on Pending changes).
    pub fn remove(&mut self, id: &ChangeId) -> Result<Change, StoreError> {
        let change = self.changes.remove(id).ok_or(StoreError::UnknownId(*id))?;
        self.indices.remove(&change);
        self.mutation_count += 1;
        Ok(change)
    }

    /// Transition a change's status, appending to its audit trail.
    ///
    /// Repeating an already-applied transition returns
    /// `Outcome::Unchanged` without touching the record — callers use
    /// that to skip event emission. Any other transition out of a
    /// terminal state is an `IllegalTransition`.
    pub fn update_status(
        &mut self,
        id: &ChangeId,
        new_status: ChangeStatus,
        actor: &str,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Outcome, StoreError> {
        let change = self.changes.get_mut(id).ok_or(StoreError::UnknownId(*id))?;
        if change.status == new_status {
            return Ok(Outcome::Unchanged);
        }
        if !change.status.can_transition_to(new_status) {
            return Err(StoreError::IllegalTransition {
                change_id: *id,
                from: change.status,
                to: new_status,
            });
        }
        let from = change.status;
        change.status = new_status;
        let action = match new_status {
            ChangeStatus::Accepted => AuditAction::Accepted,
            ChangeStatus::Rejected => AuditAction::Rejected,
            ChangeStatus::Superseded => AuditAction::Superseded,
            ChangeStatus::Pending => unreachable!("cannot transition into pending"),
        };
        let mut entry = AuditEntry::new(actor, action, at);
        if let Some(reason) = reason {
            entry = entry.with_reason(reason);
        }
        change.audit.push(entry);
        self.indices.move_status(*id, from, new_status);
        self.indices.add_actor(*id, actor);
        self.mutation_count += 1;
        debug!(change = %id, %from, to = %new_status, actor, "status updated");
        Ok(Outcome::Applied)
    }

    /// Mark `old` as superseded by `new`, recording the survivor. Both
    /// ids must exist and differ; `new` must not itself be superseded, so
    /// the supersession graph stays a forest rooted at live changes.
    pub fn supersede(
        &mut self,
        old: &ChangeId,
        new: &ChangeId,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<Outcome, StoreError> {
        if old == new {
            return Err(StoreError::IllegalTransition {
                change_id: *old,
                from: self.get(old)?.status,
                to: ChangeStatus::Superseded,
            });
        }
        if !self.changes.contains_key(new) {
            return Err(StoreError::UnknownId(*new));
        }
        let outcome = self.update_status(old, ChangeStatus::Superseded, actor, None, at)?;
        if outcome == Outcome::Applied {
            let change = self.changes.get_mut(old).expect("checked above");
            change.superseded_by = Some(*new);
            self.mutation_count += 1;
        }
        Ok(outcome)
    }

    /// Attach a change to a batch.
    pub fn set_group(&mut self, id: &ChangeId, group: GroupId) -> Result<(), StoreError> {
        let change = self.changes.get_mut(id).ok_or(StoreError::UnknownId(*id))?;
        change.group_id = Some(group);
        self.mutation_count += 1;
        Ok(())
    }

    /// Record a sequential-resolution dependency.
    pub fn set_depends_on(
        &mut self,
        id: &ChangeId,
        depends_on: Option<ChangeId>,
    ) -> Result<(), StoreError> {
        let change = self.changes.get_mut(id).ok_or(StoreError::UnknownId(*id))?;
        change.depends_on = depends_on;
        self.mutation_count += 1;
        Ok(())
    }

    /// Put a change into a UserChoice conflict group.
    pub fn set_conflict_group(
        &mut self,
        id: &ChangeId,
        group: GroupId,
    ) -> Result<(), StoreError> {
        let change = self.changes.get_mut(id).ok_or(StoreError::UnknownId(*id))?;
        change.conflict_group_id = Some(group);
        self.mutation_count += 1;
        Ok(())
    }

    /// Append an audit entry without a status change (submission,
    /// redaction, migration notes).
    pub fn append_audit(
        &mut self,
        id: &ChangeId,
        entry: AuditEntry,
    ) -> Result<(), StoreError> {
        let change = self.changes.get_mut(id).ok_or(StoreError::UnknownId(*id))?;
        self.indices.add_actor(*id, &entry.actor);
        change.audit.push(entry);
        self.mutation_count += 1;
        Ok(())
    }

    /// All changes of a session in `(timestamp, id)` order — the
    /// document application order.
    pub fn session_changes(&self, session: &SessionId) -> Vec<&Change> {
        let mut out: Vec<&Change> = match self.indices.session_ids(session) {
            Some(ids) => ids
                .iter()
                .filter_map(|id| self.changes.get(id))
                .collect(),
            None => Vec::new(),
        };
        out.sort_by_key(|c| c.order_key());
        out
    }

    /// Pending changes of a session, in order.
    pub fn pending_in_session(&self, session: &SessionId) -> Vec<&Change> {
        self.session_changes(session)
            .into_iter()
            .filter(|c| c.is_pending())
            .collect()
    }

    /// Accepted changes of a session, in application order.
    pub fn accepted_in_session(&self, session: &SessionId) -> Vec<&Change> {
        self.session_changes(session)
            .into_iter()
            .filter(|c| c.status == ChangeStatus::Accepted)
            .collect()
    }
}
