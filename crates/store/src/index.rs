// crates/store/src/index.rs
//! Secondary indices over the change store.
//!
//! Every index is a `BTreeMap<Key, BTreeSet<ChangeId>>`: ordered keys for
//! deterministic scans, ordered id sets so intersections are cheap and
//! stable. Maintenance happens on every store mutation; the store is the
//! only writer.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Timelike, Utc};
use redline_types::{Category, Change, ChangeId, ChangeStatus, SessionId};

#[derive(Debug, Clone, Default)]
pub struct Indices {
    pub(crate) by_session: BTreeMap<SessionId, BTreeSet<ChangeId>>,
    pub(crate) by_source: BTreeMap<String, BTreeSet<ChangeId>>,
    pub(crate) by_provider: BTreeMap<String, BTreeSet<ChangeId>>,
    pub(crate) by_model: BTreeMap<String, BTreeSet<ChangeId>>,
    pub(crate) by_mode: BTreeMap<String, BTreeSet<ChangeId>>,
    pub(crate) by_category: BTreeMap<Category, BTreeSet<ChangeId>>,
    pub(crate) by_status: BTreeMap<ChangeStatus, BTreeSet<ChangeId>>,
    /// Key is the UTC hour bucket (seconds since epoch, truncated).
    pub(crate) by_hour: BTreeMap<i64, BTreeSet<ChangeId>>,
    /// Audit actors that have touched the change.
    pub(crate) by_actor: BTreeMap<String, BTreeSet<ChangeId>>,
}

pub(crate) fn hour_bucket(at: DateTime<Utc>) -> i64 {
    let t = at.with_minute(0).and_then(|t| t.with_second(0)).and_then(|t| t.with_nanosecond(0));
    t.unwrap_or(at).timestamp()
}

impl Indices {
    pub(crate) fn add(&mut self, change: &Change) {
        let id = change.id;
        self.by_session.entry(change.session_id).or_default().insert(id);
        self.by_source
            .entry(change.source.clone())
            .or_default()
            .insert(id);
        self.by_category
            .entry(change.category)
            .or_default()
            .insert(id);
        self.by_status.entry(change.status).or_default().insert(id);
        self.by_hour
            .entry(hour_bucket(change.timestamp))
            .or_default()
            .insert(id);
        if let Some(attribution) = &change.attribution {
            self.by_provider
                .entry(attribution.provider.clone())
                .or_default()
                .insert(id);
            self.by_model
                .entry(attribution.model.clone())
                .or_default()
                .insert(id);
            if let Some(mode) = &attribution.mode {
                self.by_mode.entry(mode.clone()).or_default().insert(id);
            }
        }
        for entry in &change.audit {
            self.by_actor
                .entry(entry.actor.clone())
                .or_default()
                .insert(id);
        }
    }

    pub(crate) fn remove(&mut self, change: &Change) {
        let id = change.id;
        prune(&mut self.by_session, &change.session_id, id);
        prune(&mut self.by_source, &change.source, id);
        prune(&mut self.by_category, &change.category, id);
        prune(&mut self.by_status, &change.status, id);
        prune(&mut self.by_hour, &hour_bucket(change.timestamp), id);
        if let Some(attribution) = &change.attribution {
            prune(&mut self.by_provider, &attribution.provider, id);
            prune(&mut self.by_model, &attribution.model, id);
            if let Some(mode) = &attribution.mode {
                prune(&mut self.by_mode, mode, id);
            }
        }
        for entry in &change.audit {
            prune(&mut self.by_actor, &entry.actor, id);
        }
    }

    pub(crate) fn move_status(
        &mut self,
        id: ChangeId,
        from: ChangeStatus,
        to: ChangeStatus,
    ) {
        prune(&mut self.by_status, &from, id);
        self.by_status.entry(to).or_default().insert(id);
    }

    pub(crate) fn add_actor(&mut self, id: ChangeId, actor: &str) {
        self.by_actor.entry(actor.to_string()).or_default().insert(id);
    }

    pub fn session_ids(&self, session: &SessionId) -> Option<&BTreeSet<ChangeId>> {
        self.by_session.get(session)
    }

    pub fn status_ids(&self, status: ChangeStatus) -> Option<&BTreeSet<ChangeId>> {
        self.by_status.get(&status)
    }
}

fn prune<K: Ord + Clone>(
    map: &mut BTreeMap<K, BTreeSet<ChangeId>>,
    key: &K,
    id: ChangeId,
) {
    if let Some(set) = map.get_mut(key) {
        set.remove(&id);
        if set.is_empty() {
            map.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_hour_bucket_truncates() {
        let a = Utc.with_ymd_and_hms(2026, 5, 4, 9, 12, 55).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 5, 4, 9, 59, 1).unwrap();
        let c = Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap();
        assert_eq!(hour_bucket(a), hour_bucket(b));
        assert_ne!(hour_bucket(a), hour_bucket(c));
    }
}
