// crates/store/src/query/cache.rs
//! Query-result cache keyed by builder fingerprint.
//!
//! Entries live until their TTL expires or the store mutates (the store's
//! mutation counter is the global invalidation signal — any write makes
//! every cached result stale).

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use redline_types::Change;
use tracing::trace;

#[derive(Debug, Clone)]
struct CacheEntry {
    results: Vec<Change>,
    inserted_at: DateTime<Utc>,
    mutation_count: u64,
}

#[derive(Debug)]
pub struct QueryCache {
    entries: HashMap<String, CacheEntry>,
    ttl: Duration,
    hits: u64,
    misses: u64,
}

impl QueryCache {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            entries: HashMap::new(),
            ttl: Duration::milliseconds(ttl_ms as i64),
            hits: 0,
            misses: 0,
        }
    }

    /// Look up a fingerprint. Valid only if fresh and the store has not
    /// mutated since insertion.
    pub fn get(
        &mut self,
        fingerprint: &str,
        mutation_count: u64,
        now: DateTime<Utc>,
    ) -> Option<Vec<Change>> {
        match self.entries.get(fingerprint) {
            Some(entry)
                if entry.mutation_count == mutation_count
                    && now - entry.inserted_at < self.ttl =>
            {
                self.hits += 1;
                trace!(fingerprint, "query cache hit");
                Some(entry.results.clone())
            }
            Some(_) => {
                self.entries.remove(fingerprint);
                self.misses += 1;
                None
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    pub fn put(
        &mut self,
        fingerprint: String,
        results: Vec<Change>,
        mutation_count: u64,
        now: DateTime<Utc>,
    ) {
        self.entries.insert(
            fingerprint,
            CacheEntry {
                results,
                inserted_at: now,
                mutation_count,
            },
        );
    }

    /// Drop everything (store mutation event).
    pub fn invalidate_all(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 6, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_hit_within_ttl_and_same_mutation() {
        let mut cache = QueryCache::new(5_000);
        cache.put("q1".into(), Vec::new(), 7, t0());
        assert!(cache.get("q1", 7, t0() + Duration::seconds(4)).is_some());
    }

    #[test]
    fn test_miss_after_ttl() {
        let mut cache = QueryCache::new(5_000);
        cache.put("q1".into(), Vec::new(), 7, t0());
        assert!(cache.get("q1", 7, t0() + Duration::seconds(6)).is_none());
        // The stale entry is gone entirely.
        assert!(cache.is_empty());
    }

    #[test]
    fn test_miss_after_store_mutation() {
        let mut cache = QueryCache::new(5_000);
        cache.put("q1".into(), Vec::new(), 7, t0());
        assert!(cache.get("q1", 8, t0()).is_none());
    }

    #[test]
    fn test_hit_rate() {
        let mut cache = QueryCache::new(5_000);
        cache.put("q1".into(), Vec::new(), 1, t0());
        cache.get("q1", 1, t0());
        cache.get("q2", 1, t0());
        assert_eq!(cache.hit_rate(), 0.5);
    }
}
