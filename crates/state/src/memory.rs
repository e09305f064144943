// crates/state/src/memory.rs
//! Memory policy: a bounded in-memory cache of change bodies with
//! LRU/LFU/TTL/priority eviction and transparent gzip compression of
//! large entries.
//!
//! Pending changes are pinned — eviction only ever considers terminal
//! changes, so review state is never lost to memory pressure.

use std::collections::HashMap;
use std::io::{Read, Write};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use redline_types::{CacheStrategy, Change, ChangeId, MemoryConfig, MemoryPressure};
use tracing::debug;

#[derive(Debug, Clone)]
enum Body {
    Plain(Vec<u8>),
    Compressed { data: Vec<u8>, raw_len: usize },
}

impl Body {
    fn stored_len(&self) -> usize {
        match self {
            Body::Plain(data) => data.len(),
            Body::Compressed { data, .. } => data.len(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    body: Body,
    pinned: bool,
    priority: u8,
    inserted_at: DateTime<Utc>,
    last_access: u64,
    access_count: u64,
}

/// Bounded cache of serialized changes.
#[derive(Debug)]
pub struct MemoryCache {
    config: MemoryConfig,
    compression_threshold: usize,
    entries: HashMap<ChangeId, Entry>,
    current_bytes: usize,
    tick: u64,
}

impl MemoryCache {
    pub fn new(config: MemoryConfig, compression_threshold: usize) -> Self {
        Self {
            config,
            compression_threshold,
            entries: HashMap::new(),
            current_bytes: 0,
            tick: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn current_bytes(&self) -> usize {
        self.current_bytes
    }

    /// Insert or refresh a change. Pending changes are pinned; large
    /// bodies are compressed on the way in.
    pub fn put(&mut self, change: &Change, priority: u8, now: DateTime<Utc>) {
        let Ok(raw) = serde_json::to_vec(change) else {
            return;
        };
        let body = if raw.len() >= self.compression_threshold {
            match gzip(&raw) {
                Ok(data) => Body::Compressed {
                    data,
                    raw_len: raw.len(),
                },
                Err(_) => Body::Plain(raw),
            }
        } else {
            Body::Plain(raw)
        };

        self.tick += 1;
        if let Some(old) = self.entries.remove(&change.id) {
            self.current_bytes -= old.body.stored_len();
        }
        self.current_bytes += body.stored_len();
        self.entries.insert(
            change.id,
            Entry {
                body,
                pinned: change.is_pending(),
                priority,
                inserted_at: now,
                last_access: self.tick,
                access_count: 1,
            },
        );

        if self.current_bytes > self.config.max_cache_bytes {
            self.evict(MemoryPressure::Normal, now);
        }
    }

    /// Fetch and decode a cached change, updating access statistics.
    pub fn get(&mut self, id: &ChangeId, now: DateTime<Utc>) -> Option<Change> {
        self.tick += 1;
        let ttl = chrono::Duration::milliseconds(self.config.ttl_ms as i64);
        let entry = self.entries.get_mut(id)?;
        if self.config.cache_strategy == CacheStrategy::Ttl
            && !entry.pinned
            && now - entry.inserted_at > ttl
        {
            let stale = self.entries.remove(id).expect("entry exists");
            self.current_bytes -= stale.body.stored_len();
            return None;
        }
        entry.last_access = self.tick;
        entry.access_count += 1;
        let raw = match &entry.body {
            Body::Plain(data) => data.clone(),
            Body::Compressed { data, raw_len } => {
                let mut out = Vec::with_capacity(*raw_len);
                let mut decoder = GzDecoder::new(data.as_slice());
                decoder.read_to_end(&mut out).ok()?;
                out
            }
        };
        serde_json::from_slice(&raw).ok()
    }

    /// A pinned entry becomes evictable once its change reaches a
    /// terminal state.
    pub fn unpin(&mut self, id: &ChangeId) {
        if let Some(entry) = self.entries.get_mut(id) {
            entry.pinned = false;
        }
    }

    /// Evict until under the pressure-dependent target. Returns evicted
    /// ids. Pinned (pending) entries are never candidates.
    pub fn evict(&mut self, pressure: MemoryPressure, now: DateTime<Utc>) -> Vec<ChangeId> {
        let target = match pressure {
            MemoryPressure::Normal => self.config.max_cache_bytes,
            MemoryPressure::High => self.config.low_memory_threshold_bytes,
            MemoryPressure::Critical => 0,
        };

        let mut evicted = Vec::new();

        // TTL strategy: sweep expired unpinned entries first, whatever
        // the byte pressure.
        if self.config.cache_strategy == CacheStrategy::Ttl {
            let ttl = chrono::Duration::milliseconds(self.config.ttl_ms as i64);
            let expired: Vec<ChangeId> = self
                .entries
                .iter()
                .filter(|(_, e)| !e.pinned && now - e.inserted_at > ttl)
                .map(|(id, _)| *id)
                .collect();
            for id in expired {
                let entry = self.entries.remove(&id).expect("entry exists");
                self.current_bytes -= entry.body.stored_len();
                evicted.push(id);
            }
        }

        while self.current_bytes > target {
            let Some(victim) = self.pick_victim() else {
                break;
            };
            let entry = self.entries.remove(&victim).expect("victim exists");
            self.current_bytes -= entry.body.stored_len();
            evicted.push(victim);
        }
        if !evicted.is_empty() {
            debug!(
                evicted = evicted.len(),
                remaining_bytes = self.current_bytes,
                ?pressure,
                "memory eviction pass"
            );
        }
        evicted
    }

    fn pick_victim(&self) -> Option<ChangeId> {
        let candidates = self.entries.iter().filter(|(_, e)| !e.pinned);
        match self.config.cache_strategy {
            CacheStrategy::Lru => candidates
                .min_by_key(|(id, e)| (e.last_access, **id))
                .map(|(id, _)| *id),
            CacheStrategy::Lfu => candidates
                .min_by_key(|(id, e)| (e.access_count, **id))
                .map(|(id, _)| *id),
            CacheStrategy::Ttl => candidates
                .min_by_key(|(id, e)| (e.inserted_at, **id))
                .map(|(id, _)| *id),
            CacheStrategy::Priority => candidates
                .max_by_key(|(id, e)| (e.priority, std::cmp::Reverse(**id)))
                .map(|(id, _)| *id),
        }
    }
}

fn gzip(bytes: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use redline_types::{Category, ChangeContent, ChangeKind, ChangeStatus, SessionId, Span};

    fn ts(seconds: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, 9, 9, 0, seconds).unwrap()
    }

    fn change(session: SessionId, body: &str, status: ChangeStatus) -> Change {
        let mut change = Change::new(
            session,
            ChangeKind::Replace,
            Span::new(0, body.chars().count() as u64),
            ChangeContent::new(body, body.to_uppercase()),
            Category::Style,
            "producer",
            0.5,
            ts(0),
        );
        change.status = status;
        change
    }

    fn config(strategy: CacheStrategy, max_bytes: usize) -> MemoryConfig {
        MemoryConfig {
            cache_strategy: strategy,
            max_cache_bytes: max_bytes,
            low_memory_threshold_bytes: max_bytes / 4,
            ttl_ms: 60_000,
        }
    }

    #[test]
    fn test_put_get_round_trip() {
        let session = SessionId::new();
        let mut cache = MemoryCache::new(config(CacheStrategy::Lru, 1 << 20), usize::MAX);
        let c = change(session, "hello world", ChangeStatus::Accepted);
        cache.put(&c, 3, ts(0));
        assert_eq!(cache.get(&c.id, ts(1)), Some(c));
    }

    #[test]
    fn test_large_bodies_compress_and_round_trip() {
        let session = SessionId::new();
        // Threshold 1: everything compresses.
        let mut cache = MemoryCache::new(config(CacheStrategy::Lru, 1 << 20), 1);
        let big = "lorem ipsum dolor sit amet ".repeat(100);
        let c = change(session, &big, ChangeStatus::Accepted);
        cache.put(&c, 3, ts(0));
        // Compressed storage is smaller than the raw body.
        assert!(cache.current_bytes() < big.len());
        assert_eq!(cache.get(&c.id, ts(1)), Some(c));
    }

    #[test]
    fn test_pending_changes_survive_critical_pressure() {
        let session = SessionId::new();
        let mut cache = MemoryCache::new(config(CacheStrategy::Lru, 1 << 20), usize::MAX);
        let pending = change(session, "pending text", ChangeStatus::Pending);
        let done = change(session, "done text", ChangeStatus::Accepted);
        cache.put(&pending, 3, ts(0));
        cache.put(&done, 3, ts(0));

        let evicted = cache.evict(MemoryPressure::Critical, ts(1));
        assert_eq!(evicted, vec![done.id]);
        assert!(cache.get(&pending.id, ts(2)).is_some());
    }

    #[test]
    fn test_lru_evicts_least_recent() {
        let session = SessionId::new();
        let mut cache = MemoryCache::new(config(CacheStrategy::Lru, 1 << 20), usize::MAX);
        let a = change(session, "aaaa", ChangeStatus::Accepted);
        let b = change(session, "bbbb", ChangeStatus::Accepted);
        cache.put(&a, 3, ts(0));
        cache.put(&b, 3, ts(0));
        cache.get(&a.id, ts(1)); // refresh a

        let evicted = cache.evict(MemoryPressure::Critical, ts(2));
        assert_eq!(evicted.first(), Some(&b.id));
    }

    #[test]
    fn test_priority_evicts_weakest_first() {
        let session = SessionId::new();
        let mut cache = MemoryCache::new(config(CacheStrategy::Priority, 1 << 20), usize::MAX);
        let strong = change(session, "strong", ChangeStatus::Accepted);
        let weak = change(session, "weak", ChangeStatus::Accepted);
        cache.put(&strong, 1, ts(0));
        cache.put(&weak, 5, ts(0));

        let evicted = cache.evict(MemoryPressure::Critical, ts(1));
        assert_eq!(evicted.first(), Some(&weak.id));
    }

    #[test]
    fn test_ttl_expiry_on_get() {
        let session = SessionId::new();
        let mut cache = MemoryCache::new(config(CacheStrategy::Ttl, 1 << 20), usize::MAX);
        let c = change(session, "short-lived", ChangeStatus::Accepted);
        cache.put(&c, 3, ts(0));
        // Within TTL.
        assert!(cache.get(&c.id, ts(30)).is_some());
        // Past the 60 s TTL.
        assert!(cache.get(&c.id, ts(90)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_unpin_makes_entry_evictable() {
        let session = SessionId::new();
        let mut cache = MemoryCache::new(config(CacheStrategy::Lru, 1 << 20), usize::MAX);
        let c = change(session, "was pending", ChangeStatus::Pending);
        cache.put(&c, 3, ts(0));
        assert!(cache.evict(MemoryPressure::Critical, ts(1)).is_empty());

        cache.unpin(&c.id);
        assert_eq!(cache.evict(MemoryPressure::Critical, ts(2)), vec![c.id]);
    }
}
