// cache.rs
use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::{Duration, Instant},
};
use tracing::debug;

/// Bounded, TTL-based record of message ids already accepted.
///
/// Entries leave either when read after their TTL, or when the eviction
/// sequence grows past `capacity`, oldest first. Capacity eviction ignores
/// TTL, so under heavy churn the effective window is shorter than `ttl`.
#[derive(Debug)]
pub struct DedupeCache {
    ttl: Duration,
    capacity: usize,
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    evict_order: VecDeque<(String, u64)>,
    next_seq: u64,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    first_seen: Instant,
    seq: u64,
}

impl DedupeCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Whether `id` was recorded and has not expired. Expired entries are purged.
    pub fn exists(&self, id: &str) -> bool {
        self.exists_at(id, Instant::now())
    }

    pub fn add(&self, id: &str) {
        self.add_at(id, Instant::now())
    }

    /// `exists` and `add` under one lock. Returns `true` if `id` was newly recorded.
    pub fn insert_if_absent(&self, id: &str) -> bool {
        let now = Instant::now();
        let mut inner = self.lock();
        if self.live(&mut inner, id, now) {
            return false;
        }
        self.record(&mut inner, id, now);
        true
    }

    /// Forgets `id` so a redelivery is treated as new. Returns whether it was present.
    pub fn remove(&self, id: &str) -> bool {
        // The eviction slot stays queued and is skipped once its entry is gone.
        self.lock().entries.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn exists_at(&self, id: &str, now: Instant) -> bool {
        let mut inner = self.lock();
        self.live(&mut inner, id, now)
    }

    fn add_at(&self, id: &str, now: Instant) {
        let mut inner = self.lock();
        self.record(&mut inner, id, now);
    }

    fn live(&self, inner: &mut Inner, id: &str, now: Instant) -> bool {
        let first_seen = match inner.entries.get(id) {
            Some(entry) => entry.first_seen,
            None => return false,
        };

        if now.saturating_duration_since(first_seen) > self.ttl {
            inner.entries.remove(id);
            return false;
        }
        true
    }

    fn record(&self, inner: &mut Inner, id: &str, now: Instant) {
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            id.to_string(),
            Entry {
                first_seen: now,
                seq,
            },
        );
        inner.evict_order.push_back((id.to_string(), seq));

        while inner.evict_order.len() > self.capacity {
            let Some((key, seq)) = inner.evict_order.pop_front() else {
                break;
            };
            // A later add of the same id owns the map entry; leave it alone.
            let current = matches!(inner.entries.get(&key), Some(entry) if entry.seq == seq);
            if !current {
                continue;
            }
            if let Some(entry) = inner.entries.remove(&key) {
                let age = now.saturating_duration_since(entry.first_seen);
                if age <= self.ttl {
                    debug!(
                        message_id = %key,
                        age_ms = age.as_millis() as u64,
                        capacity = self.capacity,
                        "evicted dedupe entry before its TTL elapsed"
                    );
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(300);

    #[test]
    fn added_id_exists_until_ttl() {
        let cache = DedupeCache::new(TTL, 2000);
        let start = Instant::now();

        assert!(!cache.exists_at("msg-1", start));
        cache.add_at("msg-1", start);
        assert!(cache.exists_at("msg-1", start));
        assert!(cache.exists_at("msg-1", start + TTL));
        assert!(!cache.exists_at("msg-1", start + TTL + Duration::from_millis(1)));
    }

    #[test]
    fn expired_lookup_purges_entry() {
        let cache = DedupeCache::new(TTL, 2000);
        let start = Instant::now();
        cache.add_at("msg-1", start);
        assert_eq!(cache.len(), 1);

        assert!(!cache.exists_at("msg-1", start + TTL * 2));
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn never_exceeds_capacity() {
        let cache = DedupeCache::new(TTL, 2000);
        let start = Instant::now();
        for i in 0..5000 {
            cache.add_at(&format!("msg-{i}"), start);
            assert!(cache.len() <= 2000);
        }
        assert_eq!(cache.len(), 2000);
        assert!(cache.lock().evict_order.len() <= 2000);
    }

    #[test]
    fn capacity_evicts_oldest_first_regardless_of_ttl() {
        let cache = DedupeCache::new(TTL, 3);
        let start = Instant::now();
        for id in ["a", "b", "c", "d"] {
            cache.add_at(id, start);
        }

        assert!(!cache.exists_at("a", start));
        assert!(cache.exists_at("b", start));
        assert!(cache.exists_at("d", start));
    }

    #[test]
    fn stale_slot_does_not_evict_readded_id() {
        let cache = DedupeCache::new(TTL, 3);
        let start = Instant::now();
        cache.add_at("a", start);
        // "a" expires and is added again, leaving its old slot at the front.
        let later = start + TTL * 2;
        assert!(!cache.exists_at("a", later));
        cache.add_at("a", later);
        cache.add_at("b", later);
        cache.add_at("c", later);

        assert!(cache.exists_at("a", later));
        assert!(cache.exists_at("b", later));
        assert!(cache.exists_at("c", later));
    }

    #[test]
    fn insert_if_absent_accepts_once() {
        let cache = DedupeCache::new(TTL, 2000);
        assert!(cache.insert_if_absent("msg-1"));
        assert!(!cache.insert_if_absent("msg-1"));
        assert!(cache.exists("msg-1"));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn concurrent_inserts_accept_exactly_one() {
        let cache = std::sync::Arc::new(DedupeCache::new(TTL, 2000));
        let accepted: usize = (0..8)
            .map(|_| {
                let cache = std::sync::Arc::clone(&cache);
                std::thread::spawn(move || cache.insert_if_absent("same-id"))
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|handle| handle.join().unwrap() as usize)
            .sum();
        assert_eq!(accepted, 1);
    }

    #[test]
    fn removed_id_is_accepted_again() {
        let cache = DedupeCache::new(TTL, 2);
        assert!(cache.insert_if_absent("msg-1"));
        assert!(cache.remove("msg-1"));
        assert!(!cache.remove("msg-1"));
        assert!(cache.insert_if_absent("msg-1"));

        // The leftover slot from the first insert must not evict the new entry.
        assert!(cache.insert_if_absent("msg-2"));
        assert!(cache.exists("msg-1"));
        assert!(cache.exists("msg-2"));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let cache = DedupeCache::new(TTL, 0);
        cache.add("only");
        assert!(cache.exists("only"));
        assert_eq!(cache.capacity(), 1);
    }
}
