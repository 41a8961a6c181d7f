//! In-memory hierarchy cache keyed by source id and validated by fingerprint

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use crate::error::CacheError;
use crate::hierarchy::ClassHierarchy;
use crate::model::{Fingerprint, SourceId};

/// Default maximum number of cached sources.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Default maximum entry age.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(3600);

/// Capacity and age limits for [`CacheManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub capacity: usize,
    pub max_age: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_age: DEFAULT_MAX_AGE,
        }
    }
}

/// A cached hierarchy.
///
/// Hierarchy, fingerprint and creation time are fixed at insertion. The
/// access tick changes on every hit and only drives eviction.
#[derive(Debug)]
pub struct CacheEntry {
    hierarchy: Arc<ClassHierarchy>,
    fingerprint: Fingerprint,
    created_at: DateTime<Utc>,
    last_access: AtomicU64,
}

impl CacheEntry {
    fn new(hierarchy: Arc<ClassHierarchy>, fingerprint: Fingerprint, created_at: DateTime<Utc>, tick: u64) -> Self {
        Self {
            hierarchy,
            fingerprint,
            created_at,
            last_access: AtomicU64::new(tick),
        }
    }

    pub fn hierarchy(&self) -> Arc<ClassHierarchy> {
        Arc::clone(&self.hierarchy)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Logical access time; larger is more recent.
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    fn is_expired(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.created_at)
            .to_std()
            .map(|age| age > max_age)
            .unwrap_or(false)
    }
}

/// Hit/miss/eviction counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub generation: u64,
}

/// Thread-safe store of built hierarchies.
///
/// Readers of distinct keys never block each other. Every mutation bumps a
/// generation counter so derived views can tell when they are stale.
#[derive(Debug)]
pub struct CacheManager {
    entries: DashMap<SourceId, Arc<CacheEntry>>,
    config: CacheConfig,
    clock: AtomicU64,
    generation: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        if config.capacity == 0 {
            return Err(CacheError::InvalidArgument {
                reason: "capacity must be at least 1".to_string(),
            });
        }
        Ok(Self {
            entries: DashMap::new(),
            config,
            clock: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    /// Returns the entry for `source` if it was stored with `fingerprint` and
    /// has not expired. Expired entries are dropped on the way.
    pub fn get(&self, source: &SourceId, fingerprint: Fingerprint) -> Option<Arc<CacheEntry>> {
        let entry = self.entries.get(source).map(|e| Arc::clone(e.value()));
        let Some(entry) = entry else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if entry.is_expired(self.config.max_age, Utc::now()) {
            debug!("Cache entry for {} expired", source);
            if self.entries.remove_if(source, |_, current| Arc::ptr_eq(current, &entry)).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                self.bump();
            }
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        if entry.fingerprint != fingerprint {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        entry.last_access.store(self.tick(), Ordering::Relaxed);
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry)
    }

    /// Stores a hierarchy, replacing any previous entry for the source, and
    /// evicts least-recently-used entries beyond capacity.
    pub fn put(&self, source: SourceId, hierarchy: Arc<ClassHierarchy>, fingerprint: Fingerprint) -> Arc<CacheEntry> {
        self.put_at(source, hierarchy, fingerprint, Utc::now())
    }

    /// Like [`put`](Self::put) with an explicit creation time, used when
    /// restoring persisted entries.
    pub fn put_at(
        &self,
        source: SourceId,
        hierarchy: Arc<ClassHierarchy>,
        fingerprint: Fingerprint,
        created_at: DateTime<Utc>,
    ) -> Arc<CacheEntry> {
        let entry = Arc::new(CacheEntry::new(hierarchy, fingerprint, created_at, self.tick()));
        self.entries.insert(source.clone(), Arc::clone(&entry));
        self.bump();
        self.enforce_capacity(&source);
        entry
    }

    fn enforce_capacity(&self, keep: &SourceId) {
        while self.entries.len() > self.config.capacity {
            let victim = self
                .entries
                .iter()
                .filter(|e| e.key() != keep)
                .min_by_key(|e| e.value().last_access())
                .map(|e| (e.key().clone(), Arc::clone(e.value())));
            let Some((key, entry)) = victim else {
                break;
            };
            if self.entries.remove_if(&key, |_, current| Arc::ptr_eq(current, &entry)).is_some() {
                debug!("Evicted {} from cache", key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                self.bump();
            }
        }
    }

    pub fn invalidate(&self, source: &SourceId) -> bool {
        let removed = self.entries.remove(source).is_some();
        if removed {
            self.bump();
        }
        removed
    }

    pub fn invalidate_all(&self) {
        self.entries.clear();
        self.bump();
    }

    /// Drops every expired entry. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !entry.is_expired(self.config.max_age, now));
        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            self.bump();
        }
        removed
    }

    /// Live (unexpired) entries, unordered.
    pub fn snapshot(&self) -> Vec<(SourceId, Arc<CacheEntry>)> {
        let now = Utc::now();
        self.entries
            .iter()
            .filter(|e| !e.value().is_expired(self.config.max_age, now))
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect()
    }

    pub fn contains(&self, source: &SourceId) -> bool {
        self.entries.contains_key(source)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            generation: self.generation(),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy(name: &str) -> Arc<ClassHierarchy> {
        Arc::new(ClassHierarchy::new(SourceId::new(name), Fingerprint::default()))
    }

    fn fp(n: u128) -> Fingerprint {
        Fingerprint::from_u128(n)
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = CacheManager::new(CacheConfig {
            capacity: 0,
            ..Default::default()
        });
        assert!(matches!(err, Err(CacheError::InvalidArgument { .. })));
    }

    #[test]
    fn fingerprint_must_match() {
        let cache = CacheManager::new(CacheConfig::default()).unwrap();
        let s = SourceId::new("S");
        cache.put(s.clone(), hierarchy("S"), fp(1));
        assert!(cache.get(&s, fp(1)).is_some());
        assert!(cache.get(&s, fp(2)).is_none());
        assert!(cache.get(&SourceId::new("other"), fp(1)).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.entries, 1);
    }

    #[test]
    fn last_put_wins() {
        let cache = CacheManager::new(CacheConfig::default()).unwrap();
        let s = SourceId::new("S");
        cache.put(s.clone(), hierarchy("first"), fp(1));
        cache.put(s.clone(), hierarchy("second"), fp(2));
        assert!(cache.get(&s, fp(1)).is_none());
        let entry = cache.get(&s, fp(2)).unwrap();
        assert_eq!(entry.hierarchy().source.as_str(), "second");
    }

    #[test]
    fn least_recently_used_is_evicted_first() {
        let cache = CacheManager::new(CacheConfig {
            capacity: 2,
            ..Default::default()
        })
        .unwrap();
        let (a, b, c) = (SourceId::new("A"), SourceId::new("B"), SourceId::new("C"));
        cache.put(a.clone(), hierarchy("A"), fp(1));
        cache.put(b.clone(), hierarchy("B"), fp(1));
        assert!(cache.get(&a, fp(1)).is_some());
        cache.put(c.clone(), hierarchy("C"), fp(1));

        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&a));
        assert!(!cache.contains(&b));
        assert!(cache.contains(&c));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn expired_entries_are_dropped() {
        let cache = CacheManager::new(CacheConfig {
            capacity: 10,
            max_age: Duration::from_millis(20),
        })
        .unwrap();
        let s = SourceId::new("S");
        cache.put(s.clone(), hierarchy("S"), fp(1));
        cache.put(SourceId::new("T"), hierarchy("T"), fp(1));
        std::thread::sleep(Duration::from_millis(60));

        assert!(cache.get(&s, fp(1)).is_none());
        assert!(!cache.contains(&s));
        assert_eq!(cache.sweep_expired(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn restored_entries_keep_their_age() {
        let cache = CacheManager::new(CacheConfig {
            capacity: 10,
            max_age: Duration::from_secs(60),
        })
        .unwrap();
        let s = SourceId::new("old");
        let created = Utc::now() - chrono::Duration::seconds(120);
        cache.put_at(s.clone(), hierarchy("old"), fp(1), created);
        assert!(cache.get(&s, fp(1)).is_none());
    }

    #[test]
    fn every_mutation_bumps_generation() {
        let cache = CacheManager::new(CacheConfig::default()).unwrap();
        let s = SourceId::new("S");
        let g0 = cache.generation();
        cache.put(s.clone(), hierarchy("S"), fp(1));
        let g1 = cache.generation();
        assert!(g1 > g0);
        cache.get(&s, fp(1));
        assert_eq!(cache.generation(), g1);
        assert!(cache.invalidate(&s));
        assert!(cache.generation() > g1);
        assert!(!cache.invalidate(&s));
        let g2 = cache.generation();
        cache.invalidate_all();
        assert!(cache.generation() > g2);
    }

    #[test]
    fn concurrent_readers_and_writers() {
        let cache = Arc::new(CacheManager::new(CacheConfig { capacity: 8, ..Default::default() }).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for i in 0..200u128 {
                        let s = SourceId::new(format!("src-{}", (t * 3 + i as usize) % 16));
                        cache.put(s.clone(), hierarchy("x"), fp(i % 4));
                        let _ = cache.get(&s, fp(i % 4));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.len() <= 8 + 8);
        assert!(cache.stats().hits + cache.stats().misses >= 1600);
    }
}
