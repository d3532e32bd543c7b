//! Bounded TTL cache and a single-flight async front for it.
//!
//! # Design Decisions
//! - LRU order is a `VecDeque` of keys; caches here hold at most a few
//!   hundred entries, so the linear reorder on hit is fine
//! - Expiry is lazy (checked on read) plus an explicit `purge_expired`
//! - Failed computations are never stored

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::OnceCell;

use crate::clock::SharedClock;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    inserted_at: u64,
    ttl_ms: u64,
    hits: u64,
}

/// Hit/miss counters for a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

/// LRU cache with per-entry expiry.
#[derive(Debug)]
pub struct TtlCache<V> {
    entries: HashMap<String, Entry<V>>,
    order: VecDeque<String>,
    max_size: usize,
    default_ttl_ms: u64,
    clock: SharedClock,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(max_size: usize, default_ttl_ms: u64, clock: SharedClock) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            max_size: max_size.max(1),
            default_ttl_ms,
            clock,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    pub fn get(&mut self, key: &str) -> Option<V> {
        let now = self.clock.now_millis();
        let expired = match self.entries.get(key) {
            None => {
                self.misses += 1;
                return None;
            }
            Some(entry) => is_expired(entry, now),
        };
        if expired {
            self.remove(key);
            self.misses += 1;
            return None;
        }

        self.touch(key);
        self.hits += 1;
        let entry = self.entries.get_mut(key)?;
        entry.hits += 1;
        Some(entry.value.clone())
    }

    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let ttl = self.default_ttl_ms;
        self.insert_with_ttl(key, value, ttl);
    }

    pub fn insert_with_ttl(&mut self, key: impl Into<String>, value: V, ttl_ms: u64) {
        let key = key.into();
        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_size {
            self.evict_lru();
        }
        let entry = Entry {
            value,
            inserted_at: self.clock.now_millis(),
            ttl_ms,
            hits: 0,
        };
        self.entries.insert(key.clone(), entry);
        self.touch(&key);
    }

    /// Present and not expired. Does not count as a hit.
    pub fn contains(&mut self, key: &str) -> bool {
        let now = self.clock.now_millis();
        match self.entries.get(key) {
            Some(entry) if is_expired(entry, now) => {
                self.remove(key);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(entry.value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = self.clock.now_millis();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| is_expired(entry, now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let lookups = self.hits + self.misses;
        CacheStats {
            size: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                self.hits as f64 / lookups as f64
            },
        }
    }

    fn touch(&mut self, key: &str) {
        self.order.retain(|k| k != key);
        self.order.push_back(key.to_string());
    }

    fn evict_lru(&mut self) {
        if let Some(oldest) = self.order.pop_front() {
            self.entries.remove(&oldest);
            self.evictions += 1;
        }
    }
}

fn is_expired<V>(entry: &Entry<V>, now: u64) -> bool {
    now.saturating_sub(entry.inserted_at) > entry.ttl_ms
}

/// Where a value handed out by [`AsyncCache`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// This caller ran the computation.
    Computed,
    /// Served from the cache or from another caller's in-flight computation.
    Shared,
}

/// Single-flight cache: concurrent callers for one key share one computation.
#[derive(Debug)]
pub struct AsyncCache<V> {
    cache: Mutex<TtlCache<V>>,
    in_flight: Mutex<HashMap<String, Arc<OnceCell<V>>>>,
}

impl<V: Clone> AsyncCache<V> {
    pub fn new(max_size: usize, default_ttl_ms: u64, clock: SharedClock) -> Self {
        Self {
            cache: Mutex::new(TtlCache::new(max_size, default_ttl_ms, clock)),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.lock_cache().get(key)
    }

    /// Return the cached value for `key` or run `compute` to produce it.
    ///
    /// A caller arriving while a computation for the same key is running
    /// waits for it. An `Err` is returned to the caller that produced it and
    /// leaves nothing behind.
    pub async fn get_or_try_compute<E, F, Fut>(&self, key: &str, compute: F) -> Result<(V, Lookup), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.lock_cache().get(key) {
            return Ok((value, Lookup::Shared));
        }

        let cell = {
            let mut in_flight = self.lock_in_flight();
            Arc::clone(in_flight.entry(key.to_string()).or_default())
        };

        let mut ran = false;
        let outcome = cell
            .get_or_try_init(|| {
                ran = true;
                compute()
            })
            .await
            .cloned();

        if ran {
            if let Ok(value) = &outcome {
                self.lock_cache().insert(key, value.clone());
            }
            let mut in_flight = self.lock_in_flight();
            if in_flight.get(key).is_some_and(|c| Arc::ptr_eq(c, &cell)) {
                in_flight.remove(key);
            }
        }

        let origin = if ran { Lookup::Computed } else { Lookup::Shared };
        outcome.map(|value| (value, origin))
    }

    pub fn invalidate(&self, key: &str) -> Option<V> {
        self.lock_cache().remove(key)
    }

    pub fn clear(&self) {
        self.lock_cache().clear();
    }

    pub fn purge_expired(&self) -> usize {
        self.lock_cache().purge_expired()
    }

    pub fn stats(&self) -> CacheStats {
        self.lock_cache().stats()
    }

    fn lock_cache(&self) -> MutexGuard<'_, TtlCache<V>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<String, Arc<OnceCell<V>>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(1_000))
    }

    #[test]
    fn test_lru_eviction() {
        let mut cache = TtlCache::new(2, 10_000, clock());
        cache.insert("a", 1);
        cache.insert("b", 2);
        assert_eq!(cache.get("a"), Some(1));
        cache.insert("c", 3);

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(1));
        assert_eq!(cache.get("c"), Some(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_expiry_and_stats() {
        let clock = clock();
        let mut cache = TtlCache::new(10, 100, clock.clone());
        cache.insert("a", "x");
        cache.insert_with_ttl("b", "y", 1_000);
        assert_eq!(cache.get("a"), Some("x"));

        clock.advance(101);
        assert_eq!(cache.get("a"), None);
        assert!(cache.contains("b"));
        clock.advance(1_000);
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.is_empty());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache: AsyncCache<String> = AsyncCache::new(10, 10_000, clock());
        let failed: Result<_, &str> = cache.get_or_try_compute("k", || async { Err("boom") }).await;
        assert_eq!(failed, Err("boom"));

        let ok: Result<_, &str> = cache
            .get_or_try_compute("k", || async { Ok("v".to_string()) })
            .await;
        assert_eq!(ok, Ok(("v".to_string(), Lookup::Computed)));

        let again: Result<_, &str> = cache
            .get_or_try_compute("k", || async { Ok("other".to_string()) })
            .await;
        assert_eq!(again, Ok(("v".to_string(), Lookup::Shared)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_computation() {
        let cache: Arc<AsyncCache<u32>> = Arc::new(AsyncCache::new(10, 10_000, clock()));
        let calls = Arc::new(AtomicUsize::new(0));

        let run = |cache: Arc<AsyncCache<u32>>, calls: Arc<AtomicUsize>| async move {
            cache
                .get_or_try_compute("k", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, std::convert::Infallible>(7)
                })
                .await
        };

        let (a, b) = tokio::join!(
            run(cache.clone(), calls.clone()),
            run(cache.clone(), calls.clone())
        );
        let mut origins = vec![a.unwrap().1, b.unwrap().1];
        origins.sort_by_key(|o| *o == Lookup::Shared);
        assert_eq!(origins, vec![Lookup::Computed, Lookup::Shared]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
