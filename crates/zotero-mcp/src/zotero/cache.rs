//! Bounded, TTL-based cache for idempotent read responses.
//!
//! Keys are derived from the logical read (method + URL); mutating calls are
//! never stored. Entries expire lazily on read and evict oldest-inserted
//! first when the cache is full — insertion order, not access order, because
//! read patterns here are bursty and recency is a poor predictor of reuse
//! for bibliographic queries.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::transport::RawResponse;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl: Duration::from_secs(30),
            max_entries: 128,
        }
    }
}

impl CacheConfig {
    /// Clamp nonsensical values instead of failing.
    pub fn sanitized(self) -> Self {
        Self {
            max_entries: self.max_entries.max(1),
            ..self
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    value: RawResponse,
    stored_at: Instant,
}

/// Thread-safe response cache shared across concurrent tool invocations.
///
/// When disabled, `get` always misses and `put` is a no-op, so callers need
/// no special-casing.
#[derive(Debug)]
pub struct ReadCache {
    config: CacheConfig,
    inner: Mutex<CacheInner>,
}

#[derive(Debug, Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

impl ReadCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config: config.sanitized(),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled && !self.config.ttl.is_zero()
    }

    pub fn get(&self, key: &str) -> Option<RawResponse> {
        self.get_at(key, Instant::now())
    }

    pub fn put(&self, key: &str, value: RawResponse) {
        self.put_at(key, value, Instant::now());
    }

    pub fn invalidate(&self, key: &str) {
        let mut inner = self.lock();
        if inner.entries.remove(key).is_some() {
            inner.order.retain(|existing| existing != key);
        }
    }

    pub(crate) fn get_at(&self, key: &str, now: Instant) -> Option<RawResponse> {
        if !self.enabled() {
            return None;
        }
        let mut inner = self.lock();
        let expired = match inner.entries.get(key) {
            None => return None,
            Some(entry) => now.duration_since(entry.stored_at) >= self.config.ttl,
        };
        if expired {
            inner.entries.remove(key);
            inner.order.retain(|existing| existing != key);
            return None;
        }
        inner.entries.get(key).map(|entry| entry.value.clone())
    }

    pub(crate) fn put_at(&self, key: &str, value: RawResponse, now: Instant) {
        if !self.enabled() {
            return;
        }
        let mut inner = self.lock();
        if inner.entries.remove(key).is_some() {
            inner.order.retain(|existing| existing != key);
        }
        while inner.entries.len() >= self.config.max_entries {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&oldest);
        }
        inner.order.push_back(key.to_string());
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at: now,
            },
        );
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zotero::transport::testing::text_response;

    fn cache(max_entries: usize) -> ReadCache {
        ReadCache::new(CacheConfig {
            enabled: true,
            ttl: Duration::from_secs(30),
            max_entries,
        })
    }

    #[test]
    fn get_returns_value_before_ttl_and_misses_after() {
        let cache = cache(8);
        let start = Instant::now();
        cache.put_at("k", text_response(200, "v"), start);

        let hit = cache.get_at("k", start + Duration::from_secs(29));
        assert_eq!(hit.unwrap().text(), "v");

        let miss = cache.get_at("k", start + Duration::from_secs(30));
        assert!(miss.is_none());

        // Expiry evicted the entry: an earlier timestamp cannot revive it.
        assert!(cache.get_at("k", start).is_none());
    }

    #[test]
    fn capacity_evicts_the_first_inserted_entry() {
        let cache = cache(3);
        let now = Instant::now();
        for (index, key) in ["a", "b", "c", "d"].iter().enumerate() {
            cache.put_at(key, text_response(200, key), now + Duration::from_secs(index as u64));
        }

        let later = now + Duration::from_secs(10);
        assert!(cache.get_at("a", later).is_none());
        for key in ["b", "c", "d"] {
            assert_eq!(cache.get_at(key, later).unwrap().text(), key);
        }
    }

    #[test]
    fn reinserting_a_key_refreshes_it_without_growing() {
        let cache = cache(2);
        let now = Instant::now();
        cache.put_at("a", text_response(200, "a1"), now);
        cache.put_at("b", text_response(200, "b"), now);
        cache.put_at("a", text_response(200, "a2"), now + Duration::from_secs(1));
        cache.put_at("c", text_response(200, "c"), now + Duration::from_secs(2));

        let later = now + Duration::from_secs(3);
        // "b" was the oldest insertion once "a" was refreshed.
        assert!(cache.get_at("b", later).is_none());
        assert_eq!(cache.get_at("a", later).unwrap().text(), "a2");
        assert_eq!(cache.get_at("c", later).unwrap().text(), "c");
    }

    #[test]
    fn disabled_cache_never_stores() {
        let cache = ReadCache::new(CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        });
        cache.put("k", text_response(200, "v"));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn zero_ttl_disables_the_cache() {
        let cache = ReadCache::new(CacheConfig {
            enabled: true,
            ttl: Duration::ZERO,
            max_entries: 8,
        });
        assert!(!cache.enabled());
        cache.put("k", text_response(200, "v"));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn invalidate_removes_the_entry() {
        let cache = cache(8);
        cache.put("k", text_response(200, "v"));
        cache.invalidate("k");
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn concurrent_access_never_tears_entries() {
        let cache = std::sync::Arc::new(cache(16));
        let mut handles = Vec::new();
        for worker in 0..8 {
            let cache = cache.clone();
            handles.push(std::thread::spawn(move || {
                for round in 0..100 {
                    let body = format!("{worker}-{round}");
                    cache.put("shared", text_response(200, &body));
                    if let Some(value) = cache.get("shared") {
                        let text = value.text();
                        let (w, r) = text.split_once('-').expect("intact entry");
                        assert!(w.parse::<u32>().is_ok() && r.parse::<u32>().is_ok());
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(cache.get("shared").is_some());
    }
}
