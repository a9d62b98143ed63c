use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

/// Tunables for the response cache.
#[derive(Debug, Clone)]
pub struct CacheSettings {
    /// Entries older than this are invalid and removed on lookup.
    pub ttl: Duration,
    /// When the map grows past this, the oldest-inserted entry is
    /// evicted (insertion order, not LRU).
    pub capacity: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_millis(60_000),
            capacity: 100,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    inserted_at: Instant,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// Insertion order of live keys, oldest at the front.
    order: VecDeque<String>,
}

/// Short-TTL deduplication cache keyed by the full request
/// fingerprint. Prevents redundant upstream calls for identical recent
/// requests.
pub struct ResponseCache {
    settings: CacheSettings,
    inner: Mutex<CacheInner>,
}

impl ResponseCache {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Look up a live entry; expired entries are deleted on the spot.
    pub fn get(&self, fingerprint: &str) -> Option<String> {
        let mut inner = self.inner.lock().expect("cache lock poisoned");

        let expired = match inner.entries.get(fingerprint) {
            Some(entry) => entry.inserted_at.elapsed() > self.settings.ttl,
            None => return None,
        };
        if expired {
            debug!("cache entry expired, evicting");
            inner.entries.remove(fingerprint);
            inner.order.retain(|k| k != fingerprint);
            return None;
        }
        inner.entries.get(fingerprint).map(|e| e.value.clone())
    }

    /// Insert or overwrite. Overwriting refreshes the entry's position
    /// in insertion order.
    pub fn put(&self, fingerprint: &str, value: &str) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");

        if inner.entries.contains_key(fingerprint) {
            inner.order.retain(|k| k != fingerprint);
        }
        inner.entries.insert(
            fingerprint.to_string(),
            CacheEntry {
                value: value.to_string(),
                inserted_at: Instant::now(),
            },
        );
        inner.order.push_back(fingerprint.to_string());

        while inner.entries.len() > self.settings.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                debug!("cache over capacity, evicting oldest entry");
                inner.entries.remove(&oldest);
            } else {
                break;
            }
        }
    }

    /// Operational/manual reset; also a testing hook.
    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("cache lock poisoned");
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(CacheSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(ttl_ms: u64, capacity: usize) -> ResponseCache {
        ResponseCache::new(CacheSettings {
            ttl: Duration::from_millis(ttl_ms),
            capacity,
        })
    }

    #[test]
    fn hit_within_ttl() {
        let cache = cache(60_000, 100);
        cache.put("k1", "v1");
        assert_eq!(cache.get("k1"), Some("v1".to_string()));
        assert_eq!(cache.get("k2"), None);
    }

    #[tokio::test]
    async fn expires_lazily_after_ttl() {
        let cache = cache(20, 100);
        cache.put("k1", "v1");
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.get("k1"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn evicts_oldest_inserted_when_over_capacity() {
        let cache = cache(60_000, 3);
        cache.put("a", "1");
        cache.put("b", "2");
        cache.put("c", "3");
        cache.put("d", "4");

        assert_eq!(cache.len(), 3);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("d"), Some("4".to_string()));
    }

    #[test]
    fn overwrite_refreshes_insertion_order() {
        let cache = cache(60_000, 2);
        cache.put("a", "1");
        cache.put("b", "2");
        cache.put("a", "1-again");
        cache.put("c", "3");

        // "b" is now the oldest and gets evicted, not "a".
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some("1-again".to_string()));
        assert_eq!(cache.get("c"), Some("3".to_string()));
    }

    #[test]
    fn clear_empties_everything() {
        let cache = cache(60_000, 100);
        cache.put("a", "1");
        cache.put("b", "2");
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.get("a"), None);
    }
}
