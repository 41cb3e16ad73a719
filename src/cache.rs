//! Bounded, TTL-expiring, insertion-order-evicting response cache.
//!
//! Adapted from the idempotency plugin's `Completed` cache-entry shape, but simplified: this
//! store only ever holds already-finished responses (the deduplicator owns the in-flight half),
//! so there's no `InFlight` variant and no payload-signature conflict check here.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use parking_lot::RwLock;

/// A cached response, ready to be replayed verbatim on a hit.
#[derive(Clone, Debug)]
pub struct CacheEntry {
  pub status: StatusCode,
  pub headers: HeaderMap,
  pub body: Bytes,
  created: Instant,
  ttl: Duration,
}

impl CacheEntry {
  pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes, ttl: Duration) -> Self {
    Self {
      status,
      headers,
      body,
      created: Instant::now(),
      ttl,
    }
  }

  /// An entry is expired once `now >= created + ttl` (strict, per the boundary spec).
  fn is_expired(&self) -> bool {
    Instant::now() >= self.created + self.ttl
  }
}

/// Point-in-time hit/miss/size counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
  pub hits: u64,
  pub misses: u64,
  pub size: usize,
}

struct Inner {
  map: HashMap<String, CacheEntry>,
  order: VecDeque<String>,
}

/// Bounded response cache keyed by request fingerprint.
pub struct ResponseCache {
  capacity: usize,
  inner: RwLock<Inner>,
  hits: AtomicU64,
  misses: AtomicU64,
}

impl ResponseCache {
  pub fn new(capacity: usize) -> Self {
    Self {
      capacity: capacity.max(1),
      inner: RwLock::new(Inner {
        map: HashMap::new(),
        order: VecDeque::new(),
      }),
      hits: AtomicU64::new(0),
      misses: AtomicU64::new(0),
    }
  }

  /// Looks up `key`. Expired entries are evicted lazily and reported as a miss.
  pub fn get(&self, key: &str) -> Option<CacheEntry> {
    {
      let guard = self.inner.read();
      match guard.map.get(key) {
        Some(entry) if !entry.is_expired() => {
          let entry = entry.clone();
          drop(guard);
          self.hits.fetch_add(1, Ordering::Relaxed);
          return Some(entry);
        }
        Some(_) => {
          // Expired: fall through to take the write lock and evict.
        }
        None => {
          drop(guard);
          self.misses.fetch_add(1, Ordering::Relaxed);
          return None;
        }
      }
    }

    let mut guard = self.inner.write();
    guard.map.remove(key);
    guard.order.retain(|k| k != key);
    self.misses.fetch_add(1, Ordering::Relaxed);
    None
  }

  /// Inserts or updates `key`. Updating an existing key does not change its eviction position.
  /// Inserting a new key evicts the oldest entries (insertion order) until under capacity.
  pub fn set(&self, key: String, entry: CacheEntry) {
    let mut guard = self.inner.write();
    if guard.map.contains_key(&key) {
      guard.map.insert(key, entry);
      return;
    }

    while guard.map.len() >= self.capacity {
      let Some(oldest) = guard.order.pop_front() else {
        break;
      };
      guard.map.remove(&oldest);
    }

    guard.order.push_back(key.clone());
    guard.map.insert(key, entry);
  }

  pub fn delete(&self, key: &str) {
    let mut guard = self.inner.write();
    guard.map.remove(key);
    guard.order.retain(|k| k != key);
  }

  pub fn clear(&self) {
    let mut guard = self.inner.write();
    guard.map.clear();
    guard.order.clear();
  }

  pub fn size(&self) -> usize {
    self.inner.read().map.len()
  }

  pub fn stats(&self) -> CacheStats {
    CacheStats {
      hits: self.hits.load(Ordering::Relaxed),
      misses: self.misses.load(Ordering::Relaxed),
      size: self.size(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn entry(ttl: Duration) -> CacheEntry {
    CacheEntry::new(StatusCode::OK, HeaderMap::new(), Bytes::from_static(b"body"), ttl)
  }

  #[test]
  fn miss_then_hit() {
    let cache = ResponseCache::new(10);
    assert!(cache.get("k").is_none());
    cache.set("k".to_string(), entry(Duration::from_secs(30)));
    assert!(cache.get("k").is_some());
    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.size, 1);
  }

  #[test]
  fn expired_entry_is_evicted_and_counted_as_miss() {
    let cache = ResponseCache::new(10);
    cache.set("k".to_string(), entry(Duration::from_millis(1)));
    std::thread::sleep(Duration::from_millis(5));
    assert!(cache.get("k").is_none());
    assert_eq!(cache.size(), 0);
  }

  #[test]
  fn capacity_is_never_exceeded() {
    let cache = ResponseCache::new(2);
    cache.set("a".to_string(), entry(Duration::from_secs(30)));
    cache.set("b".to_string(), entry(Duration::from_secs(30)));
    cache.set("c".to_string(), entry(Duration::from_secs(30)));
    assert_eq!(cache.size(), 2);
    // "a" was the oldest and should have been evicted.
    assert!(cache.get("a").is_none());
    assert!(cache.get("b").is_some());
  }

  #[test]
  fn updating_existing_key_does_not_reorder() {
    let cache = ResponseCache::new(2);
    cache.set("a".to_string(), entry(Duration::from_secs(30)));
    cache.set("b".to_string(), entry(Duration::from_secs(30)));
    // Update "a" again; it should still be the eviction candidate since order is insertion-based.
    cache.set("a".to_string(), entry(Duration::from_secs(30)));
    cache.set("c".to_string(), entry(Duration::from_secs(30)));
    assert!(cache.get("a").is_none());
    assert!(cache.get("b").is_some());
    assert!(cache.get("c").is_some());
  }

  #[test]
  fn delete_and_clear() {
    let cache = ResponseCache::new(10);
    cache.set("a".to_string(), entry(Duration::from_secs(30)));
    cache.delete("a");
    assert_eq!(cache.size(), 0);
    cache.set("b".to_string(), entry(Duration::from_secs(30)));
    cache.clear();
    assert_eq!(cache.size(), 0);
  }
}
