//! Address to coordinate cache.
//!
//! Geocoding lookups are slow and rate limited, and dashboards ask for the
//! same handful of addresses over and over. [`GeocodeCache`] memoizes results
//! with a bounded size (least recently used entries are evicted) and a time
//! to live. The cache is a plain value owned by the caller and handed to the
//! data-service client, so there is no hidden process-wide state.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use log::debug;
use lru::LruCache;

use crate::GeoPoint;

/// Configuration for [`GeocodeCache`].
#[derive(Debug, Clone)]
pub struct GeocodeCacheConfig {
    /// Maximum number of cached addresses.
    /// Default: 256
    pub capacity: NonZeroUsize,

    /// How long a cached result stays valid.
    /// Default: 24 hours
    pub ttl: Duration,
}

impl Default for GeocodeCacheConfig {
    fn default() -> Self {
        Self {
            capacity: NonZeroUsize::new(256).unwrap_or(NonZeroUsize::MIN),
            ttl: Duration::from_secs(24 * 60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    point: GeoPoint,
    inserted_at: Instant,
}

/// Bounded, expiring address → coordinate memo.
#[derive(Debug)]
pub struct GeocodeCache {
    entries: LruCache<String, Entry>,
    ttl: Duration,
    hits: u64,
    misses: u64,
}

/// Cache keys ignore case and surrounding or repeated whitespace.
pub fn normalize_address(address: &str) -> String {
    address
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

impl GeocodeCache {
    pub fn new(config: GeocodeCacheConfig) -> Self {
        Self {
            entries: LruCache::new(config.capacity),
            ttl: config.ttl,
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, address: &str) -> Option<GeoPoint> {
        self.get_at(address, Instant::now())
    }

    /// Look up `address` as of `now`, removing the entry if it has expired.
    pub fn get_at(&mut self, address: &str, now: Instant) -> Option<GeoPoint> {
        let key = normalize_address(address);

        let fresh = match self.entries.get(&key).copied() {
            Some(entry) if now.saturating_duration_since(entry.inserted_at) < self.ttl => {
                Some(entry.point)
            }
            Some(_) => {
                debug!("[GeocodeCache] Entry for '{}' expired", key);
                self.entries.pop(&key);
                None
            }
            None => None,
        };

        if fresh.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        fresh
    }

    pub fn insert(&mut self, address: &str, point: GeoPoint) {
        self.insert_at(address, point, Instant::now());
    }

    pub fn insert_at(&mut self, address: &str, point: GeoPoint, now: Instant) {
        let key = normalize_address(address);
        if let Some((evicted, _)) = self.entries.push(key.clone(), Entry { point, inserted_at: now }) {
            if evicted != key {
                debug!("[GeocodeCache] Evicted '{}'", evicted);
            }
        }
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&mut self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    pub fn purge_expired_at(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| now.saturating_duration_since(e.inserted_at) >= self.ttl)
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            self.entries.pop(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// (hits, misses) since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}

impl Default for GeocodeCache {
    fn default() -> Self {
        Self::new(GeocodeCacheConfig::default())
    }
}
