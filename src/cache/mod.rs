//! Cache-aside layer shielding remote sources from redundant calls
//!
//! This module provides functionality for:
//! - Typed get/set over pluggable backends (in-memory or SQLite)
//! - Per-entry time-to-live with lazy eviction
//! - Hit/miss accounting across the cache instance's lifetime
//! - An explicit `get_or_compute` cache-aside wrapper

pub mod backend;

use backend::{CacheBackend, DiskBackend, MemoryBackend};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default time-to-live for cached values
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Default capacity of the in-memory backend
const DEFAULT_MEMORY_CAPACITY: usize = 1000;

/// Hit/miss counters scoped to one cache instance
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    /// Fraction of gets served from cache, 0.0 when no gets were made
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Cache manager over a pluggable backend
///
/// Values are stored as JSON so both backends share one representation.
/// Every `get` counts exactly once as a hit or a miss, including the gets
/// issued inside `get_or_compute`.
pub struct CacheManager {
    backend: Box<dyn CacheBackend>,
    default_ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheManager {
    /// In-memory cache with the default capacity and TTL
    pub fn in_memory() -> Self {
        Self::with_backend(
            Box::new(MemoryBackend::new(DEFAULT_MEMORY_CAPACITY)),
            DEFAULT_TTL,
        )
    }

    /// In-memory cache with a custom entry capacity
    pub fn in_memory_with_capacity(max_entries: usize) -> Self {
        Self::with_backend(Box::new(MemoryBackend::new(max_entries)), DEFAULT_TTL)
    }

    /// Persistent cache at `path`
    ///
    /// If the database cannot be opened the manager degrades to an
    /// in-memory backend rather than failing the caller.
    pub async fn on_disk(path: &Path, default_ttl: Duration) -> Self {
        match DiskBackend::open(path).await {
            Ok(backend) => {
                info!(path = %path.display(), "disk cache initialized");
                Self::with_backend(Box::new(backend), default_ttl)
            }
            Err(e) => {
                warn!(error = %e, "disk cache unavailable, falling back to in-memory");
                Self::with_backend(
                    Box::new(MemoryBackend::new(DEFAULT_MEMORY_CAPACITY)),
                    default_ttl,
                )
            }
        }
    }

    pub fn with_backend(backend: Box<dyn CacheBackend>, default_ttl: Duration) -> Self {
        Self {
            backend,
            default_ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Look up a value. Expired or undecodable entries count as misses.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let decoded = self
            .backend
            .get(key)
            .await
            .and_then(|raw| serde_json::from_str(&raw).ok());

        match decoded {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key.get(..16).unwrap_or(key), "cache hit");
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key.get(..16).unwrap_or(key), "cache miss");
                None
            }
        }
    }

    /// Store a value, overwriting any prior entry for the key
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> bool {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "failed to serialize cache value");
                return false;
            }
        };
        self.backend
            .set(key, raw, ttl.unwrap_or(self.default_ttl))
            .await
    }

    /// Drop a key immediately
    pub async fn invalidate(&self, key: &str) -> bool {
        self.backend.remove(key).await
    }

    /// Drop every entry
    pub async fn clear(&self) -> bool {
        self.backend.clear().await
    }

    /// Snapshot of the hit/miss counters
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Cache-aside wrapper: return the cached value, or compute, store
    /// and return it
    ///
    /// Concurrent callers for the same key may compute more than once;
    /// last write wins and the stored entry is never torn.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        compute: F,
    ) -> crate::Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = crate::Result<T>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }
        let value = compute().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }
}

/// Build a deterministic cache key from a prefix and its arguments
pub fn make_key(prefix: &str, parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prefix.as_bytes());
    for part in parts {
        hasher.update(b"|");
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
