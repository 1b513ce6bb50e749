//! Cache storage backends
//!
//! Two backends honor the same contract: an in-memory map scoped to the
//! process, and a SQLite-backed store that survives restarts. A backend
//! never surfaces its own failures to callers; a broken backend degrades
//! to "always miss".

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::warn;

/// Storage contract shared by all backends
///
/// `get` must never return an expired value. Errors inside a backend are
/// reported as a miss (`None`) or a no-op (`false`), never as an `Err`.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> bool;
    async fn remove(&self, key: &str) -> bool;
    async fn clear(&self) -> bool;
}

struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

/// In-memory backend, lost on process exit
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, MemoryEntry>>,
    max_entries: usize,
}

impl MemoryBackend {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Option<String> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Some(entry.value.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: evict lazily under the write lock.
        self.entries.write().await.remove(key);
        None
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> bool {
        let mut entries = self.entries.write().await;

        if entries.len() >= self.max_entries && !entries.contains_key(key) {
            // At capacity: drop the entry closest to expiry.
            let victim = entries
                .iter()
                .min_by_key(|(_, entry)| entry.expires_at)
                .map(|(k, _)| k.clone());
            if let Some(victim) = victim {
                entries.remove(&victim);
            }
        }

        entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        true
    }

    async fn remove(&self, key: &str) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    async fn clear(&self) -> bool {
        self.entries.write().await.clear();
        true
    }
}

/// SQLite-backed persistent backend
///
/// Entries are `(key, value, stored_at, ttl_secs)` rows; expiry is checked
/// on read and expired rows are deleted lazily.
pub struct DiskBackend {
    pool: SqlitePool,
}

impl DiskBackend {
    /// Open (or create) the cache database at `path`
    pub async fn open(path: &Path) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS cache_entries (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                stored_at INTEGER NOT NULL,
                ttl_secs INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl CacheBackend for DiskBackend {
    async fn get(&self, key: &str) -> Option<String> {
        let row = match sqlx::query(
            "SELECT value, stored_at, ttl_secs FROM cache_entries WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        {
            Ok(row) => row?,
            Err(e) => {
                warn!(error = %e, "disk cache read failed, treating as miss");
                return None;
            }
        };

        let value: String = row.get(0);
        let stored_at: i64 = row.get(1);
        let ttl_secs: i64 = row.get(2);

        if Utc::now().timestamp() - stored_at > ttl_secs {
            let _ = sqlx::query("DELETE FROM cache_entries WHERE key = ?")
                .bind(key)
                .execute(&self.pool)
                .await;
            return None;
        }

        Some(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> bool {
        let result = sqlx::query(
            "INSERT INTO cache_entries (key, value, stored_at, ttl_secs)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                stored_at = excluded.stored_at,
                ttl_secs = excluded.ttl_secs",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().timestamp())
        .bind(ttl.as_secs() as i64)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "disk cache write failed");
                false
            }
        }
    }

    async fn remove(&self, key: &str) -> bool {
        match sqlx::query("DELETE FROM cache_entries WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
        {
            Ok(done) => done.rows_affected() > 0,
            Err(e) => {
                warn!(error = %e, "disk cache delete failed");
                false
            }
        }
    }

    async fn clear(&self) -> bool {
        match sqlx::query("DELETE FROM cache_entries")
            .execute(&self.pool)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "disk cache clear failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_set_then_get() {
        let backend = MemoryBackend::new(10);
        backend
            .set("k", "v".to_string(), Duration::from_secs(60))
            .await;
        assert_eq!(backend.get("k").await, Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_memory_overwrite_replaces_value() {
        let backend = MemoryBackend::new(10);
        backend
            .set("k", "old".to_string(), Duration::from_secs(60))
            .await;
        backend
            .set("k", "new".to_string(), Duration::from_secs(60))
            .await;
        assert_eq!(backend.get("k").await, Some("new".to_string()));
    }

    #[tokio::test]
    async fn test_memory_expired_entry_is_absent() {
        let backend = MemoryBackend::new(10);
        backend
            .set("k", "v".to_string(), Duration::from_millis(20))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(backend.get("k").await, None);
    }

    #[tokio::test]
    async fn test_memory_eviction_drops_entry_closest_to_expiry() {
        let backend = MemoryBackend::new(2);
        backend
            .set("short", "a".to_string(), Duration::from_secs(1))
            .await;
        backend
            .set("long", "b".to_string(), Duration::from_secs(600))
            .await;
        backend
            .set("third", "c".to_string(), Duration::from_secs(600))
            .await;

        assert_eq!(backend.get("short").await, None);
        assert_eq!(backend.get("long").await, Some("b".to_string()));
        assert_eq!(backend.get("third").await, Some("c".to_string()));
    }

    #[tokio::test]
    async fn test_disk_set_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskBackend::open(&dir.path().join("cache.db")).await.unwrap();

        backend
            .set("k", "v".to_string(), Duration::from_secs(60))
            .await;
        assert_eq!(backend.get("k").await, Some("v".to_string()));
        assert!(backend.remove("k").await);
        assert_eq!(backend.get("k").await, None);
    }

    #[tokio::test]
    async fn test_disk_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");

        {
            let backend = DiskBackend::open(&path).await.unwrap();
            backend
                .set("persist", "yes".to_string(), Duration::from_secs(60))
                .await;
        }

        let reopened = DiskBackend::open(&path).await.unwrap();
        assert_eq!(reopened.get("persist").await, Some("yes".to_string()));
    }

    #[tokio::test]
    async fn test_disk_expired_row_is_absent_and_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let backend = DiskBackend::open(&dir.path().join("cache.db")).await.unwrap();

        backend
            .set("old", "v".to_string(), Duration::from_secs(30))
            .await;

        // Age the row past its TTL instead of sleeping.
        sqlx::query("UPDATE cache_entries SET stored_at = stored_at - 60 WHERE key = ?")
            .bind("old")
            .execute(&backend.pool)
            .await
            .unwrap();

        assert_eq!(backend.get("old").await, None);

        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries")
            .fetch_one(&backend.pool)
            .await
            .unwrap();
        assert_eq!(remaining, 0);
    }
}
