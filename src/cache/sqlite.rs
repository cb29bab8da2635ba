//! SQLite-backed shared byte cache and fetch lock
//!
//! Every process on the host opens the same database file, which gives them
//! a common byte cache and a common lock table without another service.

use super::{holder_id, ByteCache, DistributedLock};
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;

/// Shared SQLite file configuration
#[derive(Debug, Clone)]
pub struct SharedCacheConfig {
    /// Path to SQLite database file
    pub path: PathBuf,

    /// Enable WAL mode for better concurrency
    pub wal_mode: bool,

    /// How long a writer waits on a busy database
    pub busy_timeout: Duration,
}

impl Default for SharedCacheConfig {
    fn default() -> Self {
        let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(".config");
        path.push("taarlite");
        path.push("cache.db");

        Self {
            path,
            wal_mode: true,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl SharedCacheConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

/// Open a connection and make sure both tables exist
fn open(config: &SharedCacheConfig) -> Result<Connection> {
    if let Some(parent) = config.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    tracing::debug!(path = %config.path.display(), "Opening shared cache database");

    let conn = Connection::open(&config.path)?;
    conn.busy_timeout(config.busy_timeout)?;
    if config.wal_mode {
        conn.pragma_update(None, "journal_mode", "WAL")?;
    }

    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS byte_cache (
            key TEXT PRIMARY KEY,
            value BLOB NOT NULL,
            expires_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS locks (
            name TEXT PRIMARY KEY,
            holder TEXT NOT NULL,
            acquired_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_byte_cache_expires ON byte_cache(expires_at);
        "#,
    )?;

    Ok(conn)
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn expiry_millis(ttl: Duration) -> i64 {
    now_millis().saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

/// Byte cache stored in the shared SQLite file
pub struct SqliteByteCache {
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl SqliteByteCache {
    /// Open or create the cache database
    pub fn open(config: &SharedCacheConfig) -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(open(config)?),
            path: config.path.clone(),
        })
    }

    /// Get the database path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove expired rows, returning how many were purged
    pub async fn purge_expired(&self) -> Result<usize> {
        let conn = self.conn.lock().await;
        let purged = conn.execute(
            "DELETE FROM byte_cache WHERE expires_at <= ?1",
            params![now_millis()],
        )?;
        Ok(purged)
    }
}

#[async_trait]
impl ByteCache for SqliteByteCache {
    async fn exists(&self, key: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM byte_cache WHERE key = ?1 AND expires_at > ?2",
                params![key, now_millis()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock().await;
        let value = conn
            .query_row(
                "SELECT value FROM byte_cache WHERE key = ?1 AND expires_at > ?2",
                params![key, now_millis()],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let conn = self.conn.lock().await;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM byte_cache WHERE expires_at <= ?1",
            params![now_millis()],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO byte_cache (key, value, expires_at) VALUES (?1, ?2, ?3)",
            params![key, value, expiry_millis(ttl)],
        )?;
        tx.commit()?;

        tracing::debug!(key, bytes = value.len(), "Stored bytes in shared cache");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM byte_cache WHERE key = ?1", params![key])?;
        Ok(())
    }
}

/// Lease-based lock table in the shared SQLite file
pub struct SqliteLock {
    conn: Mutex<Connection>,
    holder: String,
    lease: Duration,
    poll_interval: Duration,
}

impl SqliteLock {
    /// Open the lock table; leases lapse after `lease`
    pub fn open(config: &SharedCacheConfig, lease: Duration) -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(open(config)?),
            holder: holder_id(),
            lease,
            poll_interval: Duration::from_millis(100),
        })
    }

    /// Identity written into our leases
    pub fn holder(&self) -> &str {
        &self.holder
    }

    /// Current holder of `name`, if the lease is live
    pub async fn holder_of(&self, name: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        let holder = conn
            .query_row(
                "SELECT holder FROM locks WHERE name = ?1 AND expires_at > ?2",
                params![name, now_millis()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(holder)
    }
}

#[async_trait]
impl DistributedLock for SqliteLock {
    async fn try_acquire(&self, name: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        let now = now_millis();

        let tx = conn.unchecked_transaction()?;
        let expired = tx.execute(
            "DELETE FROM locks WHERE name = ?1 AND expires_at <= ?2",
            params![name, now],
        )?;
        if expired > 0 {
            tracing::warn!(lock = name, "Taking over expired lease");
        }
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO locks (name, holder, acquired_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
            params![name, &self.holder, now, expiry_millis(self.lease)],
        )?;
        tx.commit()?;

        Ok(inserted == 1)
    }

    async fn release(&self, name: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "DELETE FROM locks WHERE name = ?1 AND holder = ?2",
            params![name, &self.holder],
        )?;
        Ok(())
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> SharedCacheConfig {
        SharedCacheConfig::at(dir.path().join("cache.db"))
    }

    #[test]
    fn test_cache_creation() {
        let dir = TempDir::new().unwrap();
        let cache = SqliteByteCache::open(&config(&dir)).unwrap();
        assert!(cache.path().exists());
    }

    #[test]
    fn test_default_path() {
        let config = SharedCacheConfig::default();
        assert!(config.path.ends_with("taarlite/cache.db"));
    }

    #[tokio::test]
    async fn test_cache_store_and_load() {
        let dir = TempDir::new().unwrap();
        let cache = SqliteByteCache::open(&config(&dir)).unwrap();

        cache
            .set("b|k", br#"{"a": {"b": 1}}"#, Duration::from_secs(3600))
            .await
            .unwrap();
        assert!(cache.exists("b|k").await.unwrap());
        assert_eq!(
            cache.get("b|k").await.unwrap(),
            Some(br#"{"a": {"b": 1}}"#.to_vec())
        );
        assert!(!cache.exists("b|other").await.unwrap());
    }

    #[tokio::test]
    async fn test_cache_expiration() {
        let dir = TempDir::new().unwrap();
        let cache = SqliteByteCache::open(&config(&dir)).unwrap();

        cache.set("b|k", b"{}", Duration::from_millis(100)).await.unwrap();
        assert!(cache.exists("b|k").await.unwrap());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!cache.exists("b|k").await.unwrap());
        assert_eq!(cache.get("b|k").await.unwrap(), None);
        assert_eq!(cache.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cache_visible_across_connections() {
        let dir = TempDir::new().unwrap();
        let writer = SqliteByteCache::open(&config(&dir)).unwrap();
        let reader = SqliteByteCache::open(&config(&dir)).unwrap();

        writer.set("b|k", b"payload", Duration::from_secs(60)).await.unwrap();
        assert_eq!(reader.get("b|k").await.unwrap(), Some(b"payload".to_vec()));

        reader.delete("b|k").await.unwrap();
        assert!(!writer.exists("b|k").await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_excludes_other_holders() {
        let dir = TempDir::new().unwrap();
        let first = SqliteLock::open(&config(&dir), Duration::from_secs(60)).unwrap();
        let second = SqliteLock::open(&config(&dir), Duration::from_secs(60)).unwrap();

        assert!(first.try_acquire("lock|b|k").await.unwrap());
        assert!(!second.try_acquire("lock|b|k").await.unwrap());
        assert_eq!(
            second.holder_of("lock|b|k").await.unwrap().as_deref(),
            Some(first.holder())
        );

        // releasing someone else's lease is a no-op
        second.release("lock|b|k").await.unwrap();
        assert!(!second.try_acquire("lock|b|k").await.unwrap());

        first.release("lock|b|k").await.unwrap();
        assert!(second.try_acquire("lock|b|k").await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_acquire_timeout() {
        let dir = TempDir::new().unwrap();
        let first = SqliteLock::open(&config(&dir), Duration::from_secs(60)).unwrap();
        let second = SqliteLock::open(&config(&dir), Duration::from_secs(60)).unwrap();

        assert!(first.acquire("lock|b|k", Duration::from_secs(1)).await.unwrap());
        assert!(!second
            .acquire("lock|b|k", Duration::from_millis(150))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_expired_lease_is_taken_over() {
        let dir = TempDir::new().unwrap();
        let crashed = SqliteLock::open(&config(&dir), Duration::from_millis(50)).unwrap();
        let survivor = SqliteLock::open(&config(&dir), Duration::from_secs(60)).unwrap();

        assert!(crashed.try_acquire("lock|b|k").await.unwrap());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(survivor.try_acquire("lock|b|k").await.unwrap());
    }
}
