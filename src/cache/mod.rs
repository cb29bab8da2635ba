//! Refresh-aware loading of remote JSON resources
//!
//! [`GraphCache`] serves the most recent successfully decoded copy of one
//! `(bucket, key)` object with bounded staleness. It depends on three
//! capabilities, each a trait so the backing service can be swapped:
//!
//! - [`ObjectStore`]: where the JSON documents live (HTTP, filesystem, memory)
//! - [`ByteCache`]: raw bytes shared by every process on the host (SQLite, memory)
//! - [`DistributedLock`]: a named, lease-based mutex across processes (SQLite, memory)

mod graph_cache;
mod memory;
mod sqlite;
mod store;

pub use graph_cache::{CacheEntry, GraphCache, GraphCacheConfig};
pub use memory::{LeaseInfo, LocalLock, MemoryByteCache};
pub use sqlite::{SharedCacheConfig, SqliteByteCache, SqliteLock};
pub use store::{FileObjectStore, HttpObjectStore, MemoryObjectStore};

use crate::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Byte-fetching access to the remote object store
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Download the object stored under `bucket`/`key`
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
}

/// Byte cache reachable by every process serving recommendations
#[async_trait]
pub trait ByteCache: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value`, readable until `ttl` has elapsed
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Named mutual exclusion across processes
///
/// Implementations hand out leases that expire on their own, so a holder
/// that dies mid-fetch cannot wedge every other process.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Take the lock if nobody holds an unexpired lease on it
    async fn try_acquire(&self, name: &str) -> Result<bool>;

    /// Drop our lease on `name`; a lease held by someone else is left alone
    async fn release(&self, name: &str) -> Result<()>;

    /// Delay between acquisition attempts
    fn poll_interval(&self) -> Duration {
        Duration::from_millis(50)
    }

    /// Wait up to `timeout` for the lock
    ///
    /// Returns `false` when the timeout elapses first.
    async fn acquire(&self, name: &str, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.try_acquire(name).await? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(self.poll_interval().min(deadline - now)).await;
        }
    }
}

/// Key of a resource in the shared byte cache
pub fn shared_key(bucket: &str, key: &str) -> String {
    format!("{}|{}", bucket, key)
}

/// Name of the fetch lock guarding a resource
pub fn lock_name(bucket: &str, key: &str) -> String {
    format!("lock|{}", shared_key(bucket, key))
}

/// Identity written into lock leases: `hostname:pid:n`
pub(crate) fn holder_id() -> String {
    static NEXT: AtomicU64 = AtomicU64::new(0);

    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    format!(
        "{}:{}:{}",
        host,
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    )
}
