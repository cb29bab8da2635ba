//! In-process capability backends
//!
//! Useful for a single-process deployment and for tests; they give the same
//! semantics as the SQLite backends without a shared file.

use super::{holder_id, ByteCache, DistributedLock};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// In-memory byte cache with per-entry expiry
///
/// An expiry of `None` means the entry never lapses.
#[derive(Debug, Default)]
pub struct MemoryByteCache {
    entries: Mutex<HashMap<String, (Vec<u8>, Option<Instant>)>>,
}

fn is_live(expires_at: Option<Instant>, now: Instant) -> bool {
    expires_at.map_or(true, |at| at > now)
}

impl MemoryByteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unexpired entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|(_, expires_at)| is_live(*expires_at, now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn live(&self, key: &str) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some((value, expires_at)) if is_live(*expires_at, Instant::now()) => {
                Some(value.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl ByteCache for MemoryByteCache {
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live(key).is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.live(key))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), (value.to_vec(), Instant::now().checked_add(ttl)));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

/// An active lease on a named lock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseInfo {
    /// Lock name
    pub name: String,

    /// Lease holder identity
    pub holder: String,

    /// When the lease was taken
    pub acquired_at: DateTime<Utc>,

    /// When the lease lapses on its own
    pub expires_at: DateTime<Utc>,
}

impl LeaseInfo {
    /// Check if this lease has expired
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// In-process lease-based lock table
#[derive(Debug)]
pub struct LocalLock {
    holder: String,
    lease: Duration,
    leases: Mutex<HashMap<String, LeaseInfo>>,
}

impl LocalLock {
    /// Create a lock table whose leases last `lease`
    pub fn new(lease: Duration) -> Self {
        Self {
            holder: holder_id(),
            lease,
            leases: Mutex::new(HashMap::new()),
        }
    }

    /// Currently held, unexpired leases
    pub fn active_leases(&self) -> Vec<LeaseInfo> {
        self.leases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|info| !info.is_expired())
            .cloned()
            .collect()
    }
}

impl Default for LocalLock {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[async_trait]
impl DistributedLock for LocalLock {
    async fn try_acquire(&self, name: &str) -> Result<bool> {
        let mut leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = leases.get(name) {
            if !existing.is_expired() {
                return Ok(false);
            }
            tracing::warn!(
                lock = name,
                holder = %existing.holder,
                "Taking over expired lease"
            );
        }

        let now = Utc::now();
        let lease = chrono::Duration::from_std(self.lease).unwrap_or(chrono::Duration::MAX);
        leases.insert(
            name.to_string(),
            LeaseInfo {
                name: name.to_string(),
                holder: self.holder.clone(),
                acquired_at: now,
                expires_at: now.checked_add_signed(lease).unwrap_or(DateTime::<Utc>::MAX_UTC),
            },
        );
        Ok(true)
    }

    async fn release(&self, name: &str) -> Result<()> {
        let mut leases = self.leases.lock().unwrap_or_else(PoisonError::into_inner);
        if leases.get(name).is_some_and(|info| info.holder == self.holder) {
            leases.remove(name);
        }
        Ok(())
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(5)
    }
}
