//! Refresh-aware cache for one remote JSON resource

use super::{lock_name, shared_key, ByteCache, DistributedLock, ObjectStore};
use crate::{Result, TaarLiteError};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Default time-to-live of a cached resource (4 hours)
pub const DEFAULT_TTL: Duration = Duration::from_secs(4 * 60 * 60);

/// Default wait for the cross-process fetch lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Default pause after a failed refresh before trying again
pub const DEFAULT_FAILURE_BACKOFF: Duration = Duration::from_secs(60);

/// Which resource to cache and how long to trust it
#[derive(Debug, Clone)]
pub struct GraphCacheConfig {
    pub bucket: String,
    pub key: String,
    pub ttl: Duration,
    pub lock_timeout: Duration,
    pub failure_backoff: Duration,
}

impl GraphCacheConfig {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            ttl: DEFAULT_TTL,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            failure_backoff: DEFAULT_FAILURE_BACKOFF,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_failure_backoff(mut self, backoff: Duration) -> Self {
        self.failure_backoff = backoff;
        self
    }
}

/// A decoded resource together with the bytes it was decoded from
///
/// Entries are published whole and never mutated.
#[derive(Debug)]
pub struct CacheEntry<T> {
    bytes: Arc<[u8]>,
    value: Arc<T>,
    fetched_at: Instant,
    loaded_at: DateTime<Utc>,
}

impl<T> CacheEntry<T> {
    fn new(bytes: Arc<[u8]>, value: Arc<T>) -> Self {
        Self {
            bytes,
            value,
            fetched_at: Instant::now(),
            loaded_at: Utc::now(),
        }
    }

    /// Same payload, fresh timestamp
    fn renewed(&self) -> Self {
        Self::new(self.bytes.clone(), self.value.clone())
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn value(&self) -> &Arc<T> {
        &self.value
    }

    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    /// Wall-clock time the payload was last confirmed current
    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

enum Refresh<T> {
    /// Bytes unchanged, only the timestamp moved
    Renewed(Arc<CacheEntry<T>>),
    /// A different payload is now current
    Replaced(Arc<CacheEntry<T>>),
}

#[derive(Debug, Default)]
struct RefreshState {
    last_failure: Option<Instant>,
}

/// Serves the most recent good copy of `(bucket, key)` with bounded staleness
///
/// At most one caller per process runs a refresh at a time, and the
/// distributed lock keeps it to one remote fetch across processes. A refresh
/// that fails for any reason leaves the published entry untouched.
pub struct GraphCache<T> {
    config: GraphCacheConfig,
    shared_key: String,
    lock_name: String,
    store: Arc<dyn ObjectStore>,
    shared: Arc<dyn ByteCache>,
    lock: Arc<dyn DistributedLock>,
    published: RwLock<Option<Arc<CacheEntry<T>>>>,
    refresh: Mutex<RefreshState>,
}

impl<T> GraphCache<T>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(
        config: GraphCacheConfig,
        store: Arc<dyn ObjectStore>,
        shared: Arc<dyn ByteCache>,
        lock: Arc<dyn DistributedLock>,
    ) -> Self {
        Self {
            shared_key: shared_key(&config.bucket, &config.key),
            lock_name: lock_name(&config.bucket, &config.key),
            config,
            store,
            shared,
            lock,
            published: RwLock::new(None),
            refresh: Mutex::new(RefreshState::default()),
        }
    }

    pub fn config(&self) -> &GraphCacheConfig {
        &self.config
    }

    /// Current value without attempting a refresh
    pub fn current(&self) -> Option<Arc<T>> {
        self.entry().map(|entry| entry.value.clone())
    }

    /// Current published entry
    pub fn entry(&self) -> Option<Arc<CacheEntry<T>>> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn publish(&self, entry: Option<Arc<CacheEntry<T>>>) {
        *self.published.write().unwrap_or_else(PoisonError::into_inner) = entry;
    }

    /// Return the cached value, refreshing it first when stale
    ///
    /// The flag is `true` when this call performed or waited on a refresh
    /// that replaced the value it first saw. Callers served a stale copy
    /// while a refresh is in flight get `false`. Failures are logged and
    /// absorbed; the value is `None` only while nothing has ever loaded.
    pub async fn get(&self) -> (Option<Arc<T>>, bool) {
        let seen = self.entry();
        if let Some(entry) = &seen {
            if self.is_fresh(entry).await {
                debug!(bucket = %self.config.bucket, key = %self.config.key, "Cache hit");
                return (Some(entry.value.clone()), false);
            }
        }

        let mut state = match self.refresh.try_lock() {
            Ok(state) => state,
            Err(_) => match &seen {
                Some(entry) => {
                    debug!(
                        bucket = %self.config.bucket,
                        key = %self.config.key,
                        "Refresh in flight, serving stale copy"
                    );
                    return (Some(entry.value.clone()), false);
                }
                None => self.refresh.lock().await,
            },
        };

        // someone else may have refreshed while we were waiting
        let current = self.entry();
        if !same_entry(&seen, &current) {
            let replaced = !same_value(&seen, &current);
            return (current.map(|entry| entry.value.clone()), replaced);
        }

        if let Some(failed_at) = state.last_failure {
            if failed_at.elapsed() < self.config.failure_backoff {
                debug!(
                    bucket = %self.config.bucket,
                    key = %self.config.key,
                    "Backing off after failed refresh"
                );
                return (current.map(|entry| entry.value.clone()), false);
            }
        }

        match self.refresh_entry(current.as_deref()).await {
            Ok(Refresh::Renewed(entry)) => {
                state.last_failure = None;
                let value = entry.value.clone();
                self.publish(Some(entry));
                debug!(bucket = %self.config.bucket, key = %self.config.key, "Payload unchanged");
                (Some(value), false)
            }
            Ok(Refresh::Replaced(entry)) => {
                state.last_failure = None;
                info!(
                    bucket = %self.config.bucket,
                    key = %self.config.key,
                    bytes = entry.bytes.len(),
                    "Loaded JSON"
                );
                let value = entry.value.clone();
                self.publish(Some(entry));
                (Some(value), true)
            }
            Err(e) => {
                state.last_failure = Some(Instant::now());
                error!(
                    bucket = %self.config.bucket,
                    key = %self.config.key,
                    error = %e,
                    "Failed to refresh, serving last good copy"
                );
                (current.map(|entry| entry.value.clone()), false)
            }
        }
    }

    /// Drop the local entry and the shared bytes so the next `get` starts cold
    pub async fn force_expiry(&self) -> Result<()> {
        let mut state = self.refresh.lock().await;
        state.last_failure = None;
        self.publish(None);
        self.shared.delete(&self.shared_key).await?;

        info!(bucket = %self.config.bucket, key = %self.config.key, "Cache force-expired");
        Ok(())
    }

    async fn is_fresh(&self, entry: &CacheEntry<T>) -> bool {
        if entry.age() >= self.config.ttl {
            return false;
        }
        match self.shared.exists(&self.shared_key).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(key = %self.shared_key, error = %e, "Shared cache unavailable");
                true
            }
        }
    }

    async fn refresh_entry(&self, current: Option<&CacheEntry<T>>) -> Result<Refresh<T>> {
        if let Some(refresh) = self.from_shared(current).await {
            return Ok(refresh);
        }

        if !self
            .lock
            .acquire(&self.lock_name, self.config.lock_timeout)
            .await?
        {
            return Err(TaarLiteError::LockTimeout {
                name: self.lock_name.clone(),
                waited: self.config.lock_timeout,
            });
        }
        let held = HeldLock::new(self.lock.clone(), &self.lock_name);

        let result = self.fetch_locked(current).await;

        held.release().await;
        result
    }

    async fn fetch_locked(&self, current: Option<&CacheEntry<T>>) -> Result<Refresh<T>> {
        // the previous holder may have just filled the shared cache
        if let Some(refresh) = self.from_shared(current).await {
            return Ok(refresh);
        }

        let bytes: Arc<[u8]> = self
            .store
            .fetch(&self.config.bucket, &self.config.key)
            .await?
            .into();

        if let Some(entry) = current.filter(|entry| entry.bytes == bytes) {
            self.store_shared(&bytes).await;
            return Ok(Refresh::Renewed(Arc::new(entry.renewed())));
        }

        let entry = self.decode(bytes).await?;
        self.store_shared(&entry.bytes).await;
        Ok(Refresh::Replaced(Arc::new(entry)))
    }

    /// Pick up bytes another process already fetched
    async fn from_shared(&self, current: Option<&CacheEntry<T>>) -> Option<Refresh<T>> {
        let bytes: Arc<[u8]> = match self.shared.get(&self.shared_key).await {
            Ok(Some(bytes)) => bytes.into(),
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %self.shared_key, error = %e, "Shared cache read failed");
                return None;
            }
        };

        if let Some(entry) = current.filter(|entry| entry.bytes == bytes) {
            return Some(Refresh::Renewed(Arc::new(entry.renewed())));
        }

        match self.decode(bytes).await {
            Ok(entry) => Some(Refresh::Replaced(Arc::new(entry))),
            Err(e) => {
                error!(key = %self.shared_key, error = %e, "Discarding undecodable shared bytes");
                if let Err(e) = self.shared.delete(&self.shared_key).await {
                    warn!(key = %self.shared_key, error = %e, "Failed to delete shared bytes");
                }
                None
            }
        }
    }

    async fn store_shared(&self, bytes: &[u8]) {
        if let Err(e) = self.shared.set(&self.shared_key, bytes, self.config.ttl).await {
            warn!(key = %self.shared_key, error = %e, "Failed to write shared cache");
        }
    }

    async fn decode(&self, bytes: Arc<[u8]>) -> Result<CacheEntry<T>> {
        let raw = bytes.clone();
        let value = tokio::task::spawn_blocking(move || serde_json::from_slice::<T>(&raw))
            .await
            .map_err(|e| TaarLiteError::Other(format!("decode task failed: {}", e)))??;
        Ok(CacheEntry::new(bytes, Arc::new(value)))
    }
}

fn same_entry<T>(a: &Option<Arc<CacheEntry<T>>>, b: &Option<Arc<CacheEntry<T>>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

fn same_value<T>(a: &Option<Arc<CacheEntry<T>>>, b: &Option<Arc<CacheEntry<T>>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(&a.value, &b.value),
        (None, None) => true,
        _ => false,
    }
}

/// A fetch lock this process holds
///
/// If the refresh holding it is dropped mid-fetch (a caller that went away),
/// the lease is handed to a background task for release instead of being
/// left to lapse.
struct HeldLock {
    lock: Arc<dyn DistributedLock>,
    name: String,
    held: bool,
}

impl HeldLock {
    fn new(lock: Arc<dyn DistributedLock>, name: &str) -> Self {
        Self {
            lock,
            name: name.to_string(),
            held: true,
        }
    }

    async fn release(mut self) {
        let result = self.lock.release(&self.name).await;
        self.held = false;
        if let Err(e) = result {
            error!(lock = %self.name, error = %e, "Failed to release lock");
        }
    }
}

impl Drop for HeldLock {
    fn drop(&mut self) {
        if !self.held {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(lock = %self.name, "No runtime to release abandoned lock, lease will lapse");
            return;
        };

        let lock = self.lock.clone();
        let name = std::mem::take(&mut self.name);
        debug!(lock = %name, "Releasing lock of abandoned refresh");
        runtime.spawn(async move {
            if let Err(e) = lock.release(&name).await {
                error!(lock = %name, error = %e, "Failed to release lock");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{LocalLock, MemoryByteCache, MemoryObjectStore};
    use std::collections::BTreeMap;

    type Doc = BTreeMap<String, u64>;

    const BUCKET: &str = "telemetry-parquet";
    const KEY: &str = "taar/lite/guid_install_ranking.json";

    struct Harness {
        store: Arc<MemoryObjectStore>,
        shared: Arc<MemoryByteCache>,
        lock: Arc<LocalLock>,
    }

    impl Harness {
        fn new(latency: Duration) -> Self {
            let store = MemoryObjectStore::new().with_latency(latency);
            store.put(BUCKET, KEY, br#"{"guid-1": 10, "guid-2": 7}"#.to_vec());
            Self {
                store: Arc::new(store),
                shared: Arc::new(MemoryByteCache::new()),
                lock: Arc::new(LocalLock::default()),
            }
        }

        fn cache(&self, config: GraphCacheConfig) -> GraphCache<Doc> {
            GraphCache::new(
                config,
                self.store.clone(),
                self.shared.clone(),
                self.lock.clone(),
            )
        }
    }

    fn config() -> GraphCacheConfig {
        GraphCacheConfig::new(BUCKET, KEY)
    }

    #[tokio::test]
    async fn test_cold_get_fetches_once() {
        let harness = Harness::new(Duration::ZERO);
        let cache = harness.cache(config());
        assert!(cache.current().is_none());

        let (value, refreshed) = cache.get().await;
        assert!(refreshed);
        assert_eq!(value.unwrap().get("guid-1"), Some(&10));
        assert_eq!(harness.store.fetch_count(), 1);
        assert!(harness.shared.exists(&shared_key(BUCKET, KEY)).await.unwrap());

        let (again, refreshed) = cache.get().await;
        assert!(!refreshed);
        assert!(Arc::ptr_eq(&again.unwrap(), &cache.current().unwrap()));
        assert_eq!(harness.store.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_cold_callers_share_one_fetch() {
        let harness = Harness::new(Duration::from_millis(50));
        let cache = Arc::new(harness.cache(config()));

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get().await })
            })
            .collect();
        let results: Vec<_> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(harness.store.fetch_count(), 1);
        // every cold caller joined the one fetch
        assert!(results.iter().all(|(_, refreshed)| *refreshed));

        let first = results[0].0.clone().unwrap();
        for (value, _) in &results {
            assert!(Arc::ptr_eq(value.as_ref().unwrap(), &first));
        }
    }

    #[tokio::test]
    async fn test_processes_share_fetched_bytes() {
        let harness = Harness::new(Duration::from_millis(50));
        let a = harness.cache(config());
        let b = harness.cache(config());

        let ((va, ra), (vb, rb)) = tokio::join!(a.get(), b.get());

        assert_eq!(harness.store.fetch_count(), 1);
        // each process saw its own local value change
        assert!(ra && rb);
        assert_eq!(va.unwrap(), vb.unwrap());
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_previous_value() {
        let harness = Harness::new(Duration::ZERO);
        let cache = harness.cache(
            config()
                .with_ttl(Duration::from_millis(50))
                .with_failure_backoff(Duration::ZERO),
        );

        let (first, _) = cache.get().await;
        let first = first.unwrap();

        harness.store.remove(BUCKET, KEY);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (value, refreshed) = cache.get().await;
        assert!(!refreshed);
        assert!(Arc::ptr_eq(&value.unwrap(), &first));
        assert_eq!(harness.store.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_bad_json_never_replaces_good_value() {
        let harness = Harness::new(Duration::ZERO);
        let cache = harness.cache(
            config()
                .with_ttl(Duration::from_millis(50))
                .with_failure_backoff(Duration::ZERO),
        );

        let (first, _) = cache.get().await;
        let first = first.unwrap();

        harness.store.put(BUCKET, KEY, b"{not json".to_vec());
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (value, refreshed) = cache.get().await;
        assert!(!refreshed);
        assert!(Arc::ptr_eq(&value.unwrap(), &first));
        // the bad payload must not reach the shared cache
        assert!(!harness.shared.exists(&shared_key(BUCKET, KEY)).await.unwrap());
    }

    #[tokio::test]
    async fn test_bad_json_on_cold_start() {
        let harness = Harness::new(Duration::ZERO);
        harness.store.put(BUCKET, KEY, b"[1, 2".to_vec());
        let cache = harness.cache(config());

        let (value, refreshed) = cache.get().await;
        assert!(value.is_none());
        assert!(!refreshed);
    }

    #[tokio::test]
    async fn test_lock_timeout_is_soft_failure() {
        let harness = Harness::new(Duration::ZERO);
        assert!(harness
            .lock
            .try_acquire(&lock_name(BUCKET, KEY))
            .await
            .unwrap());

        let cache = harness.cache(
            config()
                .with_lock_timeout(Duration::from_millis(50))
                .with_failure_backoff(Duration::ZERO),
        );

        let (value, refreshed) = cache.get().await;
        assert!(value.is_none());
        assert!(!refreshed);
        assert_eq!(harness.store.fetch_count(), 0);

        harness.lock.release(&lock_name(BUCKET, KEY)).await.unwrap();
        let (value, refreshed) = cache.get().await;
        assert!(value.is_some());
        assert!(refreshed);
    }

    #[tokio::test]
    async fn test_failure_backoff_suppresses_retries() {
        let harness = Harness::new(Duration::ZERO);
        harness.store.remove(BUCKET, KEY);
        let cache = harness.cache(config());

        assert!(cache.get().await.0.is_none());
        assert!(cache.get().await.0.is_none());
        assert_eq!(harness.store.fetch_count(), 1);

        harness
            .store
            .put(BUCKET, KEY, br#"{"guid-1": 1}"#.to_vec());
        cache.force_expiry().await.unwrap();

        let (value, refreshed) = cache.get().await;
        assert!(refreshed);
        assert_eq!(value.unwrap().get("guid-1"), Some(&1));
        assert_eq!(harness.store.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_force_expiry_makes_next_get_cold() {
        let harness = Harness::new(Duration::ZERO);
        let cache = harness.cache(config());

        cache.get().await;
        cache.force_expiry().await.unwrap();
        assert!(cache.current().is_none());
        assert!(!harness.shared.exists(&shared_key(BUCKET, KEY)).await.unwrap());

        let (value, refreshed) = cache.get().await;
        assert!(value.is_some());
        assert!(refreshed);
        assert_eq!(harness.store.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_ttl_expiry_picks_up_new_payload() {
        let harness = Harness::new(Duration::ZERO);
        let cache = harness.cache(config().with_ttl(Duration::from_millis(50)));

        cache.get().await;
        harness
            .store
            .put(BUCKET, KEY, br#"{"guid-1": 11, "guid-2": 7}"#.to_vec());
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (value, refreshed) = cache.get().await;
        assert!(refreshed);
        assert_eq!(value.unwrap().get("guid-1"), Some(&11));
    }

    #[tokio::test]
    async fn test_identical_payload_is_not_a_refresh() {
        let harness = Harness::new(Duration::ZERO);
        let cache = harness.cache(config().with_ttl(Duration::from_millis(50)));

        let (first, _) = cache.get().await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        let (value, refreshed) = cache.get().await;
        assert!(!refreshed);
        assert!(Arc::ptr_eq(&value.unwrap(), &first.unwrap()));
        assert_eq!(harness.store.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_shared_invalidation_reaches_other_process() {
        let harness = Harness::new(Duration::ZERO);
        let a = harness.cache(config());
        let b = harness.cache(config());

        a.get().await;
        let (before, _) = b.get().await;
        assert_eq!(harness.store.fetch_count(), 1);

        harness
            .store
            .put(BUCKET, KEY, br#"{"guid-3": 99}"#.to_vec());
        a.force_expiry().await.unwrap();

        let (after, refreshed) = b.get().await;
        assert!(refreshed);
        assert_ne!(before.unwrap(), after.clone().unwrap());
        assert_eq!(after.unwrap().get("guid-3"), Some(&99));
        assert_eq!(harness.store.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_stale_callers_do_not_see_refresh() {
        let harness = Harness::new(Duration::from_millis(100));
        let cache = Arc::new(harness.cache(config().with_ttl(Duration::from_millis(50))));
        cache.get().await;

        harness
            .store
            .put(BUCKET, KEY, br#"{"guid-1": 12}"#.to_vec());
        tokio::time::sleep(Duration::from_millis(80)).await;

        let refresher = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // a refresh is in flight and a value is published
        let (stale, refreshed) = cache.get().await;
        assert!(!refreshed);
        assert_eq!(stale.unwrap().get("guid-1"), Some(&10));

        let (fresh, refreshed) = refresher.await.unwrap();
        assert!(refreshed);
        assert_eq!(fresh.unwrap().get("guid-1"), Some(&12));
    }

    #[tokio::test]
    async fn test_cancelled_get_releases_lock() {
        let harness = Harness::new(Duration::from_millis(200));
        let cache = harness.cache(config().with_lock_timeout(Duration::from_secs(5)));

        let cancelled = tokio::time::timeout(Duration::from_millis(50), cache.get()).await;
        assert!(cancelled.is_err());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(harness.lock.active_leases().is_empty());

        let started = Instant::now();
        let (value, refreshed) = cache.get().await;
        assert!(value.is_some());
        assert!(refreshed);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(harness.lock.active_leases().is_empty());
    }

    #[tokio::test]
    async fn test_entry_metadata() {
        let harness = Harness::new(Duration::ZERO);
        let cache = harness.cache(config());
        cache.get().await;

        let entry = cache.entry().unwrap();
        assert_eq!(entry.bytes(), &br#"{"guid-1": 10, "guid-2": 7}"#[..]);
        assert!(entry.age() < DEFAULT_TTL);
        assert!(entry.loaded_at() <= Utc::now());
    }
}
