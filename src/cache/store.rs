//! Object store backends

use super::ObjectStore;
use crate::retry::{with_retry, RetryConfig};
use crate::{Result, TaarLiteError};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

/// Public-read bucket endpoint reachable over plain HTTP GETs
pub struct HttpObjectStore {
    client: Client,
    endpoint: String,
    retry: RetryConfig,
}

impl HttpObjectStore {
    /// Create a store for `endpoint` (e.g. `https://s3-us-west-2.amazonaws.com`)
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            retry: RetryConfig::for_object_fetch(),
        })
    }

    /// Override the retry profile
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, bucket, key)
    }

    async fn fetch_once(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let url = self.object_url(bucket, key);
        let response = self.client.get(&url).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(TaarLiteError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            }),
            _ => {
                let response = response.error_for_status()?;
                Ok(response.bytes().await?.to_vec())
            }
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        debug!(bucket, key, "Fetching object over HTTP");
        with_retry(&self.retry, "object_fetch", move || async move {
            self.fetch_once(bucket, key).await
        })
        .await
    }
}

/// Objects laid out on disk as `{root}/{bucket}/{key}`
#[derive(Debug, Clone)]
pub struct FileObjectStore {
    root: PathBuf,
}

impl FileObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn object_path(&self, bucket: &str, key: &str) -> PathBuf {
        self.root.join(bucket).join(key)
    }
}

#[async_trait]
impl ObjectStore for FileObjectStore {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(bucket, key);
        debug!(bucket, key, path = %path.display(), "Reading object from disk");

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(TaarLiteError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process object store that counts fetches
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    fetches: AtomicUsize,
    latency: Option<Duration>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every fetch by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Store or replace an object
    pub fn put(&self, bucket: &str, key: &str, bytes: impl Into<Vec<u8>>) {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((bucket.to_string(), key.to_string()), bytes.into());
    }

    pub fn remove(&self, bucket: &str, key: &str) {
        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(bucket.to_string(), key.to_string()));
    }

    /// Number of fetches attempted so far, failed ones included
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        self.objects
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| TaarLiteError::ObjectNotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode as AxumStatus;
    use axum::{routing::get, Router};
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn spawn_bucket(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_memory_store_counts_fetches() {
        let store = MemoryObjectStore::new();
        store.put("b", "k", b"{}".to_vec());

        assert_eq!(store.fetch("b", "k").await.unwrap(), b"{}".to_vec());
        assert!(matches!(
            store.fetch("b", "missing").await,
            Err(TaarLiteError::ObjectNotFound { .. })
        ));
        assert_eq!(store.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_file_store_reads_bucket_layout() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("telemetry-parquet/taar/lite");
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(path.join("guid_install_ranking.json"), b"{\"a\": 1}").unwrap();

        let store = FileObjectStore::new(dir.path());
        let bytes = store
            .fetch("telemetry-parquet", "taar/lite/guid_install_ranking.json")
            .await
            .unwrap();
        assert_eq!(bytes, b"{\"a\": 1}".to_vec());

        let missing = store.fetch("telemetry-parquet", "taar/lite/nope.json").await;
        assert!(matches!(missing, Err(TaarLiteError::ObjectNotFound { .. })));
    }

    #[tokio::test]
    async fn test_http_store_fetches_object() {
        let router = Router::new().route(
            "/telemetry-parquet/taar/lite/guid_coinstallation.json",
            get(|| async { r#"{"a": {"b": 2}}"# }),
        );
        let endpoint = spawn_bucket(router).await;

        let store = HttpObjectStore::new(format!("{}/", endpoint), Duration::from_secs(5)).unwrap();
        assert_eq!(
            store.object_url("b", "k"),
            format!("{}/b/k", endpoint)
        );

        let bytes = store
            .fetch("telemetry-parquet", "taar/lite/guid_coinstallation.json")
            .await
            .unwrap();
        assert_eq!(bytes, br#"{"a": {"b": 2}}"#.to_vec());
    }

    #[tokio::test]
    async fn test_http_store_missing_object() {
        let endpoint = spawn_bucket(Router::new()).await;
        let store = HttpObjectStore::new(endpoint, Duration::from_secs(5)).unwrap();

        let result = store.fetch("b", "k").await;
        assert!(matches!(result, Err(TaarLiteError::ObjectNotFound { .. })));
    }

    #[tokio::test]
    async fn test_http_store_retries_server_errors() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let router = Router::new().route(
            "/b/k",
            get(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(AxumStatus::SERVICE_UNAVAILABLE)
                    } else {
                        Ok("{}")
                    }
                }
            }),
        );
        let endpoint = spawn_bucket(router).await;

        let store = HttpObjectStore::new(endpoint, Duration::from_secs(5))
            .unwrap()
            .with_retry_config(RetryConfig {
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(2),
                ..RetryConfig::for_object_fetch()
            });

        assert_eq!(store.fetch("b", "k").await.unwrap(), b"{}".to_vec());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
