//! Recommendation engine
//!
//! Ties the two graph caches to a [`RecommenderSet`]. Refresh is checked on
//! the read path: every query asks both caches for their value, and when
//! either value differs from the inputs of the last build the whole set is
//! rebuilt off the async threads and swapped in. Requests already holding the
//! old set keep using it.

use crate::cache::{
    ByteCache, DistributedLock, FileObjectStore, GraphCache, GraphCacheConfig, HttpObjectStore,
    LocalLock, MemoryByteCache, ObjectStore, SharedCacheConfig, SqliteByteCache, SqliteLock,
};
use crate::config::{
    validate_config_result, RecommenderConfig, SharedBackend, SourceBackend, TaarLiteConfig,
};
use crate::graph::{RankingTable, WeightedGraph};
use crate::recommender::{Recommendation, RecommenderSet, Variant};
use crate::{Result, TaarLiteError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info};

/// Cache of the raw co-installation graph
pub type CoinstallCache = GraphCache<WeightedGraph>;

/// Cache of the install ranking table
pub type RankingCache = GraphCache<RankingTable>;

/// The three capabilities a cache needs, shared by both caches
#[derive(Clone)]
pub struct Capabilities {
    pub store: Arc<dyn ObjectStore>,
    pub shared: Arc<dyn ByteCache>,
    pub lock: Arc<dyn DistributedLock>,
}

impl Capabilities {
    /// Open the backends named in `config`
    pub fn from_config(config: &TaarLiteConfig) -> Result<Self> {
        let store: Arc<dyn ObjectStore> = match config.source.backend {
            SourceBackend::Http => Arc::new(HttpObjectStore::new(
                config.source.endpoint.clone(),
                config.source.request_timeout(),
            )?),
            SourceBackend::File => {
                let root = config.source.root.clone().ok_or_else(|| {
                    TaarLiteError::Config("source.root is required for the file backend".into())
                })?;
                Arc::new(FileObjectStore::new(root))
            }
        };

        let (shared, lock): (Arc<dyn ByteCache>, Arc<dyn DistributedLock>) =
            match config.cache.shared {
                SharedBackend::Sqlite => {
                    let sqlite = SharedCacheConfig::at(&config.cache.shared_path);
                    (
                        Arc::new(SqliteByteCache::open(&sqlite)?),
                        Arc::new(SqliteLock::open(&sqlite, config.cache.lock_lease())?),
                    )
                }
                SharedBackend::Memory => (
                    Arc::new(MemoryByteCache::new()),
                    Arc::new(LocalLock::new(config.cache.lock_lease())),
                ),
            };

        Ok(Self {
            store,
            shared,
            lock,
        })
    }

    /// Cache for `key` in the configured bucket
    pub fn cache<T>(&self, config: &TaarLiteConfig, key: &str) -> GraphCache<T>
    where
        T: serde::de::DeserializeOwned + Send + Sync + 'static,
    {
        let cache_config = GraphCacheConfig::new(config.source.bucket.clone(), key)
            .with_ttl(config.cache.ttl())
            .with_lock_timeout(config.cache.lock_timeout())
            .with_failure_backoff(config.cache.failure_backoff());
        GraphCache::new(
            cache_config,
            self.store.clone(),
            self.shared.clone(),
            self.lock.clone(),
        )
    }
}

/// Which variants to build and which one answers unnamed requests
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub variants: Vec<Variant>,
    pub default_variant: Variant,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            variants: Variant::PRODUCTION.to_vec(),
            default_variant: Variant::default(),
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &RecommenderConfig) -> Result<Self> {
        Ok(Self {
            variants: config.variants(),
            default_variant: config.default_variant()?,
        })
    }
}

/// A query as received from the HTTP layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationQuery {
    pub query_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    pub limit: usize,
}

/// Snapshot for the health endpoint and the `check` command
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub ready: bool,
    pub variants: Vec<Variant>,
    pub default_variant: Variant,
    pub coinstall_rows: Option<usize>,
    pub ranking_rows: Option<usize>,
    pub coinstall_loaded_at: Option<DateTime<Utc>>,
    pub ranking_loaded_at: Option<DateTime<Utc>>,
}

type BuildInputs = (Arc<WeightedGraph>, Arc<RankingTable>);

/// Serves recommendations from a set rebuilt whenever its inputs change
pub struct RecommendationEngine {
    coinstall: Arc<CoinstallCache>,
    ranking: Arc<RankingCache>,
    options: EngineOptions,
    current: RwLock<Option<Arc<RecommenderSet>>>,
    // inputs of the last finished build, published or rejected
    built: Mutex<Option<BuildInputs>>,
}

impl RecommendationEngine {
    /// Load both resources and build the first recommender set
    ///
    /// # Errors
    /// Returns `InvalidGraph` when the loaded graph cannot be ranked. Data
    /// that is not yet available is not an error; queries answer empty
    /// until it arrives.
    pub async fn new(
        coinstall: Arc<CoinstallCache>,
        ranking: Arc<RankingCache>,
        options: EngineOptions,
    ) -> Result<Self> {
        let engine = Self {
            coinstall,
            ranking,
            options,
            current: RwLock::new(None),
            built: Mutex::new(None),
        };

        engine.coinstall.get().await;
        engine.ranking.get().await;
        let published = {
            let mut built = engine.built.lock().await;
            engine.rebuild(&mut built).await?
        };
        if !published {
            error!("Recommender data unavailable at startup");
        }

        Ok(engine)
    }

    /// Build an engine from configuration, opening every backend it names
    pub async fn from_config(config: &TaarLiteConfig) -> Result<Self> {
        validate_config_result(config)?;

        let capabilities = Capabilities::from_config(config)?;
        let coinstall = capabilities.cache(config, &config.source.coinstall_key);
        let ranking = capabilities.cache(config, &config.source.ranking_key);

        Self::new(
            Arc::new(coinstall),
            Arc::new(ranking),
            EngineOptions::from_config(&config.recommender)?,
        )
        .await
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn coinstall_cache(&self) -> &Arc<CoinstallCache> {
        &self.coinstall
    }

    pub fn ranking_cache(&self) -> &Arc<RankingCache> {
        &self.ranking
    }

    /// Current recommender set without checking for refreshes
    pub async fn current_set(&self) -> Option<Arc<RecommenderSet>> {
        self.current.read().await.clone()
    }

    /// Ranked recommendations for `query_key`
    ///
    /// `variant` of `None` uses the default variant. Missing data, an
    /// unknown variant and an unknown key all answer with an empty list.
    pub async fn recommend(
        &self,
        query_key: &str,
        variant: Option<&str>,
        limit: usize,
    ) -> Vec<Recommendation> {
        let variant_name = variant.unwrap_or(self.options.default_variant.as_str());

        let Some(set) = self.refreshed_set().await else {
            error!(query_key, variant = variant_name, "Recommender data unavailable");
            return Vec::new();
        };

        let results = set.recommend(variant_name, query_key, limit);
        info!(
            query_key,
            variant = variant_name,
            results = ?results.iter().map(|r| r.key.as_str()).collect::<Vec<_>>(),
            "Answered recommendation query"
        );
        results
    }

    pub async fn query(&self, query: &RecommendationQuery) -> Vec<Recommendation> {
        self.recommend(&query.query_key, query.variant.as_deref(), query.limit)
            .await
    }

    /// Invalidate both resources here and in the shared cache
    pub async fn force_expiry(&self) -> Result<()> {
        self.coinstall.force_expiry().await?;
        self.ranking.force_expiry().await?;
        Ok(())
    }

    pub async fn status(&self) -> EngineStatus {
        let set = self.current_set().await;
        let coinstall = self.coinstall.entry();
        let ranking = self.ranking.entry();

        EngineStatus {
            ready: set.is_some(),
            variants: set.map(|s| s.variants().collect()).unwrap_or_default(),
            default_variant: self.options.default_variant,
            coinstall_rows: coinstall.as_ref().map(|e| e.value().len()),
            ranking_rows: ranking.as_ref().map(|e| e.value().len()),
            coinstall_loaded_at: coinstall.map(|e| e.loaded_at()),
            ranking_loaded_at: ranking.map(|e| e.loaded_at()),
        }
    }

    async fn refreshed_set(&self) -> Option<Arc<RecommenderSet>> {
        self.coinstall.get().await;
        self.ranking.get().await;

        // with a set published, a rebuild already in flight answers for us
        let built = if self.current.read().await.is_none() {
            Some(self.built.lock().await)
        } else {
            self.built.try_lock().ok()
        };
        if let Some(mut built) = built {
            if let Err(e) = self.rebuild(&mut built).await {
                error!(error = %e, "Rebuild failed, keeping previous recommenders");
            }
        }

        self.current_set().await
    }

    /// Rebuild from the caches' current values unless those exact values
    /// were built last time. Returns whether a new set was published.
    async fn rebuild(&self, built: &mut Option<BuildInputs>) -> Result<bool> {
        let (Some(graph), Some(ranking)) = (self.coinstall.current(), self.ranking.current())
        else {
            return Ok(false);
        };
        if let Some((g, r)) = built.as_ref() {
            if Arc::ptr_eq(g, &graph) && Arc::ptr_eq(r, &ranking) {
                return Ok(false);
            }
        }

        let inputs = (graph.clone(), ranking.clone());
        let variants = self.options.variants.clone();
        let result = tokio::task::spawn_blocking(move || {
            RecommenderSet::build(&graph, ranking, &variants)
        })
        .await
        .map_err(|e| TaarLiteError::Other(format!("rebuild task failed: {}", e)))?;

        match result {
            Ok(set) => {
                *self.current.write().await = Some(Arc::new(set));
                *built = Some(inputs);
                Ok(true)
            }
            Err(e) => {
                // the same inputs would fail the same way
                *built = Some(inputs);
                Err(e)
            }
        }
    }
}
