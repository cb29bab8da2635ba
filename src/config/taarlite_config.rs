//! TAAR Lite configuration file handling
//!
//! Loads and manages the ~/.config/taarlite/config.yaml file. Every section
//! is optional; a missing file means the production defaults.

use crate::recommender::Variant;
use crate::{Result, TaarLiteError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding `cache.ttl_secs`
pub const ENV_CACHE_EXPIRY: &str = "TAAR_CACHE_EXPIRY";

/// Environment variable overriding `server.max_results`
pub const ENV_MAX_RESULTS: &str = "TAAR_MAX_RESULTS";

/// Environment variable overriding `server.bind`
pub const ENV_BIND: &str = "TAARLITE_BIND";

fn config_dir() -> PathBuf {
    // Always use ~/.config for consistency across platforms (macOS, Linux)
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".config");
    path.push("taarlite");
    path
}

/// Where the JSON resources are downloaded from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceBackend {
    /// Public-read bucket over HTTP
    #[default]
    Http,
    /// Local directory mirroring the bucket layout
    File,
}

/// Remote resource settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub backend: SourceBackend,

    /// Base URL of the object store
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Root directory for the file backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    #[serde(default = "default_bucket")]
    pub bucket: String,

    /// Object key of the co-installation graph
    #[serde(default = "default_coinstall_key")]
    pub coinstall_key: String,

    /// Object key of the install ranking table
    #[serde(default = "default_ranking_key")]
    pub ranking_key: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_endpoint() -> String {
    "https://s3-us-west-2.amazonaws.com".to_string()
}

fn default_bucket() -> String {
    "telemetry-parquet".to_string()
}

fn default_coinstall_key() -> String {
    "taar/lite/guid_coinstallation.json".to_string()
}

fn default_ranking_key() -> String {
    "taar/lite/guid_install_ranking.json".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            backend: SourceBackend::default(),
            endpoint: default_endpoint(),
            root: None,
            bucket: default_bucket(),
            coinstall_key: default_coinstall_key(),
            ranking_key: default_ranking_key(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl SourceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Backend for the shared byte cache and fetch lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SharedBackend {
    /// SQLite file shared by every process on the host
    #[default]
    Sqlite,
    /// In-process only
    Memory,
}

/// Refresh policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Time-to-live of a loaded resource
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,

    /// Lease after which an abandoned fetch lock lapses
    #[serde(default = "default_lock_lease")]
    pub lock_lease_secs: u64,

    #[serde(default = "default_failure_backoff")]
    pub failure_backoff_secs: u64,

    #[serde(default)]
    pub shared: SharedBackend,

    /// SQLite file for the shared backend
    #[serde(default = "default_shared_path")]
    pub shared_path: PathBuf,
}

fn default_ttl() -> u64 {
    14_400
}

fn default_lock_timeout() -> u64 {
    30
}

fn default_lock_lease() -> u64 {
    60
}

fn default_failure_backoff() -> u64 {
    60
}

fn default_shared_path() -> PathBuf {
    config_dir().join("cache.db")
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl(),
            lock_timeout_secs: default_lock_timeout(),
            lock_lease_secs: default_lock_lease(),
            failure_backoff_secs: default_failure_backoff(),
            shared: SharedBackend::default(),
            shared_path: default_shared_path(),
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn lock_lease(&self) -> Duration {
        Duration::from_secs(self.lock_lease_secs)
    }

    pub fn failure_backoff(&self) -> Duration {
        Duration::from_secs(self.failure_backoff_secs)
    }
}

/// HTTP endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Number of recommendations a response must carry
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_max_results() -> usize {
    4
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_results: default_max_results(),
        }
    }
}

/// Which recommenders to build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommenderConfig {
    /// Variant used when a request names none
    #[serde(default = "default_variant")]
    pub default_variant: String,

    /// Also build the propagation variant
    #[serde(default)]
    pub experimental: bool,
}

fn default_variant() -> String {
    Variant::default().to_string()
}

impl Default for RecommenderConfig {
    fn default() -> Self {
        Self {
            default_variant: default_variant(),
            experimental: false,
        }
    }
}

impl RecommenderConfig {
    /// Variants to build, production ones first
    pub fn variants(&self) -> Vec<Variant> {
        if self.experimental {
            Variant::ALL.to_vec()
        } else {
            Variant::PRODUCTION.to_vec()
        }
    }

    pub fn default_variant(&self) -> Result<Variant> {
        self.default_variant.parse()
    }
}

/// Main TAAR Lite configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaarLiteConfig {
    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub recommender: RecommenderConfig,
}

impl TaarLiteConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a specific path, then apply env overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(TaarLiteError::Config(format!(
                "Config file not found: {}",
                path.display()
            )));
        }

        tracing::info!(path = %path.display(), "Loading TAAR Lite configuration");

        let content = fs::read_to_string(path)?;
        let mut config: Self = serde_yaml::from_str(&content)?;
        config.apply_env_overrides()?;

        tracing::debug!(
            bucket = %config.source.bucket,
            ttl_secs = config.cache.ttl_secs,
            max_results = config.server.max_results,
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Load from `path` if it exists, otherwise use the defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            return Self::load(path);
        }

        tracing::debug!(path = %path.display(), "No config file, using defaults");
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %path.display(), "Saving TAAR Lite configuration");

        let yaml = serde_yaml::to_string(self)?;
        fs::write(path, yaml)?;

        Ok(())
    }

    /// Get the default config path (~/.config/taarlite/config.yaml)
    pub fn default_path() -> PathBuf {
        config_dir().join("config.yaml")
    }

    /// Apply overrides from the process environment
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_CACHE_EXPIRY) {
            self.cache.ttl_secs = parse_number(ENV_CACHE_EXPIRY, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_RESULTS) {
            self.server.max_results = parse_number(ENV_MAX_RESULTS, &value)?;
        }
        if let Some(value) = lookup(ENV_BIND) {
            self.server.bind = value;
        }
        Ok(())
    }
}

fn parse_number<N: std::str::FromStr>(name: &str, value: &str) -> Result<N> {
    value.trim().parse().map_err(|_| {
        TaarLiteError::Config(format!("{} must be a number, got '{}'", name, value))
    })
}
