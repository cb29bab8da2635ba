//! Configuration system
//!
//! Loads ~/.config/taarlite/config.yaml with support for:
//! - HTTP or local-directory object sources
//! - Refresh policy and the shared cache backend
//! - Server bind address and response size
//! - Which recommender variants are built
//!
//! `TAAR_CACHE_EXPIRY`, `TAAR_MAX_RESULTS` and `TAARLITE_BIND` override the
//! file after it is loaded.

mod taarlite_config;
pub mod validation;

pub use taarlite_config::{
    CacheSettings, RecommenderConfig, ServerConfig, SharedBackend, SourceBackend, SourceConfig,
    TaarLiteConfig, ENV_BIND, ENV_CACHE_EXPIRY, ENV_MAX_RESULTS,
};
pub use validation::{validate_config, validate_config_result, ValidationError};
