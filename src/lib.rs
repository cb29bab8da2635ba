//! TAAR Lite - add-on to add-on recommendations
//!
//! Given an add-on GUID, recommends the add-ons most often installed next to
//! it. Recommendations come from a co-installation graph and an install
//! ranking table, both downloaded as JSON and kept fresh without blocking
//! readers.
//!
//! # Architecture
//!
//! - **cache**: Refresh-aware `GraphCache` and its object store, shared byte
//!   cache and distributed lock backends
//! - **graph**: Weighted co-installation graph and install ranking table
//! - **treatments**: Graph normalisations chained into pipelines
//! - **recommender**: Ranked top-K lookups per named variant
//! - **engine**: Rebuilds the recommenders whenever a cache refreshes
//! - **server**: HTTP endpoint
//! - **config**: YAML configuration with environment overrides

// Core modules
pub mod config;
pub mod error;
pub mod graph;
pub mod logging;
pub mod retry;

// Components
pub mod cache;
pub mod engine;
pub mod recommender;
pub mod server;
pub mod treatments;

// Re-exports
pub use engine::RecommendationEngine;
pub use error::{Result, TaarLiteError};
