//! HTTP server for add-on recommendations
//!
//! # Routes
//!
//! - `GET /health` - Liveness plus what the engine has loaded
//! - `GET /taarlite/api/v1/addon_recommendations/{guid}/` - Recommendations
//!   for one add-on GUID, optionally `?normalize=<variant>`
//!
//! A recommendation response always carries exactly `max_results` GUIDs, or
//! none at all when fewer are available.

use crate::engine::{EngineStatus, RecommendationEngine};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;

/// Server error types
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bind error: {0}")]
    Bind(String),
}

/// Shared server state
struct AppState {
    engine: Arc<RecommendationEngine>,
    max_results: usize,
}

/// HTTP front end for a [`RecommendationEngine`]
pub struct RecommendationServer {
    state: Arc<AppState>,
}

impl RecommendationServer {
    pub fn new(engine: Arc<RecommendationEngine>, max_results: usize) -> Self {
        Self {
            state: Arc::new(AppState {
                engine,
                max_results,
            }),
        }
    }

    fn router(state: Arc<AppState>) -> Router {
        Router::new()
            .route("/health", get(health))
            .route(
                "/taarlite/api/v1/addon_recommendations/{guid}/",
                get(addon_recommendations),
            )
            .with_state(state)
    }

    /// Router for embedding in another axum application
    pub fn into_router(self) -> Router {
        Self::router(self.state)
    }

    /// Run the server on the given address
    pub async fn run(self, addr: &str) -> Result<(), ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind(e.to_string()))?;

        tracing::info!(
            addr = addr,
            max_results = self.state.max_results,
            "Recommendation server listening"
        );

        axum::serve(listener, Self::router(self.state))
            .await
            .map_err(ServerError::Io)
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

/// Query string of the recommendation route
#[derive(Debug, Deserialize)]
pub struct RecommendationParams {
    /// Variant name; the engine default when absent
    pub normalize: Option<String>,
}

/// Body of a recommendation response
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct RecommendationResponse {
    pub results: Vec<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(flatten)]
    engine: EngineStatus,
}

// ============================================================================
// Handlers
// ============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        engine: state.engine.status().await,
    })
}

async fn addon_recommendations(
    State(state): State<Arc<AppState>>,
    Path(guid): Path<String>,
    Query(params): Query<RecommendationParams>,
) -> Json<RecommendationResponse> {
    let recommendations = state
        .engine
        .recommend(&guid, params.normalize.as_deref(), state.max_results)
        .await;

    let results = if recommendations.len() == state.max_results {
        recommendations.into_iter().map(|r| r.key).collect()
    } else {
        tracing::debug!(
            guid = %guid,
            available = recommendations.len(),
            wanted = state.max_results,
            "Not enough recommendations, answering empty"
        );
        Vec::new()
    };

    Json(RecommendationResponse { results })
}
