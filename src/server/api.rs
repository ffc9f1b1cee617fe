//! HTTP API for the serving engine.
//!
//! - POST /v1/generate: serve a tokenized prompt
//! - GET /health: liveness plus live pool headroom
//! - GET /v1/cache/stats: cache and router statistics
//! - GET /metrics: Prometheus text exposition

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::cache::radix::{CacheStats, SharedRadixCache};
use crate::config::Config;
use crate::metrics;
use crate::router::policy::{RlRouter, RouterSnapshot};
use crate::serving::engine::{RequestMetrics, ServeEngine};
use crate::TokenId;

/// Application state shared across handlers.
pub struct AppState {
    pub engine: ServeEngine,
    pub cache: SharedRadixCache,
    pub router: Arc<RlRouter>,
    pub config: Arc<Config>,
    pub start_time: Instant,
}

/// Build the axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    let max_concurrent = state.config.server.max_concurrent_requests;

    Router::new()
        .route("/v1/generate", post(generate))
        .route("/v1/cache/stats", get(cache_stats))
        .route("/health", get(health))
        .route("/metrics", get(metrics_exposition))
        .layer(GlobalConcurrencyLimitLayer::new(max_concurrent))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─── Request/Response Types ────────────────────────────────────────────────

/// Generation request: a tokenized prompt.
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub prompt_ids: Vec<TokenId>,
}

/// Generation response.
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub text: String,
    pub metrics: RequestMetrics,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,

    /// Live count from the block pool, never cached.
    pub free_blocks: usize,

    pub uptime_secs: u64,
}

/// Cache statistics response.
#[derive(Debug, Serialize)]
pub struct CacheStatsResponse {
    pub cache: CacheStats,
    pub router: RouterSnapshot,
}

// ─── Route Handlers ────────────────────────────────────────────────────────

async fn generate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, StatusCode> {
    let request_id = Uuid::new_v4().to_string();

    info!(
        request_id = %request_id,
        prompt_tokens = req.prompt_ids.len(),
        "Generation request"
    );

    match state.engine.generate(&request_id, &req.prompt_ids).await {
        Ok(result) => Ok(Json(GenerateResponse {
            text: result.text,
            metrics: result.metrics,
        })),
        Err(e) => {
            error!(request_id = %request_id, error = %e, "Generation failed");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let cache = state.cache.read().await;

    Json(HealthResponse {
        status: "operational".to_string(),
        free_blocks: cache.free_blocks(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn cache_stats(State(state): State<Arc<AppState>>) -> Json<CacheStatsResponse> {
    let cache = state.cache.read().await;

    Json(CacheStatsResponse {
        cache: cache.stats(),
        router: state.router.snapshot(),
    })
}

async fn metrics_exposition(
    State(state): State<Arc<AppState>>,
) -> Result<String, StatusCode> {
    let stats = state.cache.read().await.stats();
    metrics::CACHE_FREE_BLOCKS.set(stats.free_blocks as i64);
    metrics::CACHE_TOTAL_BLOCKS.set(stats.total_blocks as i64);

    metrics::render().map_err(|e| {
        error!(error = %e, "Metrics encoding failed");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}
