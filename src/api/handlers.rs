//! API Handlers
//!
//! HTTP request handlers for each admin endpoint.

use std::sync::Arc;

use axum::{extract::State, Json};

use crate::error::Result;
use crate::models::{CountsResponse, HealthResponse, StatsResponse};
use crate::repo::LocalRepo;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<LocalRepo>,
}

impl AppState {
    pub fn new(repo: Arc<LocalRepo>) -> Self {
        Self { repo }
    }
}

/// Handler for GET /health
///
/// Pings the engine; a storage failure surfaces as a 500.
pub async fn health_handler(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    state.repo.health_check().await?;
    Ok(Json(HealthResponse::healthy(state.repo.engine_name())))
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse::new(state.repo.stats().snapshot()))
}

/// Handler for POST /invalidate_all
///
/// Full cold-cache reset.
pub async fn invalidate_all_handler(
    State(state): State<AppState>,
) -> Result<Json<CountsResponse>> {
    let deleted = state.repo.invalidate_all().await?;
    Ok(Json(CountsResponse::new("All caches invalidated", deleted)))
}

/// Handler for POST /clean_expired
pub async fn clean_expired_handler(
    State(state): State<AppState>,
) -> Result<Json<CountsResponse>> {
    let deleted = state.repo.clean_expired().await?;
    Ok(Json(CountsResponse::new("Expired records removed", deleted)))
}
