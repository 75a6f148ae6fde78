//! HTTP route handlers

pub mod contracts;
pub mod proposals;
pub mod requests;
pub mod responses;

use axum::{
    extract::State,
    routing::{get, post, put},
    Json, Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::AppState;
use responses::HealthResponse;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/conflicts/check", post(proposals::check_conflicts))
        .route("/api/proposals", post(proposals::create))
        .route(
            "/api/proposals/:id",
            get(proposals::get).patch(proposals::revise),
        )
        .route("/api/proposals/:id/transition", post(proposals::transition))
        .route("/api/proposals/:id/reject", post(proposals::reject))
        .route(
            "/api/proposals/:id/lines/:line_id/status",
            put(proposals::set_line_status),
        )
        .route("/api/proposals/:id/conflicts", get(proposals::conflicts))
        .route("/api/proposals/:id/complete", post(proposals::complete))
        .route("/api/proposals/:id/history", get(proposals::history))
        .route("/api/contracts", get(contracts::active))
        .route("/api/contracts/:id", get(contracts::current))
        .route("/api/contracts/:id/versions", get(contracts::versions))
        .route("/api/contracts/:id/versions/:version", get(contracts::version))
        .route("/api/contracts/:id/diff", get(contracts::diff))
        .route("/api/contracts/:id/suspend", post(contracts::suspend))
        .route("/api/contracts/:id/unsuspend", post(contracts::unsuspend))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        reference_cache: state.cache.stats(),
    })
}
