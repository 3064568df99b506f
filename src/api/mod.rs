//! HTTP API module - upload page and REST endpoints

mod generate;

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::replicate::{ModelRef, ReplicateClient};
use crate::restyle::GenerationParams;
pub use generate::{ErrorResponse, GenerateRequest, GenerateResponse};

/// Upload page, served as-is
const INDEX_HTML: &str = include_str!("../../static/index.html");

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub replicate: Arc<ReplicateClient>,
    pub model: Arc<ModelRef>,
    pub params: Arc<GenerationParams>,
}

/// Build the API router
pub fn router(state: AppState, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api", get(info))
        .route("/health", get(health_check))
        .merge(generate::router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(max_body_bytes)),
        )
        .with_state(state)
}

/// Upload page
async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Service info endpoint
async fn info() -> impl IntoResponse {
    Json(InfoResponse {
        name: "fabricd",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct InfoResponse {
    name: &'static str,
    version: &'static str,
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        provider: if state.replicate.is_configured() {
            "configured"
        } else {
            "unconfigured"
        },
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    provider: &'static str,
}
