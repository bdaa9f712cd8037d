//! API layer - HTTP handlers and routing
//!
//! This module contains the HTTP endpoints of the Agora backend:
//! - Auth endpoints (registration, sessions, activation, password)
//! - Account directory and friends endpoints
//! - Health check

pub mod auth;
pub mod common;
pub mod cookies;
pub mod middleware;
pub mod responses;
pub mod users;

use anyhow::Context;
use axum::{
    extract::State,
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    routing::get,
    Json, Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use middleware::{ApiError, AppJson, AppState, AuthenticatedUser};

use crate::db::DatabasePool;
use responses::HealthResponse;

/// Build the API router
pub fn build_api_router(state: AppState) -> Router<AppState> {
    // Protected routes (need a valid access token)
    let protected_routes = Router::new()
        .nest("/auth", auth::protected_router())
        .nest("/users", users::protected_router())
        .route_layer(axum_middleware::from_fn_with_state(
            state,
            middleware::require_auth,
        ));

    // Public routes
    Router::new()
        .route("/health", get(health))
        .nest("/auth", auth::public_router())
        .nest("/users", users::public_router())
        .merge(protected_routes)
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> anyhow::Result<Router> {
    // Browsers only send the refresh cookie cross-origin with credentials allowed
    let origin = cors_origin
        .parse::<HeaderValue>()
        .with_context(|| format!("Invalid CORS origin '{}'", cors_origin))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true);

    Ok(build_api_router(state.clone())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

/// GET /health - Liveness check that also pings the database
async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    state
        .pool
        .ping()
        .await
        .context("Database ping failed")
        .map_err(ApiError::internal)?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
    }))
}
