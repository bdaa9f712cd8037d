//! Account directory API endpoints
//!
//! - GET /users - Paginated account list
//! - GET /users/search?name= - Prefix search on full name
//! - GET /users/{id} - Public profile
//! - POST /users/{id}/friends - Befriend (auth)
//! - DELETE /users/{id}/friends - Unfriend (auth)

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::api::common::PaginationQuery;
use crate::api::middleware::{ApiError, AppState, AuthenticatedUser};
use crate::api::responses::AccountPageResponse;
use crate::models::{Account, AccountSummary};

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub name: String,
}

/// Build public directory routes
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_users))
        .route("/search", get(search_users))
        .route("/{id}", get(get_user))
}

/// Build protected directory routes (requires auth middleware)
pub fn protected_router() -> Router<AppState> {
    Router::new().route("/{id}/friends", post(add_friend).delete(remove_friend))
}

/// GET /users - Paginated account list, newest first
async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<PaginationQuery>,
) -> Result<Json<AccountPageResponse>, ApiError> {
    let (page, per_page) = query.normalized();
    let (users, total) = state.user_service.list(page, per_page).await?;

    Ok(Json(AccountPageResponse {
        users,
        total,
        page,
        per_page,
    }))
}

/// GET /users/search - Accounts whose name starts with `name`
async fn search_users(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<Vec<AccountSummary>>, ApiError> {
    let users = state.user_service.search_by_name(&query.name).await?;
    Ok(Json(users))
}

/// GET /users/{id} - Public profile
async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Account>, ApiError> {
    let account = state.user_service.get_profile(id).await?;
    Ok(Json(account))
}

/// POST /users/{id}/friends - Add a friend to the caller's account
async fn add_friend(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<Account>, ApiError> {
    let account = state.user_service.add_friend(user.id(), id).await?;
    Ok(Json(account))
}

/// DELETE /users/{id}/friends - Remove a friend from the caller's account
async fn remove_friend(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<i64>,
) -> Result<Json<Account>, ApiError> {
    let account = state.user_service.remove_friend(user.id(), id).await?;
    Ok(Json(account))
}
