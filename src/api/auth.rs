//! Authentication API endpoints
//!
//! - POST /auth/register - Account registration
//! - POST /auth/login - Login
//! - GET /auth/refresh - Rotate the refresh cookie, new access token
//! - GET /auth/activate/{link} - Activation link from the email
//! - POST /auth/logout - Logout (auth)
//! - GET /auth/me - Current account (auth)
//! - PATCH /auth/change-password - Change password (auth)
//! - PATCH /auth/update - Update profile (auth)

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect},
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;

use crate::api::cookies::refresh_token_from;
use crate::api::middleware::{ApiError, AppJson, AppState, AuthenticatedUser};
use crate::api::responses::{AuthResponse, PasswordChangedResponse};
use crate::models::Account;
use crate::services::auth::{AuthSession, ChangePasswordInput, LoginInput, RegisterInput};
use crate::services::user::UpdateProfileInput;

/// Request body for registration
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub avatar_url: Option<String>,
}

/// Request body for login
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request body for changing the password
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub password: String,
    pub new_password1: String,
    pub new_password2: String,
}

/// Request body for updating the profile
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub about_me: Option<String>,
    pub avatar_url: Option<String>,
}

/// Build protected auth routes (requires auth middleware)
pub fn protected_router() -> Router<AppState> {
    Router::new()
        .route("/logout", post(logout))
        .route("/me", get(get_current_user))
        .route("/change-password", patch(change_password))
        .route("/update", patch(update_profile))
}

/// Build public auth routes (no auth required)
pub fn public_router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", get(refresh))
        .route("/activate/{link}", get(activate))
}

/// Set the refresh cookie and return the account with its access token
fn session_response(
    state: &AppState,
    session: AuthSession,
) -> Result<(HeaderMap, Json<AuthResponse>), ApiError> {
    let headers = state.refresh_cookie.set(&session.tokens.refresh_token)?;
    Ok((
        headers,
        Json(AuthResponse {
            user: session.account,
            access_token: session.tokens.access_token,
        }),
    ))
}

/// POST /auth/register - Account registration
async fn register(
    State(state): State<AppState>,
    AppJson(body): AppJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut input = RegisterInput::new(body.email, body.password, body.full_name);
    if let Some(avatar_url) = body.avatar_url.filter(|url| !url.trim().is_empty()) {
        input = input.with_avatar_url(avatar_url);
    }

    let session = state.auth_service.register(input).await?;
    let (headers, body) = session_response(&state, session)?;
    Ok((StatusCode::CREATED, headers, body))
}

/// POST /auth/login - Login
async fn login(
    State(state): State<AppState>,
    AppJson(body): AppJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state
        .auth_service
        .login(LoginInput::new(body.email, body.password))
        .await?;
    session_response(&state, session)
}

/// GET /auth/refresh - Exchange the refresh cookie for a new session
async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let token = refresh_token_from(&headers);
    let session = state.auth_service.refresh(token.as_deref()).await?;
    session_response(&state, session)
}

/// POST /auth/logout - Logout
///
/// Requires authentication.
async fn logout(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(token) = refresh_token_from(&headers) {
        state.auth_service.logout(&token).await?;
    }

    let headers = state.refresh_cookie.clear()?;
    Ok((StatusCode::OK, headers))
}

/// GET /auth/activate/{link} - Activate and send the browser to the client app
async fn activate(
    State(state): State<AppState>,
    Path(link): Path<String>,
) -> Result<Redirect, ApiError> {
    state.auth_service.activate(&link).await?;
    Ok(Redirect::to(&state.client_url))
}

/// GET /auth/me - Current account
///
/// Requires authentication.
async fn get_current_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Json<Account>, ApiError> {
    let account = state.auth_service.get_me(user.id()).await?;
    Ok(Json(account))
}

/// PATCH /auth/change-password - Change password
///
/// Requires authentication. Other sessions of the account stop refreshing.
async fn change_password(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppJson(body): AppJson<ChangePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let input = ChangePasswordInput {
        password: body.password,
        new_password1: body.new_password1,
        new_password2: body.new_password2,
    };
    let session = state.auth_service.change_password(user.id(), input).await?;

    let headers = state.refresh_cookie.set(&session.tokens.refresh_token)?;
    Ok((
        headers,
        Json(PasswordChangedResponse {
            message: "Password changed".to_string(),
            access_token: session.tokens.access_token,
        }),
    ))
}

/// PATCH /auth/update - Update the current account's profile
///
/// Requires authentication.
async fn update_profile(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    AppJson(body): AppJson<UpdateProfileRequest>,
) -> Result<Json<Account>, ApiError> {
    let input = UpdateProfileInput {
        full_name: body.full_name,
        email: body.email,
        about_me: body.about_me,
        avatar_url: body.avatar_url,
    };
    let account = state.user_service.update_profile(user.id(), input).await?;
    Ok(Json(account))
}
