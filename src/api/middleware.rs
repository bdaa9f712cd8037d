//! API middleware
//!
//! Contains:
//! - `AppState`, the services shared by every handler
//! - `ApiError`, the JSON error envelope and its status mapping
//! - `AppJson`, a JSON body extractor that rejects with that envelope
//! - Authentication (bearer access token validation)

use axum::{
    extract::{rejection::JsonRejection, FromRequest, FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::api::cookies::RefreshCookie;
use crate::config::Config;
use crate::db::repositories::{SqlxAccountRepository, SqlxSessionRepository};
use crate::db::DynDatabasePool;
use crate::services::activation::ActivationService;
use crate::services::auth::{AuthService, AuthServiceError};
use crate::services::email::MailSender;
use crate::services::token::{TokenClaims, TokenService, TokenSettings};
use crate::services::user::{UserService, UserServiceError};

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub auth_service: Arc<AuthService>,
    pub user_service: Arc<UserService>,
    pub refresh_cookie: RefreshCookie,
    /// Where the activation endpoint sends the browser afterwards
    pub client_url: Arc<str>,
}

impl AppState {
    /// Wire repositories and services on top of a migrated pool
    pub fn new(pool: DynDatabasePool, config: &Config, mailer: Arc<dyn MailSender>) -> Self {
        let accounts = SqlxAccountRepository::boxed(pool.clone());
        let sessions = SqlxSessionRepository::boxed(pool.clone());

        let settings = TokenSettings::from_config(&config.auth);
        let refresh_cookie = RefreshCookie::new(settings.refresh_ttl, config.auth.secure_cookie);
        let tokens = Arc::new(TokenService::new(settings, sessions));
        let activation = Arc::new(ActivationService::new(
            accounts.clone(),
            mailer,
            config.server.api_url.clone(),
        ));

        Self {
            pool,
            auth_service: Arc::new(AuthService::new(accounts.clone(), tokens, activation)),
            user_service: Arc::new(UserService::new(accounts)),
            refresh_cookie,
            client_url: Arc::from(config.server.client_url.as_str()),
        }
    }
}

/// Claims of the access token presented with the request
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub TokenClaims);

impl AuthenticatedUser {
    pub fn id(&self) -> i64 {
        self.0.id
    }
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| ApiError::unauthorized("Authentication required"))
    }
}

/// JSON request body; a malformed or missing body is a `VALIDATION_ERROR`
#[derive(Debug, Clone, Copy, Default)]
pub struct AppJson<T>(pub T);

impl<S, T> FromRequest<S> for AppJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new("UNAUTHORIZED", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("CONFLICT", message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    /// Log the cause and hide it from the client
    pub fn internal(err: anyhow::Error) -> Self {
        tracing::error!("{:#}", err);
        Self::internal_error("Internal server error")
    }

    pub fn status(&self) -> StatusCode {
        match self.error.code.as_str() {
            "UNAUTHORIZED" => StatusCode::UNAUTHORIZED,
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
            "CONFLICT" => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::validation_error(rejection.body_text())
    }
}

impl From<AuthServiceError> for ApiError {
    fn from(err: AuthServiceError) -> Self {
        match err {
            AuthServiceError::ValidationError(msg) => Self::validation_error(msg),
            AuthServiceError::AuthenticationError(msg) => Self::unauthorized(msg),
            AuthServiceError::NotFound(msg) => Self::not_found(msg),
            AuthServiceError::AccountExists(msg) => Self::conflict(msg),
            AuthServiceError::InternalError(e) => Self::internal(e),
        }
    }
}

impl From<UserServiceError> for ApiError {
    fn from(err: UserServiceError) -> Self {
        match err {
            UserServiceError::ValidationError(msg) => Self::validation_error(msg),
            UserServiceError::NotFound(msg) => Self::not_found(msg),
            UserServiceError::EmailTaken(msg) => Self::conflict(msg),
            UserServiceError::InternalError(e) => Self::internal(e),
        }
    }
}

/// Extract the bearer access token from the Authorization header
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Authentication middleware
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer_token(request.headers())
        .ok_or_else(|| ApiError::unauthorized("User is not authorized"))?;

    let claims = state
        .auth_service
        .verify_access_token(token)
        .ok_or_else(|| ApiError::unauthorized("User is not authorized"))?;

    request.extensions_mut().insert(AuthenticatedUser(claims));
    Ok(next.run(request).await)
}
