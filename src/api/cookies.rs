//! Refresh token cookie
//!
//! The refresh token only ever travels in an HttpOnly cookie so page scripts
//! cannot read it.

use axum::http::{header, HeaderMap, HeaderValue};
use chrono::Duration;

use crate::api::middleware::ApiError;

pub const REFRESH_COOKIE_NAME: &str = "refreshToken";

/// Settings for the `Set-Cookie` headers carrying the refresh token
#[derive(Debug, Clone, Copy)]
pub struct RefreshCookie {
    max_age_secs: i64,
    secure: bool,
}

impl RefreshCookie {
    pub fn new(ttl: Duration, secure: bool) -> Self {
        Self {
            max_age_secs: ttl.num_seconds(),
            secure,
        }
    }

    /// Headers that store `token` in the browser
    pub fn set(&self, token: &str) -> Result<HeaderMap, ApiError> {
        self.header(token, self.max_age_secs)
    }

    /// Headers that make the browser drop the cookie
    pub fn clear(&self) -> Result<HeaderMap, ApiError> {
        self.header("", 0)
    }

    fn header(&self, value: &str, max_age: i64) -> Result<HeaderMap, ApiError> {
        let mut cookie = format!(
            "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
            REFRESH_COOKIE_NAME, value, max_age
        );
        if self.secure {
            cookie.push_str("; Secure");
        }

        let value = HeaderValue::from_str(&cookie)
            .map_err(|e| ApiError::internal(anyhow::anyhow!("Invalid cookie header: {}", e)))?;
        let mut headers = HeaderMap::new();
        headers.insert(header::SET_COOKIE, value);
        Ok(headers)
    }
}

/// Read the refresh token from the request's cookies
pub fn refresh_token_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .find_map(|cookie| {
            cookie
                .trim()
                .strip_prefix(REFRESH_COOKIE_NAME)?
                .strip_prefix('=')
                .map(str::to_string)
        })
        .filter(|token| !token.is_empty())
}
