//! Common API utilities and shared types

use serde::Deserialize;

/// Largest page a client may request
pub const MAX_PER_PAGE: i64 = 100;

/// Highest page number; keeps the row offset within `i64`
pub const MAX_PAGE: i64 = i64::MAX / MAX_PER_PAGE;

/// Default page number (1-indexed)
pub fn default_page() -> i64 {
    1
}

/// Default page size
pub fn default_per_page() -> i64 {
    20
}

/// Pagination query parameters
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginationQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_per_page")]
    pub per_page: i64,
}

impl PaginationQuery {
    /// Page and page size clamped to valid ranges
    pub fn normalized(&self) -> (i64, i64) {
        (
            self.page.clamp(1, MAX_PAGE),
            self.per_page.clamp(1, MAX_PER_PAGE),
        )
    }
}
