//! GitHub API response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::RateLimitBudget;

use super::pagination::LinkPagination;

/// A successful (2xx or 304) API response.
///
/// `result` is `None` for `304 Not Modified` and for responses without a body.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    pub status: u16,
    pub result: Option<T>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// Freshness lifetime end, from `Cache-Control: max-age` or `Expires`.
    pub expires: Option<DateTime<Utc>>,
    /// Rate-limit snapshot from the `X-RateLimit-*` headers.
    pub rate_limit: Option<RateLimitBudget>,
    /// Final URL when one or more redirects were followed.
    pub redirect: Option<String>,
    pub pagination: Option<LinkPagination>,
}

impl<T> ApiResponse<T> {
    /// A response with `status` and nothing else.
    #[must_use]
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            result: None,
            etag: None,
            last_modified: None,
            expires: None,
            rate_limit: None,
            redirect: None,
            pagination: None,
        }
    }

    #[must_use]
    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }
}

/// GitHub's JSON error document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub message: String,
    #[serde(default)]
    pub documentation_url: Option<String>,
}

/// The fields of a listed item the engine needs to key it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ItemRef {
    pub id: i64,
    #[serde(default)]
    pub number: Option<i64>,
}

/// Response of `GET /rate_limit`.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitResponse {
    pub resources: RateLimitResources,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitResources {
    pub core: RateLimitResource,
    #[serde(default)]
    pub search: Option<RateLimitResource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitResource {
    pub limit: u32,
    pub remaining: u32,
    /// Unix timestamp (seconds) of the window reset.
    pub reset: i64,
    #[serde(default)]
    pub used: u32,
}

impl RateLimitResource {
    #[must_use]
    pub fn budget(&self) -> Option<RateLimitBudget> {
        Some(RateLimitBudget {
            limit: self.limit,
            remaining: self.remaining,
            reset: DateTime::from_timestamp(self.reset, 0)?,
        })
    }
}
