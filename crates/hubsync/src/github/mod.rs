//! GitHub REST API client.
//!
//! Requests go through the [`HttpTransport`](crate::http::HttpTransport)
//! seam, so the client is exercised in tests without a network.

pub mod client;
pub mod error;
pub mod pagination;
pub mod types;

pub use client::{GitHubClient, parse_expires, parse_rate_limit_headers};
pub use error::{ClientError, short_error_message};
pub use pagination::{FetchResult, LinkPagination, Listing, parse_link_header};
pub use types::{ApiErrorBody, ApiResponse, ItemRef, RateLimitResource};
