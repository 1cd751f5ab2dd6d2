//! Paginated listing with conditional first-page requests.
//!
//! GitHub returns a fresh ETag for page 1 of a listing whenever any item on
//! any page changes, so only the first page is sent conditionally. A
//! `304 Not Modified` there means the whole listing is unchanged.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;

use crate::cache::{AccessToken, CacheMetadata};
use crate::http::HttpMethod;

use super::client::GitHubClient;
use super::error::ClientError;

/// Pagination cursors from a `Link` header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkPagination {
    pub next_page: Option<u32>,
    pub last_page: Option<u32>,
}

impl LinkPagination {
    #[inline]
    pub fn has_more(&self) -> bool {
        self.next_page.is_some()
    }
}

/// Parse the GitHub `Link` header into pagination cursors.
pub fn parse_link_header(link_header: &str) -> LinkPagination {
    let mut info = LinkPagination::default();

    for part in link_header.split(',') {
        let mut url = None;
        let mut rel = None;

        for segment in part.trim().split(';') {
            let segment = segment.trim();
            if let Some(inner) = segment.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
                url = Some(inner);
            } else if let Some(rel_value) = segment.strip_prefix("rel=") {
                rel = Some(rel_value.trim_matches('"'));
            }
        }

        if let (Some(url), Some(rel)) = (url, rel)
            && let Some(page) = extract_page_from_url(url)
        {
            match rel {
                "next" => info.next_page = Some(page),
                "last" => info.last_page = Some(page),
                _ => {}
            }
        }
    }

    info
}

/// Extract the `page` query parameter from a URL.
fn extract_page_from_url(url: &str) -> Option<u32> {
    let (_, query) = url.split_once('?')?;
    query
        .split('&')
        .find_map(|param| param.strip_prefix("page="))
        .and_then(|value| value.parse().ok())
}

/// A listing fetched in full (up to the page cap).
#[derive(Debug, Clone)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub expires: Option<DateTime<Utc>>,
    pub pages: u32,
    /// More pages existed beyond the page cap.
    pub truncated: bool,
}

impl<T> Listing<T> {
    /// Cache metadata for the listing's first page.
    #[must_use]
    pub fn cache_metadata(&self, now: DateTime<Utc>) -> CacheMetadata {
        CacheMetadata {
            etag: self.etag.clone(),
            last_modified: self.last_modified.clone(),
            expires: self.expires,
            last_refresh: now,
        }
    }
}

/// Result of a conditional listing fetch.
#[derive(Debug, Clone)]
pub enum FetchResult<T> {
    /// The first page returned 304; the listing is unchanged.
    NotModified,
    Fetched(Listing<T>),
}

/// Build the route for one page of a listing.
#[must_use]
pub fn page_route(path: &str, per_page: u32, page: u32) -> String {
    let separator = if path.contains('?') { '&' } else { '?' };
    format!("{path}{separator}per_page={per_page}&page={page}")
}

impl GitHubClient {
    /// Fetch every page of a listing, sending page 1 conditionally.
    ///
    /// At most `max_pages` pages are fetched.
    pub async fn fetch_listing<T: DeserializeOwned>(
        &self,
        path: &str,
        token: &AccessToken,
        cache: Option<&CacheMetadata>,
        per_page: u32,
        max_pages: u32,
    ) -> Result<FetchResult<T>, ClientError> {
        let first = self
            .request::<Vec<T>>(
                HttpMethod::Get,
                &page_route(path, per_page, 1),
                token,
                cache,
            )
            .await?;

        if first.is_not_modified() {
            tracing::debug!(path, "Listing not modified");
            return Ok(FetchResult::NotModified);
        }

        let mut listing = Listing {
            items: first.result.unwrap_or_default(),
            etag: first.etag,
            last_modified: first.last_modified,
            expires: first.expires,
            pages: 1,
            truncated: false,
        };

        let mut next = first.pagination.and_then(|p| p.next_page);
        while let Some(page) = next {
            if listing.pages >= max_pages {
                listing.truncated = true;
                tracing::debug!(path, max_pages, "Listing truncated at page cap");
                break;
            }

            let response = self
                .request::<Vec<T>>(
                    HttpMethod::Get,
                    &page_route(path, per_page, page),
                    token,
                    None,
                )
                .await?;
            listing.items.extend(response.result.unwrap_or_default());
            listing.pages += 1;
            next = response.pagination.and_then(|p| p.next_page);
        }

        Ok(FetchResult::Fetched(listing))
    }
}
