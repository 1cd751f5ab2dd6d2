use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actor::EntityId;
use crate::github::ApiResponse;

use super::budget::AccessToken;

pub use crate::entity::cache_metadata::CacheResource;

impl CacheResource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CacheResource::Entity => "entity",
            CacheResource::Issues => "issues",
            CacheResource::Comments => "comments",
            CacheResource::Events => "events",
        }
    }
}

/// Lookup key of one cache record.
///
/// Validators are tracked per credential because the same resource can
/// render differently (and carry a different ETag) depending on who asks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub entity: EntityId,
    pub resource: CacheResource,
    pub token: AccessToken,
}

impl CacheKey {
    #[must_use]
    pub fn new(entity: EntityId, resource: CacheResource, token: AccessToken) -> Self {
        Self {
            entity,
            resource,
            token,
        }
    }
}

/// Conditional-request state for one cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub expires: Option<DateTime<Utc>>,
    /// When the remote last confirmed this state, by a 200 or a 304.
    pub last_refresh: DateTime<Utc>,
}

impl CacheMetadata {
    /// Metadata for a freshly received 2xx response.
    #[must_use]
    pub fn from_response<T>(response: &ApiResponse<T>, now: DateTime<Utc>) -> Self {
        Self {
            etag: response.etag.clone(),
            last_modified: response.last_modified.clone(),
            expires: response.expires,
            last_refresh: now,
        }
    }

    /// The same validators, confirmed current at `now` by a not-modified response.
    #[must_use]
    pub fn revalidated(&self, now: DateTime<Utc>) -> Self {
        Self {
            last_refresh: self.last_refresh.max(now),
            ..self.clone()
        }
    }

    /// Whether a request can be made conditional with these validators.
    #[must_use]
    pub fn has_validators(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }

    /// Whether the response is still within its advertised freshness lifetime.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|expires| now < expires)
    }
}
