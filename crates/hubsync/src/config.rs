//! Engine configuration.
//!
//! Every tunable the engine uses lives here with an explicit default. The
//! configuration is built once at startup (usually by the CLI, from layered
//! config files and environment variables) and handed to the components that
//! need it; nothing reads configuration lazily at call sites.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;

/// Default GitHub REST API base URL.
pub const DEFAULT_API_BASE_URL: &str = "https://api.github.com";

/// Default `User-Agent` header value.
pub const DEFAULT_USER_AGENT: &str = "hubsync";

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Remote API client settings.
    pub client: ClientConfig,
    /// Entity actor settings.
    pub actors: ActorConfig,
    /// Queue routing and delivery settings.
    pub dispatch: DispatchConfig,
}

/// Remote API client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL every request path is appended to.
    pub base_url: String,
    /// Value of the `User-Agent` header.
    pub user_agent: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Maximum number of redirects followed for a single request.
    pub max_redirects: u32,
    /// How many times a rate-limited (403/429) response is waited out and retried.
    pub rate_limit_retries: u32,
    /// Initial backoff for transport and 5xx retries, in milliseconds.
    pub retry_min_delay_ms: u64,
    /// Backoff ceiling, in milliseconds.
    pub retry_max_delay_ms: u64,
    /// Maximum transport and 5xx retries per request.
    pub max_retries: usize,
    /// Proactive request pacing per process. `None` disables pacing.
    pub requests_per_second: Option<u32>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout_secs: 30,
            max_redirects: 3,
            rate_limit_retries: 2,
            retry_min_delay_ms: 250,
            retry_max_delay_ms: 30_000,
            max_retries: 4,
            requests_per_second: None,
        }
    }
}

impl ClientConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Backoff settings for transport and server-error retries.
    #[must_use]
    pub fn retry(&self) -> RetryConfig {
        RetryConfig::new(
            Duration::from_millis(self.retry_min_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
            self.max_retries,
        )
    }
}

/// Entity actor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActorConfig {
    /// Capacity of each of an actor's two mailboxes.
    pub mailbox_capacity: usize,
    /// Seconds an actor with empty mailboxes stays alive before tearing down.
    pub idle_timeout_secs: u64,
    /// Maximum number of sync procedures running at once, across all actors.
    pub max_concurrent_syncs: usize,
    /// Maximum pages fetched for one sub-collection listing.
    pub max_pages: u32,
    /// Items requested per listing page.
    pub per_page: u32,
    /// Maximum derived update messages a single sync may enqueue.
    pub max_fanout: usize,
    /// Skip the network entirely while a cached `Expires` lies in the future.
    pub honor_expires: bool,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 64,
            idle_timeout_secs: 300,
            max_concurrent_syncs: 16,
            max_pages: 10,
            per_page: 100,
            max_fanout: 100,
            honor_expires: true,
        }
    }
}

impl ActorConfig {
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

/// Queue routing and delivery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Prefix of discovery ("spider") queue names.
    pub spider_prefix: String,
    /// Prefix of refresh ("update") queue names.
    pub update_prefix: String,
    /// Deliveries of one message before a transient failure is dead-lettered.
    pub max_delivery_attempts: u32,
    /// Seconds a processed webhook delivery id is remembered.
    pub delivery_retention_secs: u64,
    /// Maximum number of remembered delivery ids.
    pub delivery_capacity: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            spider_prefix: "spider-".to_string(),
            update_prefix: "update-".to_string(),
            max_delivery_attempts: 5,
            delivery_retention_secs: 24 * 60 * 60,
            delivery_capacity: 100_000,
        }
    }
}

impl DispatchConfig {
    #[must_use]
    pub fn delivery_retention(&self) -> Duration {
        Duration::from_secs(self.delivery_retention_secs)
    }
}
