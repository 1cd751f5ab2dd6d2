//! Shared fixtures for unit tests.

use std::sync::Arc;

use crate::actor::{SyncContext, UserId};
use crate::cache::{AccessToken, MemoryCacheStore, RateLimitRegistry};
use crate::collab::{MemoryCredentials, MemoryDiagnostics, MemoryEntityStore, NullSink, UpdateSink};
use crate::config::{ClientConfig, EngineConfig};
use crate::github::GitHubClient;
use crate::http::{HttpResponse, MockTransport};

pub const BASE: &str = "https://api.github.test";

pub fn url(path: &str) -> String {
    format!("{BASE}{path}")
}

pub fn response(status: u16, headers: &[(&str, &str)], body: &str) -> HttpResponse {
    HttpResponse {
        status,
        headers: headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        body: body.as_bytes().to_vec(),
    }
}

pub fn engine_config() -> EngineConfig {
    EngineConfig {
        client: ClientConfig {
            base_url: BASE.to_string(),
            retry_min_delay_ms: 10,
            retry_max_delay_ms: 50,
            max_retries: 2,
            ..ClientConfig::default()
        },
        ..EngineConfig::default()
    }
}

/// Collaborators wired to a mock transport, kept reachable for assertions.
pub struct TestEngine {
    pub transport: MockTransport,
    pub budgets: Arc<RateLimitRegistry>,
    pub cache: Arc<MemoryCacheStore>,
    pub store: Arc<MemoryEntityStore>,
    pub credentials: Arc<MemoryCredentials>,
    pub diagnostics: Arc<MemoryDiagnostics>,
    pub sink: Arc<dyn UpdateSink>,
    pub config: EngineConfig,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::with_credentials(MemoryCredentials::from_pairs([(
            UserId(1),
            AccessToken::new("ghp_test_token"),
        )]))
    }

    pub fn with_credentials(credentials: MemoryCredentials) -> Self {
        Self {
            transport: MockTransport::new(),
            budgets: Arc::new(RateLimitRegistry::new()),
            cache: Arc::new(MemoryCacheStore::new()),
            store: Arc::new(MemoryEntityStore::new()),
            credentials: Arc::new(credentials),
            diagnostics: Arc::new(MemoryDiagnostics::new()),
            sink: Arc::new(NullSink),
            config: engine_config(),
        }
    }

    pub fn client(&self) -> GitHubClient {
        GitHubClient::new(
            Arc::new(self.transport.clone()),
            Arc::clone(&self.budgets),
            &self.config.client,
        )
    }

    /// A fresh context over the shared collaborators.
    pub fn context(&self) -> SyncContext {
        SyncContext::new(
            self.client(),
            self.cache.clone(),
            self.store.clone(),
            self.credentials.clone(),
            &self.config,
        )
        .with_sink(Arc::clone(&self.sink))
        .with_diagnostics(self.diagnostics.clone())
    }
}
