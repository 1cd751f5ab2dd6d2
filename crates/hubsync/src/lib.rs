//! hubsync - a mirroring engine for the GitHub REST API.
//!
//! The engine keeps a local copy of GitHub entities (accounts, repositories,
//! issues and their comments, events, milestones and webhooks) current while
//! spending as little of each credential's rate-limit budget as possible.
//!
//! - [`github::GitHubClient`] makes conditional requests and feeds every
//!   response into the shared [`cache::RateLimitRegistry`], which gates calls
//!   on exhausted credentials until their window resets.
//! - [`actor::ActorRegistry`] runs one serialized actor per entity, so a
//!   given entity is never synced twice at once.
//! - [`dispatch::Dispatcher`] routes queued update messages to actors and
//!   reports whether each message should be acknowledged, retried or
//!   dead-lettered.
//!
//! # Features
//!
//! - `sqlite` / `postgres` - database backends for [`cache::DbCacheStore`].
//! - `migrate` - Enables database migration support. When enabled, you can use
//!   [`connect_and_migrate`] to create the cache tables on connection.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use hubsync::{ActorRegistry, EngineConfig, EntityId, GitHubClient, SyncContext};
//!
//! let config = EngineConfig::default();
//! let transport = Arc::new(ReqwestTransport::with_timeout(config.client.timeout())?);
//! let client = GitHubClient::new(transport, Arc::new(RateLimitRegistry::new()), &config.client);
//! let registry = ActorRegistry::new(SyncContext::new(client, cache, store, credentials, &config));
//!
//! registry.get(EntityId::repository(42)).sync().await?;
//! ```

pub mod actor;
pub mod cache;
pub mod collab;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod entity;
pub mod github;
pub mod http;
pub mod pacing;
pub mod retry;

#[cfg(feature = "migrate")]
pub mod migration;

#[cfg(test)]
mod test_support;

pub use actor::{
    ActorRef, ActorRegistry, ActorState, CredentialChoice, EntityId, EntityKey, EntityKind,
    SyncContext, SyncError, SyncOutcome, UpdateOutcome, UserId,
};
pub use cache::{
    AccessToken, CacheError, CacheStore, DbCacheStore, MemoryCacheStore, RateLimitBudget,
    RateLimitRegistry,
};
pub use collab::{
    ChannelSink, CredentialProvider, Diagnostics, EntityStore, LogDiagnostics, MemoryCredentials,
    MemoryEntityStore, UpdateSink,
};
pub use config::EngineConfig;
pub use db::connect;
#[cfg(feature = "migrate")]
pub use db::connect_and_migrate;
pub use dispatch::{DispatchOutcome, Dispatcher, QueuedMessage, UpdateMessage};
pub use github::{ClientError, GitHubClient};
pub use http::reqwest_transport::ReqwestTransport;
pub use http::{HttpError, HttpTransport};
