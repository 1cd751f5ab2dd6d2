//! Collaborators the engine calls but does not own.
//!
//! Persistence, credential lookup, derived-message delivery and diagnostics
//! are reached through these traits only. In-memory implementations back
//! the CLI and the tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::actor::{EntityId, UserId};
use crate::cache::AccessToken;
use crate::dispatch::QueuedMessage;

/// A refreshed entity document, handed to the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteEntity {
    pub id: EntityId,
    pub document: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store rejected {id}: {message}")]
    Rejected { id: EntityId, message: String },
}

/// Persistence of mirrored entities.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Write the entity's current state. Clears any tombstone.
    async fn persist(&self, entity: RemoteEntity) -> Result<(), StoreError>;

    /// Record that the entity no longer exists upstream.
    async fn tombstone(&self, id: &EntityId) -> Result<(), StoreError>;

    async fn is_tombstoned(&self, id: &EntityId) -> Result<bool, StoreError>;
}

/// Source of access tokens.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Tokens that may be used for background work on `entity`.
    async fn candidates(&self, entity: &EntityId) -> Vec<AccessToken>;

    /// The token of a specific user.
    async fn token_for(&self, user: UserId) -> Option<AccessToken>;

    /// Make a newly discovered token available.
    async fn register(&self, user: UserId, token: AccessToken);

    /// Stop handing out a token the API rejected.
    async fn revoke(&self, token: &AccessToken);
}

#[derive(Debug, Clone, Error)]
pub enum SinkError {
    #[error("Update sink is closed")]
    Closed,

    #[error("Update sink is full")]
    Full,
}

/// Destination for derived update messages.
///
/// Enqueueing never waits: an actor must not block on the queue that may be
/// feeding its own mailbox.
pub trait UpdateSink: Send + Sync {
    fn enqueue(&self, message: QueuedMessage) -> Result<(), SinkError>;
}

/// A permanent failure worth a human's attention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub entity: EntityId,
    /// Last four characters of the credential involved, if any.
    pub credential: Option<String>,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// Sink for permanent failures.
pub trait Diagnostics: Send + Sync {
    fn record(&self, diagnostic: Diagnostic);
}

// ---------- In-memory implementations ----------

#[derive(Debug, Default)]
struct StoreState {
    entities: HashMap<EntityId, RemoteEntity>,
    tombstones: HashSet<EntityId>,
    writes: usize,
}

/// Process-local entity store.
#[derive(Debug, Default)]
pub struct MemoryEntityStore {
    state: Mutex<StoreState>,
}

impl MemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[must_use]
    pub fn get(&self, id: &EntityId) -> Option<RemoteEntity> {
        self.lock().entities.get(id).cloned()
    }

    /// Number of persist and tombstone operations performed.
    #[must_use]
    pub fn writes(&self) -> usize {
        self.lock().writes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entities.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    async fn persist(&self, entity: RemoteEntity) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.tombstones.remove(&entity.id);
        state.entities.insert(entity.id, entity);
        state.writes += 1;
        Ok(())
    }

    async fn tombstone(&self, id: &EntityId) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.entities.remove(id);
        state.tombstones.insert(*id);
        state.writes += 1;
        Ok(())
    }

    async fn is_tombstoned(&self, id: &EntityId) -> Result<bool, StoreError> {
        Ok(self.lock().tombstones.contains(id))
    }
}

#[derive(Debug, Default)]
struct CredentialState {
    by_user: BTreeMap<UserId, AccessToken>,
    revoked: HashSet<AccessToken>,
}

/// Tokens held in memory, keyed by user.
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    state: Mutex<CredentialState>,
}

impl MemoryCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(user, token)` pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (UserId, AccessToken)>) -> Self {
        let credentials = Self::new();
        {
            let mut state = credentials.lock();
            state.by_user.extend(pairs);
        }
        credentials
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CredentialState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[must_use]
    pub fn is_revoked(&self, token: &AccessToken) -> bool {
        self.lock().revoked.contains(token)
    }

    /// Every usable token, in user order.
    #[must_use]
    pub fn tokens(&self) -> Vec<(UserId, AccessToken)> {
        let state = self.lock();
        state
            .by_user
            .iter()
            .filter(|(_, token)| !state.revoked.contains(*token))
            .map(|(user, token)| (*user, token.clone()))
            .collect()
    }
}

#[async_trait]
impl CredentialProvider for MemoryCredentials {
    async fn candidates(&self, _entity: &EntityId) -> Vec<AccessToken> {
        self.tokens().into_iter().map(|(_, token)| token).collect()
    }

    async fn token_for(&self, user: UserId) -> Option<AccessToken> {
        let state = self.lock();
        state
            .by_user
            .get(&user)
            .filter(|token| !state.revoked.contains(*token))
            .cloned()
    }

    async fn register(&self, user: UserId, token: AccessToken) {
        let mut state = self.lock();
        state.revoked.remove(&token);
        state.by_user.insert(user, token);
    }

    async fn revoke(&self, token: &AccessToken) {
        tracing::warn!(token = %token, "Revoking credential");
        self.lock().revoked.insert(token.clone());
    }
}

/// [`UpdateSink`] feeding a bounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<QueuedMessage>,
}

impl ChannelSink {
    /// Create a sink and the receiver that drains it.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<QueuedMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl UpdateSink for ChannelSink {
    fn enqueue(&self, message: QueuedMessage) -> Result<(), SinkError> {
        self.tx.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Sink that drops everything; for one-off syncs without fan-out.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl UpdateSink for NullSink {
    fn enqueue(&self, _message: QueuedMessage) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Diagnostics written to the tracing log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogDiagnostics;

impl Diagnostics for LogDiagnostics {
    fn record(&self, diagnostic: Diagnostic) {
        tracing::warn!(
            entity = %diagnostic.entity,
            credential = diagnostic.credential.as_deref().unwrap_or("-"),
            "Permanent sync failure: {}",
            diagnostic.error
        );
    }
}

/// Diagnostics collected in memory.
#[derive(Debug, Default)]
pub struct MemoryDiagnostics {
    records: Mutex<Vec<Diagnostic>>,
}

impl MemoryDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn records(&self) -> Vec<Diagnostic> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Diagnostics for MemoryDiagnostics {
    fn record(&self, diagnostic: Diagnostic) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(diagnostic);
    }
}
