//! Routing of queued messages to entity actors.
//!
//! The queue name decides how a message body is decoded; the decoded value
//! names exactly one actor (or, for rate-limit snapshots, one credential's
//! budget). Routing is deterministic, so a redelivered message reaches the
//! same actor and that actor's delivery log suppresses the repeat.

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::actor::{ActorRegistry, EntityId, EntityKind, IdError, SyncError, UpdateOutcome};
use crate::cache::AccessToken;
use crate::config::DispatchConfig;

use super::message::{EntityTarget, QueuedMessage, RateLimitSnapshot, TokenDiscovery, UpdateMessage};
use super::queue::{QueueError, QueueKind, QueueTable, SpiderKind, UpdateKind};

/// Where a message goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Actor(EntityId),
    /// A rate-limit snapshot for one credential.
    Budget(AccessToken),
}

/// What the queue should do with a message after dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Acked,
    /// Already processed; acknowledge without effects.
    Duplicate,
    /// Transient failure; deliver again later.
    Retry { reason: String },
    /// Transient failure with no attempts left.
    DeadLetter { reason: String },
    /// Permanent failure or malformed message; do not deliver again.
    Rejected { reason: String },
}

impl DispatchOutcome {
    /// Whether the message can be removed from its queue.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Retry { .. })
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Malformed message on {queue}: {message}")]
    Malformed { queue: String, message: String },

    #[error(transparent)]
    Id(#[from] IdError),
}

enum Decoded {
    Entity {
        id: EntityId,
        message: UpdateMessage<EntityTarget>,
    },
    Token {
        id: EntityId,
        message: UpdateMessage<TokenDiscovery>,
    },
    RateLimit(RateLimitSnapshot),
}

impl Decoded {
    fn route(&self) -> Route {
        match self {
            Decoded::Entity { id, .. } | Decoded::Token { id, .. } => Route::Actor(*id),
            Decoded::RateLimit(snapshot) => Route::Budget(snapshot.access_token.clone()),
        }
    }
}

/// Routes queued messages into an [`ActorRegistry`].
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: ActorRegistry,
    queues: QueueTable,
    max_attempts: u32,
}

impl Dispatcher {
    pub fn new(registry: ActorRegistry, config: &DispatchConfig) -> Self {
        Self {
            queues: registry.context().queues.clone(),
            registry,
            max_attempts: config.max_delivery_attempts.max(1),
        }
    }

    pub fn registry(&self) -> &ActorRegistry {
        &self.registry
    }

    pub fn queues(&self) -> &QueueTable {
        &self.queues
    }

    /// Resolve the target of a message without acting on it.
    pub fn route(&self, queue: &str, body: &Value) -> Result<Route, DispatchError> {
        Ok(self.decode(queue, body)?.route())
    }

    /// Process one message and tell the queue what to do with it.
    pub async fn dispatch(&self, message: &QueuedMessage) -> DispatchOutcome {
        let decoded = match self.decode(&message.queue, &message.body) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::warn!(queue = %message.queue, error = %e, "Rejecting undeliverable message");
                return DispatchOutcome::Rejected {
                    reason: e.to_string(),
                };
            }
        };

        let result = match decoded {
            Decoded::Entity { id, message } => self.registry.get(id).handle_update(message).await,
            Decoded::Token { id, message } => self.discover_token(id, message).await,
            Decoded::RateLimit(snapshot) => {
                let budgets = self.registry.context().client.budgets();
                if !budgets.learn(&snapshot.access_token, snapshot.budget()) {
                    tracing::debug!(token = %snapshot.access_token, "Relayed rate limit not newer, ignored");
                }
                return DispatchOutcome::Acked;
            }
        };

        match result {
            Ok(UpdateOutcome::Duplicate) => DispatchOutcome::Duplicate,
            Ok(_) => DispatchOutcome::Acked,
            Err(e) => self.classify(message, &e),
        }
    }

    fn classify(&self, message: &QueuedMessage, error: &SyncError) -> DispatchOutcome {
        let reason = error.to_string();
        if error.is_permanent() {
            tracing::warn!(queue = %message.queue, error = %reason, "Message rejected");
            return DispatchOutcome::Rejected { reason };
        }
        if message.attempt >= self.max_attempts {
            tracing::warn!(
                queue = %message.queue,
                attempt = message.attempt,
                error = %reason,
                "Retry budget exhausted, dead-lettering"
            );
            return DispatchOutcome::DeadLetter { reason };
        }
        tracing::debug!(queue = %message.queue, attempt = message.attempt, error = %reason, "Transient failure, will retry");
        DispatchOutcome::Retry { reason }
    }

    /// Register a newly seen token, then refresh its owner's account with it.
    async fn discover_token(
        &self,
        account: EntityId,
        message: UpdateMessage<TokenDiscovery>,
    ) -> Result<UpdateOutcome, SyncError> {
        let UpdateMessage {
            webhook_metadata,
            value: discovery,
            ..
        } = message;
        self.registry
            .context()
            .credentials
            .register(discovery.user_id, discovery.access_token.clone())
            .await;
        tracing::info!(user = %discovery.user_id, token = %discovery.access_token, "Registered access token");

        let mut update =
            UpdateMessage::new(EntityTarget::for_entity(&account)).with_token(discovery.access_token);
        update.webhook_metadata = webhook_metadata;
        self.registry.get(account).handle_update(update).await
    }

    fn decode(&self, queue: &str, body: &Value) -> Result<Decoded, DispatchError> {
        match self.queues.resolve(queue)? {
            QueueKind::Spider(SpiderKind::AccessToken) => {
                let message: UpdateMessage<TokenDiscovery> = parse(queue, body)?;
                let id = EntityId::account(message.value.user_id.0);
                Ok(Decoded::Token { id, message })
            }
            QueueKind::Spider(SpiderKind::User | SpiderKind::Organization) => {
                self.decode_entity(queue, body, EntityKind::Account)
            }
            QueueKind::Update(UpdateKind::RateLimit) => {
                let message: UpdateMessage<RateLimitSnapshot> = parse(queue, body)?;
                Ok(Decoded::RateLimit(message.value))
            }
            QueueKind::Update(kind) => match kind.entity_kind() {
                Some(entity_kind) => self.decode_entity(queue, body, entity_kind),
                None => Err(QueueError::UnknownQueue(queue.to_string()).into()),
            },
        }
    }

    fn decode_entity(
        &self,
        queue: &str,
        body: &Value,
        kind: EntityKind,
    ) -> Result<Decoded, DispatchError> {
        let message: UpdateMessage<EntityTarget> = parse(queue, body)?;
        let id = message.value.entity_id(kind)?;
        Ok(Decoded::Entity { id, message })
    }
}

fn parse<T: DeserializeOwned>(queue: &str, body: &Value) -> Result<T, DispatchError> {
    T::deserialize(body).map_err(|e| DispatchError::Malformed {
        queue: queue.to_string(),
        message: e.to_string(),
    })
}
