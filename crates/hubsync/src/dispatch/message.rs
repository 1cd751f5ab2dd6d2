//! Queue message envelope.
//!
//! Messages are JSON with PascalCase keys:
//!
//! ```json
//! {
//!   "CacheMetadata": {"AccessToken": "...", "ETag": "...", "LastModified": null, "Expires": null},
//!   "WebhookMetadata": {"HookId": 1, "DeliveryId": "...", "Event": "issues"},
//!   "Value": {"RepositoryId": 42, "Number": 139}
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actor::{EntityId, EntityKey, EntityKind, IdError, UserId};
use crate::cache::{AccessToken, RateLimitBudget};

/// Envelope of every queued update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateMessage<T> {
    #[serde(default)]
    pub cache_metadata: Option<MessageCacheMetadata>,
    #[serde(default)]
    pub webhook_metadata: Option<WebhookMetadata>,
    pub value: T,
}

impl<T> UpdateMessage<T> {
    pub fn new(value: T) -> Self {
        Self {
            cache_metadata: None,
            webhook_metadata: None,
            value,
        }
    }

    #[must_use]
    pub fn with_token(mut self, token: AccessToken) -> Self {
        self.cache_metadata = Some(MessageCacheMetadata::for_token(token));
        self
    }

    #[must_use]
    pub fn with_webhook(mut self, webhook: WebhookMetadata) -> Self {
        self.webhook_metadata = Some(webhook);
        self
    }

    /// Webhook delivery id, when the message came from a webhook.
    #[must_use]
    pub fn delivery_id(&self) -> Option<&str> {
        self.webhook_metadata
            .as_ref()
            .map(|w| w.delivery_id.as_str())
    }

    /// The credential the producer suggests for this update.
    #[must_use]
    pub fn token(&self) -> Option<&AccessToken> {
        self.cache_metadata.as_ref().map(|c| &c.access_token)
    }
}

/// Caching and rate-limit state relayed by the producer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MessageCacheMetadata {
    pub access_token: AccessToken,
    #[serde(rename = "ETag", default)]
    pub etag: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_remaining: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_reset: Option<DateTime<Utc>>,
}

impl MessageCacheMetadata {
    #[must_use]
    pub fn for_token(access_token: AccessToken) -> Self {
        Self {
            access_token,
            etag: None,
            last_modified: None,
            expires: None,
            rate_limit: None,
            rate_limit_remaining: None,
            rate_limit_reset: None,
        }
    }

    /// The relayed budget, when all three rate-limit fields are present.
    #[must_use]
    pub fn rate_limit_snapshot(&self) -> Option<RateLimitBudget> {
        Some(RateLimitBudget {
            limit: self.rate_limit?,
            remaining: self.rate_limit_remaining?,
            reset: self.rate_limit_reset?,
        })
    }
}

/// Identity of a webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WebhookMetadata {
    pub hook_id: i64,
    pub delivery_id: String,
    pub event: String,
}

/// Value of messages on entity queues.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct EntityTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository_id: Option<i64>,
    /// Entity id, or the issue/milestone number.
    #[serde(alias = "Number")]
    pub id: i64,
    /// Webhook action, e.g. `"deleted"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Entity document carried by the webhook.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl EntityTarget {
    /// A bare target naming `entity`.
    #[must_use]
    pub fn for_entity(entity: &EntityId) -> Self {
        let (repository_id, id) = match entity.key {
            EntityKey::Id(id) => (None, id),
            EntityKey::Scoped { repository_id, id } => (Some(repository_id), id),
        };
        Self {
            repository_id,
            id,
            action: None,
            payload: None,
        }
    }

    /// Resolve the target to an entity of `kind`.
    pub fn entity_id(&self, kind: EntityKind) -> Result<EntityId, IdError> {
        let key = if kind.is_repository_scoped() {
            let repository_id = self
                .repository_id
                .ok_or_else(|| IdError::InvalidKey(format!("{kind} {} without RepositoryId", self.id)))?;
            EntityKey::Scoped {
                repository_id,
                id: self.id,
            }
        } else {
            EntityKey::Id(self.id)
        };
        EntityId::new(kind, key)
    }

    #[must_use]
    pub fn is_deletion(&self) -> bool {
        self.action.as_deref() == Some("deleted")
    }
}

/// Value of messages on the access-token discovery queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TokenDiscovery {
    pub access_token: AccessToken,
    pub user_id: UserId,
}

/// Value of messages on the rate-limit queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RateLimitSnapshot {
    pub access_token: AccessToken,
    pub rate_limit: u32,
    pub rate_limit_remaining: u32,
    pub rate_limit_reset: DateTime<Utc>,
}

impl RateLimitSnapshot {
    #[must_use]
    pub fn budget(&self) -> RateLimitBudget {
        RateLimitBudget {
            limit: self.rate_limit,
            remaining: self.rate_limit_remaining,
            reset: self.rate_limit_reset,
        }
    }
}

/// A message as it sits on a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMessage {
    pub queue: String,
    #[serde(rename = "message")]
    pub body: serde_json::Value,
    /// 1 on first delivery.
    #[serde(default = "first_attempt")]
    pub attempt: u32,
}

fn first_attempt() -> u32 {
    1
}

impl QueuedMessage {
    pub fn new(queue: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            queue: queue.into(),
            body,
            attempt: 1,
        }
    }

    /// The same message, redelivered.
    #[must_use]
    pub fn redelivery(&self) -> Self {
        Self {
            attempt: self.attempt.saturating_add(1),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_envelope_parses_pascal_case_keys() {
        let body = json!({
            "CacheMetadata": {
                "AccessToken": "ghp_abcd",
                "ETag": "\"E1\"",
                "LastModified": null,
                "Expires": null,
                "RateLimit": 5000,
                "RateLimitRemaining": 10,
                "RateLimitReset": "2033-05-18T03:33:20Z"
            },
            "WebhookMetadata": {"HookId": 7, "DeliveryId": "D1", "Event": "issues"},
            "Value": {"RepositoryId": 42, "Number": 139, "Action": "edited"}
        });

        let message: UpdateMessage<EntityTarget> =
            serde_json::from_value(body).expect("envelope should parse");
        assert_eq!(message.delivery_id(), Some("D1"));
        assert_eq!(message.token().map(AccessToken::fingerprint), Some("abcd".to_string()));
        assert_eq!(message.value.id, 139);
        assert_eq!(
            message.value.entity_id(EntityKind::Issue),
            Ok(EntityId::issue(42, 139))
        );

        let snapshot = message
            .cache_metadata
            .and_then(|c| c.rate_limit_snapshot())
            .expect("snapshot");
        assert_eq!(snapshot.remaining, 10);
        assert_eq!(snapshot.reset.timestamp(), 2_000_000_000);
    }

    #[test]
    fn test_envelope_optional_sections_default_to_none() {
        let message: UpdateMessage<EntityTarget> =
            serde_json::from_value(json!({"Value": {"Id": 5}})).expect("parse");
        assert_eq!(message.cache_metadata, None);
        assert_eq!(message.webhook_metadata, None);
        assert_eq!(
            message.value.entity_id(EntityKind::Repository),
            Ok(EntityId::repository(5))
        );
    }

    #[test]
    fn test_scoped_target_requires_repository_id() {
        let target = EntityTarget {
            repository_id: None,
            id: 1,
            action: None,
            payload: None,
        };
        assert!(target.entity_id(EntityKind::Comment).is_err());
    }

    #[test]
    fn test_for_entity_round_trips_through_entity_id() {
        let issue = EntityId::issue(42, 139);
        let target = EntityTarget::for_entity(&issue);
        assert_eq!(target.entity_id(EntityKind::Issue), Ok(issue));

        let serialized = serde_json::to_value(UpdateMessage::new(target)).expect("serialize");
        assert_eq!(serialized["Value"], json!({"RepositoryId": 42, "Id": 139}));
    }

    #[test]
    fn test_deletion_action() {
        let mut target = EntityTarget::for_entity(&EntityId::comment(1, 2));
        assert!(!target.is_deletion());
        target.action = Some("deleted".to_string());
        assert!(target.is_deletion());
    }

    #[test]
    fn test_queued_message_defaults_attempt_and_redelivers() {
        let queued: QueuedMessage = serde_json::from_value(json!({
            "queue": "update-issue",
            "message": {"Value": {"RepositoryId": 1, "Id": 2}}
        }))
        .expect("queued message");
        assert_eq!(queued.attempt, 1);
        assert_eq!(queued.redelivery().attempt, 2);
    }
}
