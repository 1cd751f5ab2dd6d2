//! Entity identity.
//!
//! An [`EntityId`] names exactly one mirrored remote resource and therefore
//! exactly one actor. Repository-scoped entities are keyed by their parent
//! repository's numeric id, which survives renames and transfers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The fixed set of mirrored entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    Account,
    Repository,
    Issue,
    Comment,
    Milestone,
    Event,
    Webhook,
}

impl EntityKind {
    pub const ALL: [EntityKind; 7] = [
        EntityKind::Account,
        EntityKind::Repository,
        EntityKind::Issue,
        EntityKind::Comment,
        EntityKind::Milestone,
        EntityKind::Event,
        EntityKind::Webhook,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Account => "account",
            EntityKind::Repository => "repository",
            EntityKind::Issue => "issue",
            EntityKind::Comment => "comment",
            EntityKind::Milestone => "milestone",
            EntityKind::Event => "event",
            EntityKind::Webhook => "webhook",
        }
    }

    /// Whether entities of this kind live inside a repository.
    #[must_use]
    pub fn is_repository_scoped(self) -> bool {
        !matches!(self, EntityKind::Account | EntityKind::Repository)
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| IdError::UnknownKind(s.to_string()))
    }
}

/// Kind-specific key of an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityKey {
    /// Globally unique numeric id (accounts, repositories).
    Id(i64),
    /// Number or id within a repository.
    Scoped { repository_id: i64, id: i64 },
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKey::Id(id) => write!(f, "{id}"),
            EntityKey::Scoped { repository_id, id } => write!(f, "{repository_id}/{id}"),
        }
    }
}

impl FromStr for EntityKey {
    type Err = IdError;

    /// Parses `42` or `42/139`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| {
            part.trim()
                .parse::<i64>()
                .map_err(|_| IdError::InvalidKey(s.to_string()))
        };
        match s.split_once('/') {
            Some((repository_id, id)) => Ok(EntityKey::Scoped {
                repository_id: parse(repository_id)?,
                id: parse(id)?,
            }),
            None => Ok(EntityKey::Id(parse(s)?)),
        }
    }
}

/// Identity of one mirrored entity, and of the actor that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    pub kind: EntityKind,
    pub key: EntityKey,
}

impl EntityId {
    /// Build an id, checking that the key shape matches the kind.
    pub fn new(kind: EntityKind, key: EntityKey) -> Result<Self, IdError> {
        match (kind.is_repository_scoped(), key) {
            (false, EntityKey::Id(_)) | (true, EntityKey::Scoped { .. }) => Ok(Self { kind, key }),
            _ => Err(IdError::KeyShape { kind, key }),
        }
    }

    #[must_use]
    pub fn account(id: i64) -> Self {
        Self {
            kind: EntityKind::Account,
            key: EntityKey::Id(id),
        }
    }

    #[must_use]
    pub fn repository(id: i64) -> Self {
        Self {
            kind: EntityKind::Repository,
            key: EntityKey::Id(id),
        }
    }

    #[must_use]
    pub fn issue(repository_id: i64, number: i64) -> Self {
        Self::scoped(EntityKind::Issue, repository_id, number)
    }

    #[must_use]
    pub fn comment(repository_id: i64, id: i64) -> Self {
        Self::scoped(EntityKind::Comment, repository_id, id)
    }

    #[must_use]
    pub fn milestone(repository_id: i64, number: i64) -> Self {
        Self::scoped(EntityKind::Milestone, repository_id, number)
    }

    #[must_use]
    pub fn event(repository_id: i64, id: i64) -> Self {
        Self::scoped(EntityKind::Event, repository_id, id)
    }

    #[must_use]
    pub fn webhook(repository_id: i64, id: i64) -> Self {
        Self::scoped(EntityKind::Webhook, repository_id, id)
    }

    fn scoped(kind: EntityKind, repository_id: i64, id: i64) -> Self {
        Self {
            kind,
            key: EntityKey::Scoped { repository_id, id },
        }
    }

    /// REST path of the entity itself.
    #[must_use]
    pub fn path(&self) -> String {
        match (self.kind, self.key) {
            (EntityKind::Account, key) => format!("/user/{key}"),
            (EntityKind::Repository, key) => format!("/repositories/{key}"),
            (kind, EntityKey::Scoped { repository_id, id }) => {
                let tail = match kind {
                    EntityKind::Issue => "issues",
                    EntityKind::Comment => "issues/comments",
                    EntityKind::Milestone => "milestones",
                    EntityKind::Event => "issues/events",
                    _ => "hooks",
                };
                format!("/repositories/{repository_id}/{tail}/{id}")
            }
            (_, EntityKey::Id(id)) => format!("/repositories/{id}"),
        }
    }

    /// The repository this entity belongs to, if any.
    #[must_use]
    pub fn repository_id(&self) -> Option<i64> {
        match (self.kind, self.key) {
            (EntityKind::Repository, EntityKey::Id(id)) => Some(id),
            (_, EntityKey::Scoped { repository_id, .. }) => Some(repository_id),
            _ => None,
        }
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

/// Numeric id of a GitHub user acting through the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("unknown entity kind: {0}")]
    UnknownKind(String),

    #[error("invalid entity key: {0}")]
    InvalidKey(String),

    #[error("key {key} does not identify a {kind}")]
    KeyShape { kind: EntityKind, key: EntityKey },
}
