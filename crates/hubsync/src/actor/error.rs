use thiserror::Error;

use crate::cache::{AccessToken, CacheError};
use crate::collab::StoreError;
use crate::github::ClientError;

use super::id::EntityId;

/// Failure of a sync or update.
///
/// `Clone` so a coalesced result can be handed to every waiting caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Network, server or budget trouble; redelivery may succeed.
    #[error("Transient failure: {0}")]
    Transient(String),

    /// The entity no longer exists upstream.
    #[error("{0} is gone")]
    Gone(EntityId),

    #[error("Credential …{credential} was rejected")]
    Unauthorized { credential: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("No usable credential for {0}")]
    NoCredential(EntityId),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Store error: {0}")]
    Store(String),

    /// The actor's mailbox went away before answering.
    #[error("Actor for {0} stopped")]
    ActorStopped(EntityId),
}

impl SyncError {
    pub(crate) fn from_client(err: ClientError, entity: EntityId, token: &AccessToken) -> Self {
        match err {
            ClientError::Gone { .. } => Self::Gone(entity),
            ClientError::Unauthorized { .. } => Self::Unauthorized {
                credential: token.fingerprint(),
            },
            ClientError::Forbidden { message } => Self::Forbidden(message),
            ClientError::Rejected { .. }
            | ClientError::TooManyRedirects { .. }
            | ClientError::Decode(_) => Self::Rejected(err.to_string()),
            ClientError::Transport(_)
            | ClientError::Server { .. }
            | ClientError::RateLimited { .. } => Self::Transient(err.to_string()),
        }
    }

    /// May succeed if the triggering message is delivered again.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::Store(_) | Self::ActorStopped(_)
        )
    }

    #[inline]
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<CacheError> for SyncError {
    fn from(err: CacheError) -> Self {
        Self::Store(err.to_string())
    }
}
