//! Entity actors: one serialized execution context per mirrored entity.

pub mod entity;
pub mod error;
pub mod id;
pub mod registry;

pub use entity::{CredentialChoice, SyncContext, SyncOutcome};
pub use error::SyncError;
pub use id::{EntityId, EntityKey, EntityKind, IdError, UserId};
pub use registry::{ActorRef, ActorRegistry, ActorState, SyncResult, UpdateOutcome};
