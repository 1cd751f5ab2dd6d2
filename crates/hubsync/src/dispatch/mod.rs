//! Queue routing: message envelope, queue names, delivery dedup and the
//! dispatcher that ties them to the actor registry.

pub mod dedup;
pub mod dispatcher;
pub mod message;
pub mod queue;

pub use dedup::DeliveryLog;
pub use dispatcher::{DispatchError, DispatchOutcome, Dispatcher, Route};
pub use message::{
    EntityTarget, MessageCacheMetadata, QueuedMessage, RateLimitSnapshot, TokenDiscovery,
    UpdateMessage, WebhookMetadata,
};
pub use queue::{QueueError, QueueKind, QueueTable, SpiderKind, UpdateKind};
