//! Shared cache and rate-limit state.
//!
//! Two kinds of state live here: per-credential rate-limit budgets, which
//! many actors share, and per-entity conditional-request metadata, which
//! only the owning actor touches.

pub mod budget;
pub mod db;
pub mod metadata;
pub mod store;

pub use budget::{
    AccessToken, RateLimitBudget, RateLimitRegistry, WorkerSlot, holding_slot, wait_unoccupied,
};
pub use db::DbCacheStore;
pub use metadata::{CacheKey, CacheMetadata, CacheResource};
pub use store::{CacheError, CacheStore, MemoryCacheStore};
