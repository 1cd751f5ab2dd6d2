//! SeaORM entity definitions for the hubsync database schema.

pub mod cache_metadata;
