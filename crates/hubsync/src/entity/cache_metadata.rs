//! CacheMetadata entity - stores conditional-request validators per entity,
//! sub-resource and credential.
//!
//! The credential is stored as a digest, never in the clear.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Which response of an entity's sync a cache row describes.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum CacheResource {
    /// The entity document itself.
    #[sea_orm(string_value = "entity")]
    Entity,
    /// A repository's issue listing.
    #[sea_orm(string_value = "issues")]
    Issues,
    /// An issue's comment listing.
    #[sea_orm(string_value = "comments")]
    Comments,
    /// An issue's event listing.
    #[sea_orm(string_value = "events")]
    Events,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "cache_metadata")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Entity kind, e.g. "repository".
    pub entity_kind: String,

    /// Entity key, e.g. "42" or "42/139".
    pub entity_key: String,

    pub resource: CacheResource,

    /// Hex SHA-256 digest of the access token.
    pub token_digest: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub etag: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub last_modified: Option<String>,

    pub expires: Option<DateTimeWithTimeZone>,

    /// When the entity was last confirmed current with the remote.
    pub last_refresh: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
