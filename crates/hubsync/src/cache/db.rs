//! Database-backed cache metadata store.
//!
//! Rows are keyed by (entity kind, entity key, resource, token digest) and
//! written with an upsert, so concurrent writers for different keys never
//! conflict and a repeated write for the same key replaces the row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set, sea_query::OnConflict,
};
use uuid::Uuid;

use crate::entity::cache_metadata::{ActiveModel, Column, Entity as CacheRows, Model};

use super::metadata::{CacheKey, CacheMetadata};
use super::store::{CacheStore, Result};

/// Cache store persisting metadata through sea-orm.
#[derive(Debug, Clone)]
pub struct DbCacheStore {
    db: DatabaseConnection,
}

impl DbCacheStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn find(&self, key: &CacheKey) -> Result<Option<Model>> {
        let row = CacheRows::find()
            .filter(Column::EntityKind.eq(key.entity.kind.as_str()))
            .filter(Column::EntityKey.eq(key.entity.key.to_string()))
            .filter(Column::Resource.eq(key.resource))
            .filter(Column::TokenDigest.eq(key.token.digest()))
            .one(&self.db)
            .await?;
        Ok(row)
    }
}

impl From<Model> for CacheMetadata {
    fn from(row: Model) -> Self {
        Self {
            etag: row.etag,
            last_modified: row.last_modified,
            expires: row.expires.map(|e| e.with_timezone(&Utc)),
            last_refresh: row.last_refresh.with_timezone(&Utc),
        }
    }
}

fn stored_at(row: &Model) -> DateTime<Utc> {
    row.last_refresh.with_timezone(&Utc)
}

#[async_trait]
impl CacheStore for DbCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheMetadata>> {
        Ok(self.find(key).await?.map(CacheMetadata::from))
    }

    async fn put(&self, key: &CacheKey, metadata: CacheMetadata) -> Result<bool> {
        if let Some(existing) = self.find(key).await?
            && stored_at(&existing) > metadata.last_refresh
        {
            tracing::debug!(entity = %key.entity, "Skipping stale cache write");
            return Ok(false);
        }

        let model = ActiveModel {
            id: Set(Uuid::new_v4()),
            entity_kind: Set(key.entity.kind.as_str().to_string()),
            entity_key: Set(key.entity.key.to_string()),
            resource: Set(key.resource),
            token_digest: Set(key.token.digest()),
            etag: Set(metadata.etag),
            last_modified: Set(metadata.last_modified),
            expires: Set(metadata.expires.map(|e| e.fixed_offset())),
            last_refresh: Set(metadata.last_refresh.fixed_offset()),
        };

        CacheRows::insert(model)
            .on_conflict(
                OnConflict::columns([
                    Column::EntityKind,
                    Column::EntityKey,
                    Column::Resource,
                    Column::TokenDigest,
                ])
                .update_columns([
                    Column::Etag,
                    Column::LastModified,
                    Column::Expires,
                    Column::LastRefresh,
                ])
                .to_owned(),
            )
            .exec(&self.db)
            .await?;

        Ok(true)
    }
}
