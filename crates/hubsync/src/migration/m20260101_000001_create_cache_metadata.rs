//! Creates the conditional-request cache table.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(CacheMetadata::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CacheMetadata::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(CacheMetadata::EntityKind).string().not_null())
                    .col(ColumnDef::new(CacheMetadata::EntityKey).string().not_null())
                    .col(ColumnDef::new(CacheMetadata::Resource).string().not_null())
                    .col(ColumnDef::new(CacheMetadata::TokenDigest).string().not_null())
                    .col(ColumnDef::new(CacheMetadata::Etag).text().null())
                    .col(ColumnDef::new(CacheMetadata::LastModified).text().null())
                    .col(
                        ColumnDef::new(CacheMetadata::Expires)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CacheMetadata::LastRefresh)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // One row per (entity, resource, credential)
        manager
            .create_index(
                Index::create()
                    .name("idx_cache_metadata_lookup")
                    .table(CacheMetadata::Table)
                    .col(CacheMetadata::EntityKind)
                    .col(CacheMetadata::EntityKey)
                    .col(CacheMetadata::Resource)
                    .col(CacheMetadata::TokenDigest)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(CacheMetadata::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum CacheMetadata {
    Table,
    Id,
    EntityKind,
    EntityKey,
    Resource,
    TokenDigest,
    Etag,
    LastModified,
    Expires,
    LastRefresh,
}
