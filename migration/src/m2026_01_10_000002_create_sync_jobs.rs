//! Migration to create the sync_jobs table.
//!
//! A sync job is the resumable state of one paginated walk over the marketplace API
//! for a tenant and data type: cursor, counters, lease and lifecycle timestamps.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncJobs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SyncJobs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(SyncJobs::TenantId).text().not_null())
                    .col(ColumnDef::new(SyncJobs::IntegrationId).uuid().not_null())
                    .col(ColumnDef::new(SyncJobs::DataType).text().not_null())
                    .col(ColumnDef::new(SyncJobs::Strategy).text().not_null())
                    .col(ColumnDef::new(SyncJobs::TriggerType).text().not_null())
                    .col(
                        ColumnDef::new(SyncJobs::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::Cursor)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(ColumnDef::new(SyncJobs::TotalPages).integer().null())
                    .col(ColumnDef::new(SyncJobs::MaxPages).integer().null())
                    .col(ColumnDef::new(SyncJobs::PagesPerChunk).integer().not_null())
                    .col(ColumnDef::new(SyncJobs::PageSize).integer().not_null())
                    .col(counter(SyncJobs::PagesDone))
                    .col(counter_big(SyncJobs::ItemsProcessed))
                    .col(counter_big(SyncJobs::TotalNew))
                    .col(counter_big(SyncJobs::TotalUpdated))
                    .col(counter_big(SyncJobs::TotalSkipped))
                    .col(counter_big(SyncJobs::TotalErrors))
                    .col(counter(SyncJobs::RetryCount))
                    .col(ColumnDef::new(SyncJobs::WindowStart).date().null())
                    .col(ColumnDef::new(SyncJobs::WindowEnd).date().null())
                    .col(ColumnDef::new(SyncJobs::LeaseToken).uuid().null())
                    .col(
                        ColumnDef::new(SyncJobs::LeaseExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(SyncJobs::Error).json_binary().null())
                    .col(
                        ColumnDef::new(SyncJobs::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::LastProcessedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sync_jobs_integration_id")
                            .from(SyncJobs::Table, SyncJobs::IntegrationId)
                            .to(Integrations::Table, Integrations::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // Tenant job listings, newest first
        manager
            .create_index(
                Index::create()
                    .name("idx_sync_jobs_tenant_created")
                    .table(SyncJobs::Table)
                    .col(SyncJobs::TenantId)
                    .col(SyncJobs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sync_jobs_tenant_type_status")
                    .table(SyncJobs::Table)
                    .col(SyncJobs::TenantId)
                    .col(SyncJobs::DataType)
                    .col(SyncJobs::Status)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_sync_jobs_tenant_type_status")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_index(Index::drop().name("idx_sync_jobs_tenant_created").to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(SyncJobs::Table).to_owned())
            .await
    }
}

fn counter(col: SyncJobs) -> ColumnDef {
    ColumnDef::new(col).integer().not_null().default(0).to_owned()
}

fn counter_big(col: SyncJobs) -> ColumnDef {
    ColumnDef::new(col).big_integer().not_null().default(0).to_owned()
}

#[derive(DeriveIden)]
enum SyncJobs {
    Table,
    Id,
    TenantId,
    IntegrationId,
    DataType,
    Strategy,
    TriggerType,
    Status,
    Cursor,
    TotalPages,
    MaxPages,
    PagesPerChunk,
    PageSize,
    PagesDone,
    ItemsProcessed,
    TotalNew,
    TotalUpdated,
    TotalSkipped,
    TotalErrors,
    RetryCount,
    WindowStart,
    WindowEnd,
    LeaseToken,
    LeaseExpiresAt,
    Error,
    StartedAt,
    LastProcessedAt,
    CompletedAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Integrations {
    Table,
    Id,
}
