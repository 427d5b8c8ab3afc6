//! Migration to create the execution_logs table.
//!
//! One row per engine invocation (cron fan-out, manual trigger or chunk), written
//! `running` at start and finalized once.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ExecutionLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ExecutionLogs::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ExecutionLogs::JobName).text().not_null())
                    .col(ColumnDef::new(ExecutionLogs::TriggerType).text().not_null())
                    .col(ColumnDef::new(ExecutionLogs::TenantId).text().null())
                    .col(ColumnDef::new(ExecutionLogs::DataType).text().null())
                    .col(ColumnDef::new(ExecutionLogs::SyncJobId).uuid().null())
                    .col(
                        ColumnDef::new(ExecutionLogs::Status)
                            .text()
                            .not_null()
                            .default("running"),
                    )
                    .col(
                        ColumnDef::new(ExecutionLogs::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(ExecutionLogs::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(ExecutionLogs::DurationMs).big_integer().null())
                    .col(
                        ColumnDef::new(ExecutionLogs::PagesRead)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(big_counter(ExecutionLogs::ItemsRead))
                    .col(big_counter(ExecutionLogs::ItemsWritten))
                    .col(big_counter(ExecutionLogs::NewCount))
                    .col(big_counter(ExecutionLogs::UpdatedCount))
                    .col(big_counter(ExecutionLogs::ErrorCount))
                    .col(ColumnDef::new(ExecutionLogs::Message).text().null())
                    .col(ColumnDef::new(ExecutionLogs::ErrorDetails).json_binary().null())
                    .col(ColumnDef::new(ExecutionLogs::Metadata).json_binary().null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_execution_logs_tenant_started")
                    .table(ExecutionLogs::Table)
                    .col(ExecutionLogs::TenantId)
                    .col(ExecutionLogs::StartedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_execution_logs_status_started")
                    .table(ExecutionLogs::Table)
                    .col(ExecutionLogs::Status)
                    .col(ExecutionLogs::StartedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for name in [
            "idx_execution_logs_status_started",
            "idx_execution_logs_tenant_started",
        ] {
            manager
                .drop_index(Index::drop().name(name).to_owned())
                .await?;
        }

        manager
            .drop_table(Table::drop().table(ExecutionLogs::Table).to_owned())
            .await
    }
}

fn big_counter(col: ExecutionLogs) -> ColumnDef {
    ColumnDef::new(col).big_integer().not_null().default(0).to_owned()
}

#[derive(DeriveIden)]
enum ExecutionLogs {
    Table,
    Id,
    JobName,
    TriggerType,
    TenantId,
    DataType,
    SyncJobId,
    Status,
    StartedAt,
    FinishedAt,
    DurationMs,
    PagesRead,
    ItemsRead,
    ItemsWritten,
    NewCount,
    UpdatedCount,
    ErrorCount,
    Message,
    ErrorDetails,
    Metadata,
}
