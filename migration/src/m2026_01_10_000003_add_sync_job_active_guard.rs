//! Adds a partial unique index allowing at most one active job per tenant and data type.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::{DatabaseBackend, Statement};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let backend = manager.get_database_backend();
        let sql = match backend {
            DatabaseBackend::Postgres => {
                "DO $$\nBEGIN\n    IF NOT EXISTS (\n        SELECT 1 FROM pg_indexes\n        WHERE schemaname = current_schema()\n          AND indexname = 'idx_sync_jobs_active_per_type'\n    ) THEN\n        CREATE UNIQUE INDEX idx_sync_jobs_active_per_type\n            ON sync_jobs (tenant_id, data_type)\n            WHERE status IN ('pending','in_progress');\n    END IF;\nEND\n$$;"
            }
            _ => {
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_jobs_active_per_type \
                 ON sync_jobs (tenant_id, data_type) \
                 WHERE status IN ('pending','in_progress')"
            }
        };

        manager
            .get_connection()
            .execute(Statement::from_string(backend, sql.to_string()))
            .await
            .map(|_| ())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "DROP INDEX IF EXISTS idx_sync_jobs_active_per_type",
            ))
            .await
            .map(|_| ())
    }
}
