//! Database migrations for the marketsync service.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2026_01_10_000001_create_integrations;
mod m2026_01_10_000002_create_sync_jobs;
mod m2026_01_10_000003_add_sync_job_active_guard;
mod m2026_01_10_000004_create_product_offers;
mod m2026_01_10_000005_create_sales;
mod m2026_01_10_000006_create_execution_logs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_01_10_000001_create_integrations::Migration),
            Box::new(m2026_01_10_000002_create_sync_jobs::Migration),
            Box::new(m2026_01_10_000003_add_sync_job_active_guard::Migration),
            Box::new(m2026_01_10_000004_create_product_offers::Migration),
            Box::new(m2026_01_10_000005_create_sales::Migration),
            Box::new(m2026_01_10_000006_create_execution_logs::Migration),
        ]
    }
}
