//! # marketsync Main Entry Point
//!
//! Loads configuration, prepares the database and serves the HTTP API.

use std::sync::Arc;

use marketsync::{
    config::ConfigLoader,
    db,
    execution_log::DbExecutionLogger,
    server::{AppState, run_server},
    telemetry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from layered env files and variables
    let config = ConfigLoader::new().load()?;
    telemetry::init_tracing(&config)?;

    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        tracing::debug!(config = %redacted_json, "Effective configuration");
    }

    let db = db::init_pool(&config).await?;
    db::run_migrations(&db).await?;

    let logger = Arc::new(DbExecutionLogger::new(db.clone()));
    let state = AppState::new(config, db, logger)?;

    run_server(state).await
}
