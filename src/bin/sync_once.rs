//! Run one sync for a tenant from the command line using the same engine as the
//! HTTP triggers. Prints the run outcome as JSON.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use marketsync::{
    config::ConfigLoader,
    db,
    execution_log::{DbExecutionLogger, ExecutionLogger, NoopExecutionLogger},
    models::{DataType, SyncStrategy, TriggerType},
    server::AppState,
    telemetry,
};
use uuid::Uuid;

#[derive(Parser)]
#[command(author, version, about = "Run a single marketsync sync invocation")]
struct Args {
    /// Data type to sync (`products`, `offers` or `sales`)
    data_type: DataType,

    /// Tenant whose integration is used
    #[arg(long)]
    tenant: String,

    /// `last_100`, `last_30_days` or `all`
    #[arg(long, default_value = "all")]
    strategy: SyncStrategy,

    /// Integration to use; defaults to the tenant's oldest active one
    #[arg(long)]
    integration_id: Option<Uuid>,

    /// Override the configured invocation budget, in seconds
    #[arg(long)]
    budget_secs: Option<u64>,

    /// Skip writing execution log entries
    #[arg(long)]
    no_log: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing tracing")?;

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;
    db::run_migrations(&db).await?;

    let logger: Arc<dyn ExecutionLogger> = if args.no_log {
        Arc::new(NoopExecutionLogger)
    } else {
        Arc::new(DbExecutionLogger::new(db.clone()))
    };

    let state = AppState::new(config, db, logger)?;
    let budget = args
        .budget_secs
        .map(Duration::from_secs)
        .unwrap_or_else(|| state.config.sync.invocation_budget());

    let integrations = state.orchestrator.executor().integrations();
    let integration = match args.integration_id {
        Some(id) => integrations
            .find_for_tenant(&args.tenant, id)
            .await
            .context("looking up integration")?
            .ok_or_else(|| anyhow!("integration {id} not found for tenant {}", args.tenant))?,
        None => integrations
            .first_active_for_tenant(&args.tenant)
            .await
            .context("looking up integration")?
            .ok_or_else(|| anyhow!("tenant {} has no active integration", args.tenant))?,
    };

    let run = state
        .orchestrator
        .sync_tenant(
            &integration,
            args.data_type,
            args.strategy,
            TriggerType::Manual,
            budget,
        )
        .await
        .context("running sync")?;

    println!("{}", serde_json::to_string_pretty(&run)?);
    Ok(())
}
