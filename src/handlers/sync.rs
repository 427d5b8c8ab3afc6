//! # Sync Trigger Handlers
//!
//! Manual (operator) and scheduled (cron) entry points into the sync engine.

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::json;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::auth::{CronAuth, OperatorAuth, TenantExtension};
use crate::error::{ApiError, not_found, validation_error};
use crate::handlers::types::{CronTriggerResponse, TriggerResponse};
use crate::models::{DataType, SyncStrategy, TriggerType};
use crate::server::AppState;

/// Query parameters for trigger endpoints
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TriggerQuery {
    /// `last_100`, `last_30_days` or `all`
    pub strategy: Option<String>,
    /// Integration to sync; defaults to the tenant's oldest active one
    pub integration_id: Option<Uuid>,
}

pub(crate) fn parse_data_type(raw: &str) -> Result<DataType, ApiError> {
    raw.parse::<DataType>().map_err(|message| {
        validation_error("Invalid data type", json!({ "data_type": message }))
    })
}

fn parse_strategy(raw: Option<&str>, default: SyncStrategy) -> Result<SyncStrategy, ApiError> {
    raw.map_or(Ok(default), |value| {
        value
            .parse::<SyncStrategy>()
            .map_err(|message| validation_error("Invalid strategy", json!({ "strategy": message })))
    })
}

/// Manually trigger a sync for the caller's tenant
///
/// Creates a job (or resumes the active one) and runs it within the invocation
/// budget. A job that does not finish in time is resumed by the next trigger.
#[utoipa::path(
    post,
    path = "/sync/{data_type}",
    security(("bearer_auth" = [])),
    params(
        ("data_type" = String, Path, description = "`products` (alias `offers`) or `sales`"),
        TriggerQuery,
        crate::auth::TenantHeader
    ),
    responses(
        (status = 200, description = "Sync ran; see `success` and `status`", body = TriggerResponse),
        (status = 400, description = "Invalid data type or strategy", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "No matching integration", body = ApiError),
        (status = 409, description = "Job is being processed by another invocation", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn manual_sync(
    State(state): State<AppState>,
    _operator: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(data_type): Path<String>,
    Query(query): Query<TriggerQuery>,
) -> Result<Json<TriggerResponse>, ApiError> {
    let data_type = parse_data_type(&data_type)?;
    let strategy = parse_strategy(query.strategy.as_deref(), SyncStrategy::All)?;

    let integrations = state.orchestrator.executor().integrations();
    let integration = match query.integration_id {
        Some(id) => integrations
            .find_for_tenant(tenant.as_str(), id)
            .await?
            .ok_or_else(|| not_found("integration", &id.to_string()))?,
        None => integrations
            .first_active_for_tenant(tenant.as_str())
            .await?
            .ok_or_else(|| not_found("active integration for tenant", tenant.as_str()))?,
    };

    tracing::info!(
        tenant_id = %tenant.0,
        integration_id = %integration.id,
        data_type = %data_type,
        strategy = %strategy,
        "Manual sync triggered"
    );

    let run = state
        .orchestrator
        .sync_tenant(
            &integration,
            data_type,
            strategy,
            TriggerType::Manual,
            state.config.sync.invocation_budget(),
        )
        .await?;

    Ok(Json(TriggerResponse::from(&run)))
}

/// Scheduled sync across every active integration with the strategy enabled
#[utoipa::path(
    post,
    path = "/cron/sync/{data_type}",
    security(("bearer_auth" = [])),
    params(
        ("data_type" = String, Path, description = "`products` (alias `offers`) or `sales`"),
        ("strategy" = Option<String>, Query, description = "Defaults to `last_100`")
    ),
    responses(
        (status = 200, description = "Per-tenant results", body = CronTriggerResponse),
        (status = 400, description = "Invalid data type or strategy", body = ApiError),
        (status = 401, description = "Missing or invalid cron secret", body = ApiError)
    ),
    tag = "sync"
)]
pub async fn cron_sync(
    State(state): State<AppState>,
    _cron: CronAuth,
    Path(data_type): Path<String>,
    Query(query): Query<TriggerQuery>,
) -> Result<Json<CronTriggerResponse>, ApiError> {
    let data_type = parse_data_type(&data_type)?;
    let strategy = parse_strategy(query.strategy.as_deref(), SyncStrategy::Last100)?;

    let summary = state.orchestrator.run_scheduled(data_type, strategy).await?;

    tracing::info!(
        data_type = %data_type,
        strategy = %strategy,
        succeeded = summary.succeeded,
        failed = summary.failed,
        "Scheduled sync finished"
    );

    Ok(Json(CronTriggerResponse::from(summary)))
}
