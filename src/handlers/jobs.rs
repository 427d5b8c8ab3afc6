//! # Jobs API Handlers
//!
//! Inspect, advance and cancel the caller's sync jobs.

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{OperatorAuth, TenantExtension};
use crate::error::{ApiError, not_found, validation_error};
use crate::handlers::sync::parse_data_type;
use crate::models::{DataType, JobStatus, SyncStrategy, TriggerType, sync_job};
use crate::repositories::sync_job::JobListFilter;
use crate::server::AppState;
use crate::sync_executor::ChunkOutcome;

const DEFAULT_JOB_LIMIT: u64 = 50;
const MAX_JOB_LIMIT: u64 = 100;

/// Query parameters for listing jobs
#[derive(Debug, Deserialize)]
pub struct ListJobsQuery {
    /// Filter by job status
    pub status: Option<String>,
    /// Filter by data type (`products` or `sales`)
    pub data_type: Option<String>,
    /// Maximum number of jobs to return (default: 50, max: 100)
    pub limit: Option<u64>,
}

/// Job information response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobInfo {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: Uuid,
    pub integration_id: Uuid,
    pub data_type: DataType,
    pub strategy: SyncStrategy,
    pub trigger: TriggerType,
    pub status: JobStatus,
    /// Next page to fetch
    #[schema(example = 3)]
    pub cursor: i32,
    pub total_pages: Option<i32>,
    pub max_pages: Option<i32>,
    pub pages_done: i32,
    pub items_processed: i64,
    pub total_new: i64,
    pub total_updated: i64,
    pub total_skipped: i64,
    pub total_errors: i64,
    pub retry_count: i32,
    #[schema(value_type = Option<Object>)]
    pub error: Option<JsonValue>,
    #[schema(example = "2026-01-15T10:30:00Z")]
    pub created_at: String,
    pub started_at: Option<String>,
    pub last_processed_at: Option<String>,
    pub completed_at: Option<String>,
}

impl From<sync_job::Model> for JobInfo {
    fn from(model: sync_job::Model) -> Self {
        Self {
            id: model.id,
            integration_id: model.integration_id,
            data_type: model.data_type,
            strategy: model.strategy,
            trigger: model.trigger_type,
            status: model.status,
            cursor: model.cursor,
            total_pages: model.total_pages,
            max_pages: model.max_pages,
            pages_done: model.pages_done,
            items_processed: model.items_processed,
            total_new: model.total_new,
            total_updated: model.total_updated,
            total_skipped: model.total_skipped,
            total_errors: model.total_errors,
            retry_count: model.retry_count,
            error: model.error,
            created_at: model.created_at.to_rfc3339(),
            started_at: model.started_at.map(|dt| dt.to_rfc3339()),
            last_processed_at: model.last_processed_at.map(|dt| dt.to_rfc3339()),
            completed_at: model.completed_at.map(|dt| dt.to_rfc3339()),
        }
    }
}

/// Response payload for jobs listing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct JobsResponse {
    pub jobs: Vec<JobInfo>,
}

/// List the tenant's jobs, newest first
#[utoipa::path(
    get,
    path = "/jobs",
    security(("bearer_auth" = [])),
    params(
        ("status" = Option<JobStatus>, Query, description = "Filter by job status"),
        ("data_type" = Option<String>, Query, description = "Filter by data type"),
        ("limit" = Option<u64>, Query, description = "Maximum number of jobs to return (default 50, max 100)"),
        crate::auth::TenantHeader
    ),
    responses(
        (status = 200, description = "Jobs for the tenant", body = JobsResponse),
        (status = 400, description = "Invalid query parameters", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn list_jobs(
    State(state): State<AppState>,
    _operator: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Query(params): Query<ListJobsQuery>,
) -> Result<Json<JobsResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_JOB_LIMIT);
    if limit == 0 || limit > MAX_JOB_LIMIT {
        return Err(validation_error(
            "Invalid limit",
            json!({ "limit": format!("Must be between 1 and {MAX_JOB_LIMIT}") }),
        ));
    }

    let status = params
        .status
        .as_deref()
        .map(|raw| {
            raw.parse::<JobStatus>()
                .map_err(|message| validation_error("Invalid status", json!({ "status": message })))
        })
        .transpose()?;
    let data_type = params.data_type.as_deref().map(parse_data_type).transpose()?;

    let jobs = state
        .orchestrator
        .executor()
        .jobs()
        .list(JobListFilter {
            tenant_id: Some(tenant.0),
            status,
            data_type,
            limit: Some(limit),
        })
        .await?;

    Ok(Json(JobsResponse {
        jobs: jobs.into_iter().map(JobInfo::from).collect(),
    }))
}

/// Fetch one of the tenant's jobs
#[utoipa::path(
    get,
    path = "/jobs/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Job id"), crate::auth::TenantHeader),
    responses(
        (status = 200, description = "Job detail", body = JobInfo),
        (status = 404, description = "Job not found for this tenant", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<AppState>,
    _operator: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(id): Path<Uuid>,
) -> Result<Json<JobInfo>, ApiError> {
    let job = state
        .orchestrator
        .executor()
        .jobs()
        .find_by_tenant(tenant.as_str(), id)
        .await?
        .ok_or_else(|| not_found("sync job", &id.to_string()))?;

    Ok(Json(job.into()))
}

/// Process exactly one chunk of a job
#[utoipa::path(
    post,
    path = "/jobs/{id}/process",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Job id"), crate::auth::TenantHeader),
    responses(
        (status = 200, description = "Chunk outcome", body = ChunkOutcome),
        (status = 404, description = "Job not found for this tenant", body = ApiError),
        (status = 409, description = "Job is being processed by another invocation", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn process_job(
    State(state): State<AppState>,
    _operator: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(id): Path<Uuid>,
) -> Result<Json<ChunkOutcome>, ApiError> {
    let executor = state.orchestrator.executor();
    executor
        .jobs()
        .find_by_tenant(tenant.as_str(), id)
        .await?
        .ok_or_else(|| not_found("sync job", &id.to_string()))?;

    let outcome = executor.process_chunk(id).await?;
    Ok(Json(outcome))
}

/// Cancel a job; a running chunk stops at its next page boundary
#[utoipa::path(
    post,
    path = "/jobs/{id}/cancel",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Job id"), crate::auth::TenantHeader),
    responses(
        (status = 200, description = "Cancelled job", body = JobInfo),
        (status = 404, description = "Job not found for this tenant", body = ApiError),
        (status = 409, description = "Job already finished", body = ApiError)
    ),
    tag = "jobs"
)]
pub async fn cancel_job(
    State(state): State<AppState>,
    _operator: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Path(id): Path<Uuid>,
) -> Result<Json<JobInfo>, ApiError> {
    let job = state
        .orchestrator
        .executor()
        .jobs()
        .cancel(tenant.as_str(), id)
        .await?;

    tracing::info!(job_id = %id, tenant_id = %tenant.0, "Sync job cancelled by operator");
    Ok(Json(job.into()))
}
