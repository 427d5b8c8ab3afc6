//! # Execution Logs Endpoint Handler
//!
//! This module contains the handler for the GET /logs endpoint, which lists the
//! tenant's execution log entries newest first with cursor pagination.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::auth::{OperatorAuth, TenantExtension};
use crate::cursor::decode_cursor;
use crate::error::ApiError;
use crate::models::{LogStatus, TriggerType, execution_log};
use crate::repositories::ExecutionLogRepository;
use crate::repositories::execution_log::{LogListFilter, MAX_LOG_PAGE};
use crate::server::AppState;

/// Query parameters for listing execution logs
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListLogsQuery {
    /// Filter by status (`running`, `success`, `failed`, `cancelled`)
    pub status: Option<String>,
    /// Filter by job name, e.g. `sales-sync`
    pub job_name: Option<String>,
    /// Only entries started at or after this timestamp (RFC3339)
    pub started_after: Option<String>,
    /// Only entries started before this timestamp (RFC3339)
    pub started_before: Option<String>,
    /// Maximum number of entries to return (default: 50, max: 200)
    pub limit: Option<u64>,
    /// Opaque cursor for pagination continuation
    pub cursor: Option<String>,
}

/// Execution log entry for API responses
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ExecutionLogInfo {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: Uuid,
    #[schema(example = "sales-sync")]
    pub job_name: String,
    pub trigger: TriggerType,
    pub data_type: Option<String>,
    pub sync_job_id: Option<Uuid>,
    pub status: LogStatus,
    #[schema(example = "2026-01-15T10:30:00Z")]
    pub started_at: String,
    pub finished_at: Option<String>,
    pub duration_ms: Option<i64>,
    pub pages_read: i32,
    pub items_read: i64,
    pub items_written: i64,
    pub new_count: i64,
    pub updated_count: i64,
    pub error_count: i64,
    pub message: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub error_details: Option<JsonValue>,
}

impl From<execution_log::Model> for ExecutionLogInfo {
    fn from(model: execution_log::Model) -> Self {
        Self {
            id: model.id,
            job_name: model.job_name,
            trigger: model.trigger_type,
            data_type: model.data_type,
            sync_job_id: model.sync_job_id,
            status: model.status,
            started_at: model.started_at.to_rfc3339(),
            finished_at: model.finished_at.map(|dt| dt.to_rfc3339()),
            duration_ms: model.duration_ms,
            pages_read: model.pages_read,
            items_read: model.items_read,
            items_written: model.items_written,
            new_count: model.new_count,
            updated_count: model.updated_count,
            error_count: model.error_count,
            message: model.message,
            error_details: model.error_details,
        }
    }
}

/// Response payload for logs endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LogsResponse {
    pub logs: Vec<ExecutionLogInfo>,
    /// Opaque cursor for fetching the next page (null if this is the last page)
    pub next_cursor: Option<String>,
}

fn parse_timestamp(field: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, ApiError> {
    raw.map(|value| {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| {
                ApiError::new(
                    StatusCode::BAD_REQUEST,
                    "VALIDATION_FAILED",
                    format!("{field} must be a valid RFC3339 timestamp"),
                )
            })
    })
    .transpose()
}

/// List execution logs with filters and cursor pagination
#[utoipa::path(
    get,
    path = "/logs",
    security(("bearer_auth" = [])),
    params(ListLogsQuery, crate::auth::TenantHeader),
    responses(
        (status = 200, description = "Execution logs listed successfully", body = LogsResponse),
        (status = 400, description = "Invalid query parameters", body = ApiError, example = json!({
            "status": 400,
            "code": "VALIDATION_FAILED",
            "message": "started_after must be a valid RFC3339 timestamp",
            "trace_id": "corr-12345678"
        })),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "logs"
)]
pub async fn list_logs(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    TenantExtension(tenant): TenantExtension,
    Query(query): Query<ListLogsQuery>,
) -> Result<Json<LogsResponse>, ApiError> {
    let limit = query.limit.unwrap_or(50);
    if limit < 1 || limit > MAX_LOG_PAGE {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            format!("limit must be between 1 and {MAX_LOG_PAGE}"),
        ));
    }

    let status = query
        .status
        .as_deref()
        .map(|raw| {
            raw.parse::<LogStatus>()
                .map_err(|message| ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message))
        })
        .transpose()?;

    let started_after = parse_timestamp("started_after", query.started_after.as_deref())?;
    let started_before = parse_timestamp("started_before", query.started_before.as_deref())?;
    let cursor = query.cursor.as_deref().map(decode_cursor).transpose()?;

    let page = ExecutionLogRepository::new(state.db.clone())
        .list(LogListFilter {
            tenant_id: Some(tenant.0),
            status,
            job_name: query.job_name,
            started_after,
            started_before,
            limit: Some(limit),
            cursor,
        })
        .await?;

    Ok(Json(LogsResponse {
        logs: page.items.into_iter().map(ExecutionLogInfo::from).collect(),
        next_cursor: page.next_cursor,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_must_be_rfc3339() {
        assert!(parse_timestamp("started_after", None).unwrap().is_none());
        assert!(
            parse_timestamp("started_after", Some("2026-01-15T10:30:00Z"))
                .unwrap()
                .is_some()
        );

        let err = parse_timestamp("started_before", Some("yesterday")).unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("started_before"));
    }
}
