//! # Common API Types
//!
//! Response shapes of the trigger endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::JobStatus;
use crate::orchestrator::{FanoutSummary, TenantRun, TenantSyncResult};

/// Result of a manual trigger. Counts cover this invocation only.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    pub total_processed: u64,
    pub total_new: u64,
    pub total_updated: u64,
    pub total_errors: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&TenantRun> for TriggerResponse {
    fn from(run: &TenantRun) -> Self {
        let outcome = &run.outcome;
        Self {
            success: outcome.succeeded(),
            job_id: Some(run.job_id),
            status: Some(outcome.status),
            total_processed: outcome.chunk.items,
            total_new: outcome.chunk.new,
            total_updated: outcome.chunk.updated,
            total_errors: outcome.chunk.errors,
            error: outcome.error_message(),
        }
    }
}

/// Result of a scheduled trigger across tenants.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CronTriggerResponse {
    pub success: bool,
    pub total_processed: u64,
    pub total_new: u64,
    pub total_updated: u64,
    pub total_errors: u64,
    pub tenants: Vec<TenantSyncResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<FanoutSummary> for CronTriggerResponse {
    fn from(summary: FanoutSummary) -> Self {
        Self {
            success: summary.failed == 0,
            total_processed: summary.totals.items,
            total_new: summary.totals.new,
            total_updated: summary.totals.updated,
            total_errors: summary.totals.errors,
            error: (summary.failed > 0)
                .then(|| format!("{} of {} tenant(s) failed", summary.failed, summary.tenants.len())),
            tenants: summary.tenants,
        }
    }
}
