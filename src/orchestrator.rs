//! Tenant fan-out
//!
//! Turns a trigger (manual or scheduled) into sync jobs: resolves the strategy
//! into page bounds, creates or resumes the tenant's job and runs it within the
//! invocation budget. Scheduled runs cover every active integration in batches
//! of bounded concurrency with a pause between batches.

use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::MAX_PAGE_SIZE;
use crate::execution_log::{LogCompletion, LogCounters, StartLog};
use crate::marketplace::DateWindow;
use crate::models::integration::Model as IntegrationModel;
use crate::models::{DataType, LogStatus, SyncStrategy, TriggerType};
use crate::repositories::sync_job::CreateJobParams;
use crate::sync_executor::{ChunkCounts, ChunkOutcome, SyncEngineError, SyncExecutor};

/// Days of sales history covered by `last_30_days`.
const RECENT_WINDOW_DAYS: i64 = 30;

/// Page bounds a strategy resolves to for a new job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPlan {
    pub max_pages: Option<u32>,
    pub page_size: u32,
    pub window: Option<DateWindow>,
}

impl SyncPlan {
    pub fn resolve(
        data_type: DataType,
        strategy: SyncStrategy,
        page_size: u32,
        today: NaiveDate,
    ) -> Self {
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        match strategy {
            SyncStrategy::Last100 => Self {
                max_pages: Some(1),
                page_size: MAX_PAGE_SIZE,
                window: None,
            },
            SyncStrategy::Last30Days if data_type == DataType::Sales => Self {
                max_pages: None,
                page_size,
                window: Some(DateWindow {
                    start: today - chrono::Duration::days(RECENT_WINDOW_DAYS),
                    end: today,
                }),
            },
            // Offers carry no date; a recent-window run walks the catalogue
            SyncStrategy::Last30Days | SyncStrategy::All => Self {
                max_pages: None,
                page_size,
                window: None,
            },
        }
    }
}

/// One tenant's job run within an invocation.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TenantRun {
    pub job_id: Uuid,
    /// False when an existing active job was resumed
    pub created: bool,
    pub outcome: ChunkOutcome,
}

/// Per-tenant entry of a fan-out; failures are recorded, not raised.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TenantSyncResult {
    pub tenant_id: String,
    pub integration_id: Uuid,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub pages_processed: u32,
    pub total_processed: u64,
    pub total_new: u64,
    pub total_updated: u64,
    pub total_errors: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TenantSyncResult {
    fn from_run(integration: &IntegrationModel, run: Result<TenantRun, SyncEngineError>) -> Self {
        match run {
            Ok(run) => {
                let chunk = run.outcome.chunk;
                Self {
                    tenant_id: integration.tenant_id.clone(),
                    integration_id: integration.id,
                    success: run.outcome.succeeded(),
                    job_id: Some(run.job_id),
                    status: Some(run.outcome.status.to_string()),
                    pages_processed: chunk.pages,
                    total_processed: chunk.items,
                    total_new: chunk.new,
                    total_updated: chunk.updated,
                    total_errors: chunk.errors,
                    error: run.outcome.error_message(),
                }
            }
            Err(error) => Self {
                tenant_id: integration.tenant_id.clone(),
                integration_id: integration.id,
                success: false,
                job_id: None,
                status: None,
                pages_processed: 0,
                total_processed: 0,
                total_new: 0,
                total_updated: 0,
                total_errors: 0,
                error: Some(error.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FanoutSummary {
    pub data_type: DataType,
    pub strategy: SyncStrategy,
    pub tenants: Vec<TenantSyncResult>,
    pub succeeded: usize,
    pub failed: usize,
    pub totals: ChunkCounts,
}

impl FanoutSummary {
    fn new(data_type: DataType, strategy: SyncStrategy, tenants: Vec<TenantSyncResult>) -> Self {
        let mut totals = ChunkCounts::default();
        for tenant in &tenants {
            totals.pages += tenant.pages_processed;
            totals.items += tenant.total_processed;
            totals.new += tenant.total_new;
            totals.updated += tenant.total_updated;
            totals.errors += tenant.total_errors;
        }
        let succeeded = tenants.iter().filter(|t| t.success).count();
        Self {
            data_type,
            strategy,
            failed: tenants.len() - succeeded,
            succeeded,
            tenants,
            totals,
        }
    }
}

#[derive(Clone)]
pub struct SyncOrchestrator {
    executor: SyncExecutor,
    page_size: u32,
}

impl SyncOrchestrator {
    pub fn new(executor: SyncExecutor, page_size: u32) -> Self {
        Self {
            executor,
            page_size,
        }
    }

    pub fn executor(&self) -> &SyncExecutor {
        &self.executor
    }

    /// Create or resume the tenant's job for `data_type` and run it for up to `budget`.
    #[instrument(
        skip(self, integration),
        fields(tenant_id = %integration.tenant_id, integration_id = %integration.id)
    )]
    pub async fn sync_tenant(
        &self,
        integration: &IntegrationModel,
        data_type: DataType,
        strategy: SyncStrategy,
        trigger: TriggerType,
        budget: Duration,
    ) -> Result<TenantRun, SyncEngineError> {
        let plan = SyncPlan::resolve(data_type, strategy, self.page_size, Utc::now().date_naive());
        let (job, created) = self
            .executor
            .jobs()
            .create_or_resume(CreateJobParams {
                tenant_id: integration.tenant_id.clone(),
                integration_id: integration.id,
                data_type,
                strategy,
                trigger,
                max_pages: plan.max_pages,
                pages_per_chunk: self.executor.config().pages_per_chunk,
                page_size: plan.page_size,
                window: plan.window,
            })
            .await?;

        let outcome = self.executor.run_until_budget(job.id, budget).await?;
        Ok(TenantRun {
            job_id: job.id,
            created,
            outcome,
        })
    }

    /// Sync every integration, `fanout_concurrency` at a time.
    ///
    /// Each tenant gets what is left of the invocation budget when it starts;
    /// a tenant's failure never stops the others.
    pub async fn run_for_integrations(
        &self,
        integrations: Vec<IntegrationModel>,
        data_type: DataType,
        strategy: SyncStrategy,
        trigger: TriggerType,
    ) -> FanoutSummary {
        let config = self.executor.config();
        let deadline = Instant::now() + config.invocation_budget();
        let concurrency = config.fanout_concurrency.max(1);
        let delay = config.fanout_batch_delay();
        let mut results = Vec::with_capacity(integrations.len());

        for (index, batch) in integrations.chunks(concurrency).enumerate() {
            if index > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let mut set = JoinSet::new();
            for integration in batch.iter().cloned() {
                let this = self.clone();
                set.spawn(async move {
                    let budget = deadline.saturating_duration_since(Instant::now());
                    let run = this
                        .sync_tenant(&integration, data_type, strategy, trigger, budget)
                        .await;
                    if let Err(ref error) = run {
                        warn!(
                            tenant_id = %integration.tenant_id,
                            error = %error,
                            "Tenant sync failed"
                        );
                    }
                    TenantSyncResult::from_run(&integration, run)
                });
            }

            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok(result) => results.push(result),
                    Err(join_error) => warn!(error = %join_error, "Tenant sync task aborted"),
                }
            }
        }

        FanoutSummary::new(data_type, strategy, results)
    }

    /// Scheduled trigger: every active integration with `strategy` enabled.
    #[instrument(skip(self))]
    pub async fn run_scheduled(
        &self,
        data_type: DataType,
        strategy: SyncStrategy,
    ) -> Result<FanoutSummary, SyncEngineError> {
        let integrations = self.executor.integrations().list_active(strategy).await?;
        let logger = self.executor.logger();

        let log_id = logger
            .start(StartLog {
                job_name: format!("cron-{}-{}", data_type, strategy),
                trigger: TriggerType::Cron,
                tenant_id: None,
                data_type: Some(data_type),
                sync_job_id: None,
                metadata: Some(json!({ "tenants": integrations.len() })),
            })
            .await;

        info!(tenants = integrations.len(), "Scheduled sync starting");
        let summary = self
            .run_for_integrations(integrations, data_type, strategy, TriggerType::Cron)
            .await;

        let failures: Vec<_> = summary
            .tenants
            .iter()
            .filter(|t| !t.success)
            .map(|t| json!({ "tenant_id": t.tenant_id, "error": t.error }))
            .collect();

        logger
            .complete(
                log_id,
                LogCompletion {
                    status: if summary.failed == 0 {
                        LogStatus::Success
                    } else {
                        LogStatus::Failed
                    },
                    counters: LogCounters {
                        pages_read: summary.totals.pages,
                        items_read: summary.totals.items,
                        items_written: summary.totals.new + summary.totals.updated,
                        new: summary.totals.new,
                        updated: summary.totals.updated,
                        errors: summary.totals.errors,
                    },
                    message: Some(format!(
                        "{} tenant(s) synced, {} failed",
                        summary.succeeded, summary.failed
                    )),
                    error_details: (!failures.is_empty()).then(|| json!(failures)),
                },
            )
            .await;

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn last_100_is_one_full_page() {
        let plan = SyncPlan::resolve(DataType::Products, SyncStrategy::Last100, 20, day(2026, 1, 31));
        assert_eq!(plan.max_pages, Some(1));
        assert_eq!(plan.page_size, 100);
        assert!(plan.window.is_none());
    }

    #[test]
    fn recent_sales_get_a_thirty_day_window() {
        let plan =
            SyncPlan::resolve(DataType::Sales, SyncStrategy::Last30Days, 100, day(2026, 1, 31));
        let window = plan.window.unwrap();
        assert_eq!(window.start, day(2026, 1, 1));
        assert_eq!(window.end, day(2026, 1, 31));
        assert_eq!(plan.max_pages, None);
    }

    #[test]
    fn recent_products_walk_everything() {
        let plan =
            SyncPlan::resolve(DataType::Products, SyncStrategy::Last30Days, 500, day(2026, 1, 31));
        assert!(plan.window.is_none());
        assert_eq!(plan.page_size, 100);
    }
}
