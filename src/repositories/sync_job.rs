//! # SyncJob Repository
//!
//! Persistent job state store. All writes that race with other invocations are
//! conditional updates (`UPDATE ... WHERE`) checked by rows affected:
//!
//! - `claim` only succeeds while no unexpired lease exists,
//! - `advance` is a check-and-set on `(id, lease_token, cursor, status)`,
//! - status changes are validated against [`JobStatus::can_transition_to`] and
//!   applied with the observed status in the `WHERE` clause.

use std::time::Duration;

use chrono::Utc;
use sea_orm::sea_query::{Expr, Func, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, Value,
};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use crate::error::is_unique_violation;
use crate::marketplace::DateWindow;
use crate::models::sync_job::{ActiveModel, Column, Entity, Model};
use crate::models::{DataType, JobStatus, SyncStrategy, TriggerType};

/// Optimistic status updates give up after this many lost races.
const TRANSITION_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("sync job {0} not found")]
    NotFound(Uuid),
    #[error("illegal job transition {from} -> {to}")]
    IllegalTransition { from: JobStatus, to: JobStatus },
    #[error("lease on sync job {0} was lost")]
    LeaseLost(Uuid),
    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

/// Parameters for a new job (ignored when an active job already exists).
#[derive(Debug, Clone)]
pub struct CreateJobParams {
    pub tenant_id: String,
    pub integration_id: Uuid,
    pub data_type: DataType,
    pub strategy: SyncStrategy,
    pub trigger: TriggerType,
    pub max_pages: Option<u32>,
    pub pages_per_chunk: u32,
    pub page_size: u32,
    pub window: Option<DateWindow>,
}

/// Proof that the holder may advance a job until `ttl` elapses without progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lease {
    pub job_id: Uuid,
    pub token: Uuid,
    pub ttl: Duration,
}

#[derive(Debug, Clone)]
pub enum Claim {
    Claimed { lease: Lease, job: Model },
    /// Job already finished; nothing to do
    Terminal(Model),
    /// Another invocation holds an unexpired lease
    Busy,
}

/// Outcome of one successfully processed page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageProgress {
    /// Cursor the caller read the page at; the write fails if it moved
    pub expected_cursor: i32,
    pub next_cursor: i32,
    pub total_pages: Option<i32>,
    pub items: i64,
    pub new: i64,
    pub updated: i64,
    pub skipped: i64,
    pub errors: i64,
}

#[derive(Debug, Clone, Default)]
pub struct JobListFilter {
    pub tenant_id: Option<String>,
    pub status: Option<JobStatus>,
    pub data_type: Option<DataType>,
    pub limit: Option<u64>,
}

/// Repository for sync job database operations
pub struct SyncJobRepository {
    db: DatabaseConnection,
}

impl SyncJobRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Return the active job for `(tenant, data_type)` or create a pending one.
    ///
    /// The boolean is `true` when a new job was inserted. A racing insert that
    /// loses on the partial unique index resolves to the winner's job.
    pub async fn create_or_resume(
        &self,
        params: CreateJobParams,
    ) -> Result<(Model, bool), JobStoreError> {
        if let Some(active) = self.find_active(&params.tenant_id, params.data_type).await? {
            tracing::info!(
                job_id = %active.id,
                tenant_id = %active.tenant_id,
                data_type = %active.data_type,
                cursor = active.cursor,
                "Resuming active sync job"
            );
            return Ok((active, false));
        }

        let now = Utc::now().fixed_offset();
        let job = ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(params.tenant_id.clone()),
            integration_id: Set(params.integration_id),
            data_type: Set(params.data_type),
            strategy: Set(params.strategy),
            trigger_type: Set(params.trigger),
            status: Set(JobStatus::Pending),
            cursor: Set(1),
            total_pages: Set(None),
            max_pages: Set(params.max_pages.map(to_i32)),
            pages_per_chunk: Set(to_i32(params.pages_per_chunk.max(1))),
            page_size: Set(to_i32(params.page_size)),
            pages_done: Set(0),
            items_processed: Set(0),
            total_new: Set(0),
            total_updated: Set(0),
            total_skipped: Set(0),
            total_errors: Set(0),
            retry_count: Set(0),
            window_start: Set(params.window.map(|w| w.start)),
            window_end: Set(params.window.map(|w| w.end)),
            lease_token: Set(None),
            lease_expires_at: Set(None),
            error: Set(None),
            started_at: Set(None),
            last_processed_at: Set(None),
            completed_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match job.insert(&self.db).await {
            Ok(created) => {
                tracing::info!(
                    job_id = %created.id,
                    tenant_id = %created.tenant_id,
                    data_type = %created.data_type,
                    strategy = %created.strategy,
                    "Sync job created"
                );
                Ok((created, true))
            }
            Err(e) if is_unique_violation(&e) => {
                tracing::debug!(
                    tenant_id = %params.tenant_id,
                    data_type = %params.data_type,
                    "Lost create race, resuming the winner's job"
                );
                match self.find_active(&params.tenant_id, params.data_type).await? {
                    Some(active) => Ok((active, false)),
                    None => Err(JobStoreError::Database(e)),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find(&self, job_id: Uuid) -> Result<Option<Model>, JobStoreError> {
        Ok(Entity::find_by_id(job_id).one(&self.db).await?)
    }

    async fn get(&self, job_id: Uuid) -> Result<Model, JobStoreError> {
        self.find(job_id)
            .await?
            .ok_or(JobStoreError::NotFound(job_id))
    }

    /// Find a sync job by ID, ensuring it belongs to the specified tenant
    pub async fn find_by_tenant(
        &self,
        tenant_id: &str,
        job_id: Uuid,
    ) -> Result<Option<Model>, JobStoreError> {
        Ok(Entity::find_by_id(job_id)
            .filter(Column::TenantId.eq(tenant_id))
            .one(&self.db)
            .await?)
    }

    pub async fn find_active(
        &self,
        tenant_id: &str,
        data_type: DataType,
    ) -> Result<Option<Model>, JobStoreError> {
        Ok(Entity::find()
            .filter(Column::TenantId.eq(tenant_id))
            .filter(Column::DataType.eq(data_type.as_str()))
            .filter(Column::Status.is_in(JobStatus::ACTIVE.map(|s| s.as_str())))
            .order_by_asc(Column::CreatedAt)
            .one(&self.db)
            .await?)
    }

    /// Newest jobs first.
    pub async fn list(&self, filter: JobListFilter) -> Result<Vec<Model>, JobStoreError> {
        let mut query = Entity::find().order_by_desc(Column::CreatedAt);

        if let Some(tenant_id) = filter.tenant_id {
            query = query.filter(Column::TenantId.eq(tenant_id));
        }
        if let Some(status) = filter.status {
            query = query.filter(Column::Status.eq(status.as_str()));
        }
        if let Some(data_type) = filter.data_type {
            query = query.filter(Column::DataType.eq(data_type.as_str()));
        }
        if let Some(limit) = filter.limit {
            query = query.limit(limit);
        }

        Ok(query.all(&self.db).await?)
    }

    /// Take the job's lease for `lease_ttl`.
    ///
    /// Moves `pending` to `in_progress` and stamps `started_at` on first claim.
    pub async fn claim(&self, job_id: Uuid, lease_ttl: Duration) -> Result<Claim, JobStoreError> {
        let now = Utc::now().fixed_offset();
        let token = Uuid::new_v4();

        let result = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::InProgress.as_str()))
            .col_expr(Column::LeaseToken, Expr::value(token))
            .col_expr(Column::LeaseExpiresAt, Expr::value(now + chrono_ttl(lease_ttl)))
            .col_expr(
                Column::StartedAt,
                Func::coalesce([
                    SimpleExpr::from(Expr::col(Column::StartedAt)),
                    Expr::value(now),
                ])
                .into(),
            )
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.is_in(JobStatus::ACTIVE.map(|s| s.as_str())))
            .filter(
                Condition::any()
                    .add(Column::LeaseToken.is_null())
                    .add(Column::LeaseExpiresAt.is_null())
                    .add(Column::LeaseExpiresAt.lt(now)),
            )
            .exec(&self.db)
            .await?;

        let job = self.get(job_id).await?;

        if result.rows_affected == 1 {
            tracing::debug!(job_id = %job_id, lease = %token, "Sync job lease acquired");
            return Ok(Claim::Claimed {
                lease: Lease {
                    job_id,
                    token,
                    ttl: lease_ttl,
                },
                job,
            });
        }

        if job.status.is_terminal() {
            Ok(Claim::Terminal(job))
        } else {
            Ok(Claim::Busy)
        }
    }

    /// Persist one page of progress and extend the lease.
    ///
    /// Fails with [`JobStoreError::LeaseLost`] when the lease was taken over, the
    /// cursor moved, or the job left `in_progress` (e.g. was cancelled).
    pub async fn advance(
        &self,
        lease: &Lease,
        progress: PageProgress,
    ) -> Result<Model, JobStoreError> {
        let now = Utc::now().fixed_offset();

        let mut update = Entity::update_many()
            .col_expr(Column::Cursor, Expr::value(progress.next_cursor))
            .col_expr(Column::PagesDone, Expr::col(Column::PagesDone).add(1))
            .col_expr(
                Column::ItemsProcessed,
                Expr::col(Column::ItemsProcessed).add(progress.items),
            )
            .col_expr(Column::TotalNew, Expr::col(Column::TotalNew).add(progress.new))
            .col_expr(
                Column::TotalUpdated,
                Expr::col(Column::TotalUpdated).add(progress.updated),
            )
            .col_expr(
                Column::TotalSkipped,
                Expr::col(Column::TotalSkipped).add(progress.skipped),
            )
            .col_expr(
                Column::TotalErrors,
                Expr::col(Column::TotalErrors).add(progress.errors),
            )
            .col_expr(Column::RetryCount, Expr::value(0))
            .col_expr(Column::Error, Expr::value(Value::Json(None)))
            .col_expr(Column::LastProcessedAt, Expr::value(now))
            .col_expr(Column::LeaseExpiresAt, Expr::value(now + chrono_ttl(lease.ttl)))
            .col_expr(Column::UpdatedAt, Expr::value(now));

        if let Some(total) = progress.total_pages {
            update = update.col_expr(Column::TotalPages, Expr::value(total));
        }

        let result = update
            .filter(Column::Id.eq(lease.job_id))
            .filter(Column::LeaseToken.eq(lease.token))
            .filter(Column::Cursor.eq(progress.expected_cursor))
            .filter(Column::Status.eq(JobStatus::InProgress.as_str()))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            tracing::warn!(
                job_id = %lease.job_id,
                cursor = progress.expected_cursor,
                "Cursor advance rejected, lease lost"
            );
            return Err(JobStoreError::LeaseLost(lease.job_id));
        }

        self.get(lease.job_id).await
    }

    /// Move the leased job to a terminal status.
    pub async fn finish(
        &self,
        lease: &Lease,
        to: JobStatus,
        error: Option<JsonValue>,
    ) -> Result<Model, JobStoreError> {
        if !JobStatus::InProgress.can_transition_to(to) || !to.is_terminal() {
            return Err(JobStoreError::IllegalTransition {
                from: JobStatus::InProgress,
                to,
            });
        }

        let now = Utc::now().fixed_offset();
        let mut update = terminal_update(to, now);
        if let Some(error) = error {
            update = update.col_expr(Column::Error, Expr::value(error));
        }

        let result = update
            .filter(Column::Id.eq(lease.job_id))
            .filter(Column::LeaseToken.eq(lease.token))
            .filter(Column::Status.eq(JobStatus::InProgress.as_str()))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(JobStoreError::LeaseLost(lease.job_id));
        }

        log_terminal(lease.job_id, to);
        self.get(lease.job_id).await
    }

    /// Validated status change without a lease (operator actions).
    pub async fn transition(
        &self,
        job_id: Uuid,
        to: JobStatus,
        error: Option<JsonValue>,
    ) -> Result<Model, JobStoreError> {
        for _ in 0..TRANSITION_ATTEMPTS {
            let current = self.get(job_id).await?;
            if !current.status.can_transition_to(to) {
                return Err(JobStoreError::IllegalTransition {
                    from: current.status,
                    to,
                });
            }

            let now = Utc::now().fixed_offset();
            let mut update = if to.is_terminal() {
                terminal_update(to, now)
            } else {
                Entity::update_many()
                    .col_expr(Column::Status, Expr::value(to.as_str()))
                    .col_expr(Column::UpdatedAt, Expr::value(now))
            };
            if let Some(ref error) = error {
                update = update.col_expr(Column::Error, Expr::value(error.clone()));
            }

            let result = update
                .filter(Column::Id.eq(job_id))
                .filter(Column::Status.eq(current.status.as_str()))
                .exec(&self.db)
                .await?;

            if result.rows_affected == 1 {
                if to.is_terminal() {
                    log_terminal(job_id, to);
                }
                return self.get(job_id).await;
            }
        }

        Err(JobStoreError::LeaseLost(job_id))
    }

    /// Record a retryable chunk failure, keeping the cursor.
    ///
    /// Increments `retry_count`; once it reaches `max_retries` the job is
    /// failed, otherwise it stays `in_progress` with the lease released.
    pub async fn record_chunk_failure(
        &self,
        lease: &Lease,
        error: JsonValue,
        max_retries: u32,
    ) -> Result<JobStatus, JobStoreError> {
        let job = Entity::find_by_id(lease.job_id)
            .filter(Column::LeaseToken.eq(lease.token))
            .one(&self.db)
            .await?
            .ok_or(JobStoreError::LeaseLost(lease.job_id))?;

        let retries = job.retry_count + 1;
        let exhausted = retries >= to_i32(max_retries);
        let now = Utc::now().fixed_offset();

        let update = if exhausted {
            terminal_update(JobStatus::Failed, now)
        } else {
            Entity::update_many()
                .col_expr(Column::LeaseToken, Expr::value(Value::Uuid(None)))
                .col_expr(
                    Column::LeaseExpiresAt,
                    Expr::value(Value::ChronoDateTimeWithTimeZone(None)),
                )
                .col_expr(Column::UpdatedAt, Expr::value(now))
        };

        let result = update
            .col_expr(Column::RetryCount, Expr::value(retries))
            .col_expr(Column::Error, Expr::value(error))
            .filter(Column::Id.eq(lease.job_id))
            .filter(Column::LeaseToken.eq(lease.token))
            .filter(Column::Status.eq(JobStatus::InProgress.as_str()))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(JobStoreError::LeaseLost(lease.job_id));
        }

        if exhausted {
            log_terminal(lease.job_id, JobStatus::Failed);
            Ok(JobStatus::Failed)
        } else {
            tracing::info!(
                job_id = %lease.job_id,
                retry_count = retries,
                max_retries,
                "Chunk failed, job will be retried from the same cursor"
            );
            Ok(JobStatus::InProgress)
        }
    }

    /// Drop the lease after a chunk. A lease already gone is not an error.
    pub async fn release(&self, lease: &Lease) -> Result<(), JobStoreError> {
        Entity::update_many()
            .col_expr(Column::LeaseToken, Expr::value(Value::Uuid(None)))
            .col_expr(
                Column::LeaseExpiresAt,
                Expr::value(Value::ChronoDateTimeWithTimeZone(None)),
            )
            .filter(Column::Id.eq(lease.job_id))
            .filter(Column::LeaseToken.eq(lease.token))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Out-of-band cancellation, observed by a running chunk at its next page boundary.
    pub async fn cancel(&self, tenant_id: &str, job_id: Uuid) -> Result<Model, JobStoreError> {
        self.find_by_tenant(tenant_id, job_id)
            .await?
            .ok_or(JobStoreError::NotFound(job_id))?;
        self.transition(job_id, JobStatus::Cancelled, None).await
    }
}

/// Status change to a terminal state: stamps `completed_at` and clears the lease.
fn terminal_update(
    to: JobStatus,
    now: sea_orm::prelude::DateTimeWithTimeZone,
) -> sea_orm::UpdateMany<Entity> {
    Entity::update_many()
        .col_expr(Column::Status, Expr::value(to.as_str()))
        .col_expr(Column::CompletedAt, Expr::value(now))
        .col_expr(Column::LeaseToken, Expr::value(Value::Uuid(None)))
        .col_expr(
            Column::LeaseExpiresAt,
            Expr::value(Value::ChronoDateTimeWithTimeZone(None)),
        )
        .col_expr(Column::UpdatedAt, Expr::value(now))
}

fn log_terminal(job_id: Uuid, status: JobStatus) {
    metrics::counter!(
        crate::telemetry::metric_names::JOBS_FINISHED,
        "status" => status.as_str()
    )
    .increment(1);
    tracing::info!(job_id = %job_id, status = %status, "Sync job finished");
}

fn chrono_ttl(ttl: Duration) -> chrono::Duration {
    chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(5))
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}
