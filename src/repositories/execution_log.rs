//! Execution log repository
//!
//! Write path for [`crate::execution_log::DbExecutionLogger`] and the read path
//! behind `GET /logs`.

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use crate::cursor::{CursorData, encode_cursor};
use crate::execution_log::{LogCompletion, LogCounters, StartLog};
use crate::models::LogStatus;
use crate::models::execution_log::{ActiveModel, Column, Entity, Model};

pub const DEFAULT_LOG_PAGE: u64 = 50;
pub const MAX_LOG_PAGE: u64 = 200;

#[derive(Debug, Clone, Default)]
pub struct LogListFilter {
    pub tenant_id: Option<String>,
    pub status: Option<LogStatus>,
    pub job_name: Option<String>,
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
    pub limit: Option<u64>,
    pub cursor: Option<CursorData>,
}

#[derive(Debug, Clone)]
pub struct LogPage {
    pub items: Vec<Model>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ExecutionLogRepository {
    db: DatabaseConnection,
}

impl ExecutionLogRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn insert_running(&self, id: Uuid, entry: &StartLog) -> Result<Model, DbErr> {
        ActiveModel {
            id: Set(id),
            job_name: Set(entry.job_name.clone()),
            trigger_type: Set(entry.trigger),
            tenant_id: Set(entry.tenant_id.clone()),
            data_type: Set(entry.data_type.map(|dt| dt.as_str().to_string())),
            sync_job_id: Set(entry.sync_job_id),
            status: Set(LogStatus::Running),
            started_at: Set(Utc::now().fixed_offset()),
            finished_at: Set(None),
            duration_ms: Set(None),
            pages_read: Set(0),
            items_read: Set(0),
            items_written: Set(0),
            new_count: Set(0),
            updated_count: Set(0),
            error_count: Set(0),
            message: Set(None),
            error_details: Set(None),
            metadata: Set(entry.metadata.clone()),
        }
        .insert(&self.db)
        .await
    }

    /// Overwrite running counters. Finalized rows are left untouched.
    pub async fn update_counters(
        &self,
        id: Uuid,
        counters: &LogCounters,
        message: Option<&str>,
    ) -> Result<u64, DbErr> {
        let mut update = counter_update(counters);
        if let Some(message) = message {
            update = update.col_expr(Column::Message, Expr::value(message));
        }

        let result = update
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(LogStatus::Running.as_str()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    /// Finalize a running row exactly once. Returns the rows affected (0 or 1).
    pub async fn finalize(&self, id: Uuid, completion: &LogCompletion) -> Result<u64, DbErr> {
        let Some(row) = Entity::find_by_id(id).one(&self.db).await? else {
            return Ok(0);
        };

        let finished_at = Utc::now().fixed_offset();
        let duration_ms = (finished_at - row.started_at).num_milliseconds().max(0);

        let mut update = counter_update(&completion.counters)
            .col_expr(Column::Status, Expr::value(completion.status.as_str()))
            .col_expr(Column::FinishedAt, Expr::value(finished_at))
            .col_expr(Column::DurationMs, Expr::value(duration_ms));
        if let Some(ref message) = completion.message {
            update = update.col_expr(Column::Message, Expr::value(message.clone()));
        }
        if let Some(ref details) = completion.error_details {
            update = update.col_expr(Column::ErrorDetails, Expr::value(details.clone()));
        }

        let result = update
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(LogStatus::Running.as_str()))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn find(&self, id: Uuid) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(id).one(&self.db).await
    }

    /// Newest first, keyset paginated on `(started_at, id)`.
    pub async fn list(&self, filter: LogListFilter) -> Result<LogPage, DbErr> {
        let limit = filter
            .limit
            .unwrap_or(DEFAULT_LOG_PAGE)
            .clamp(1, MAX_LOG_PAGE);

        let mut query = Entity::find()
            .order_by_desc(Column::StartedAt)
            .order_by_desc(Column::Id);

        if let Some(tenant_id) = filter.tenant_id {
            query = query.filter(Column::TenantId.eq(tenant_id));
        }
        if let Some(status) = filter.status {
            query = query.filter(Column::Status.eq(status.as_str()));
        }
        if let Some(job_name) = filter.job_name {
            query = query.filter(Column::JobName.eq(job_name));
        }
        if let Some(after) = filter.started_after {
            query = query.filter(Column::StartedAt.gte(after.fixed_offset()));
        }
        if let Some(before) = filter.started_before {
            query = query.filter(Column::StartedAt.lt(before.fixed_offset()));
        }
        if let Some(cursor) = filter.cursor {
            let at = cursor.started_at.fixed_offset();
            query = query.filter(
                Condition::any().add(Column::StartedAt.lt(at)).add(
                    Condition::all()
                        .add(Column::StartedAt.eq(at))
                        .add(Column::Id.lt(cursor.id)),
                ),
            );
        }

        let mut items = query.limit(limit + 1).all(&self.db).await?;

        let next_cursor = if items.len() as u64 > limit {
            items.truncate(limit as usize);
            items
                .last()
                .map(|last| encode_cursor(&last.started_at.with_timezone(&Utc), &last.id))
        } else {
            None
        };

        Ok(LogPage { items, next_cursor })
    }
}

fn counter_update(counters: &LogCounters) -> sea_orm::UpdateMany<Entity> {
    Entity::update_many()
        .col_expr(
            Column::PagesRead,
            Expr::value(i32::try_from(counters.pages_read).unwrap_or(i32::MAX)),
        )
        .col_expr(Column::ItemsRead, Expr::value(to_i64(counters.items_read)))
        .col_expr(
            Column::ItemsWritten,
            Expr::value(to_i64(counters.items_written)),
        )
        .col_expr(Column::NewCount, Expr::value(to_i64(counters.new)))
        .col_expr(Column::UpdatedCount, Expr::value(to_i64(counters.updated)))
        .col_expr(Column::ErrorCount, Expr::value(to_i64(counters.errors)))
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
