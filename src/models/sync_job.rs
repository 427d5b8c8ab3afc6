//! SyncJob entity model
//!
//! This module contains the SeaORM entity model for the sync_jobs table together
//! with the closed enums stored in it. A sync job is the persisted, resumable
//! state of one paginated walk over the marketplace API.

use super::integration::Entity as Integration;
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle status of a sync job
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "in_progress")]
    InProgress,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl JobStatus {
    /// Statuses that count toward the one-active-job-per-type guard.
    pub const ACTIVE: [JobStatus; 2] = [JobStatus::Pending, JobStatus::InProgress];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `to`.
    ///
    /// `in_progress -> in_progress` is legal (a resumed chunk re-enters the
    /// state); terminal states accept nothing.
    pub fn can_transition_to(&self, to: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, to),
            (Pending, InProgress)
                | (Pending, Cancelled)
                | (Pending, Failed)
                | (InProgress, InProgress)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" => Ok(JobStatus::InProgress),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

/// Kind of marketplace data a job synchronizes
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    #[sea_orm(string_value = "products")]
    Products,
    #[sea_orm(string_value = "sales")]
    Sales,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Products => "products",
            DataType::Sales => "sales",
        }
    }

    /// Name used for execution log entries of this data type.
    pub fn job_name(&self) -> String {
        format!("{}-sync", self.as_str())
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "products" | "offers" => Ok(DataType::Products),
            "sales" => Ok(DataType::Sales),
            other => Err(format!(
                "unknown data type '{other}', expected 'products' or 'sales'"
            )),
        }
    }
}

/// Sync flavor selecting how much history a job walks
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
pub enum SyncStrategy {
    /// Most recent 100 records (one full page)
    #[sea_orm(string_value = "last_100")]
    #[serde(rename = "last_100")]
    Last100,
    /// Sales from the last 30 days
    #[sea_orm(string_value = "last_30_days")]
    #[serde(rename = "last_30_days")]
    Last30Days,
    /// Every page the API returns
    #[sea_orm(string_value = "all")]
    #[serde(rename = "all")]
    All,
}

impl SyncStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStrategy::Last100 => "last_100",
            SyncStrategy::Last30Days => "last_30_days",
            SyncStrategy::All => "all",
        }
    }
}

impl fmt::Display for SyncStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "last_100" => Ok(SyncStrategy::Last100),
            "last_30_days" => Ok(SyncStrategy::Last30Days),
            "all" => Ok(SyncStrategy::All),
            other => Err(format!(
                "unknown strategy '{other}', expected one of last_100, last_30_days, all"
            )),
        }
    }
}

/// What started an invocation
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::None)")]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    #[sea_orm(string_value = "cron")]
    Cron,
    #[sea_orm(string_value = "manual")]
    Manual,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Cron => "cron",
            TriggerType::Manual => "manual",
        }
    }
}

/// SyncJob entity: cursor, counters and lease for one tenant/data type walk
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_jobs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Tenant (admin account) that owns the job
    pub tenant_id: String,

    /// Integration whose credential is used for remote calls
    pub integration_id: Uuid,

    pub data_type: DataType,

    pub strategy: SyncStrategy,

    pub trigger_type: TriggerType,

    pub status: JobStatus,

    /// Next page number to fetch, starting at 1
    pub cursor: i32,

    /// Total page count reported by the remote page summary, once known
    pub total_pages: Option<i32>,

    /// Upper bound on pages walked by this job (None means unbounded)
    pub max_pages: Option<i32>,

    pub pages_per_chunk: i32,

    pub page_size: i32,

    pub pages_done: i32,

    pub items_processed: i64,

    pub total_new: i64,

    pub total_updated: i64,

    pub total_skipped: i64,

    pub total_errors: i64,

    /// Consecutive chunk failures since the last successful page
    pub retry_count: i32,

    /// Inclusive sales date filter start
    pub window_start: Option<Date>,

    /// Inclusive sales date filter end
    pub window_end: Option<Date>,

    /// Token of the invocation currently allowed to advance the job
    pub lease_token: Option<Uuid>,

    pub lease_expires_at: Option<DateTimeWithTimeZone>,

    /// Structured details of the last failure
    #[sea_orm(column_type = "JsonBinary")]
    pub error: Option<JsonValue>,

    pub started_at: Option<DateTimeWithTimeZone>,

    pub last_processed_at: Option<DateTimeWithTimeZone>,

    /// Set when the job reaches any terminal status
    pub completed_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Whether the job has walked as many pages as its bound allows.
    pub fn max_pages_reached(&self) -> bool {
        self.max_pages
            .is_some_and(|max| self.pages_done >= max)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "Integration",
        from = "Column::IntegrationId",
        to = "super::integration::Column::Id"
    )]
    Integration,
}

impl Related<Integration> for Entity {
    fn to() -> RelationDef {
        Relation::Integration.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
