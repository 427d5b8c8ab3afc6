//! ExecutionLog entity model
//!
//! Audit trail of engine invocations. Rows are created `running` and finalized
//! exactly once; the engine never reads them back.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;

use super::sync_job::TriggerType;

/// Outcome of a logged invocation
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
pub enum LogStatus {
    #[sea_orm(string_value = "running")]
    Running,
    #[sea_orm(string_value = "success")]
    Success,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Running => "running",
            LogStatus::Success => "success",
            LogStatus::Failed => "failed",
            LogStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(LogStatus::Running),
            "success" => Ok(LogStatus::Success),
            "failed" => Ok(LogStatus::Failed),
            "cancelled" => Ok(LogStatus::Cancelled),
            other => Err(format!("unknown log status '{other}'")),
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "execution_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// e.g. `sales-sync`, `products-sync`, `cron-sales-last_30_days`
    pub job_name: String,

    pub trigger_type: TriggerType,

    pub tenant_id: Option<String>,

    pub data_type: Option<String>,

    pub sync_job_id: Option<Uuid>,

    pub status: LogStatus,

    pub started_at: DateTimeWithTimeZone,

    pub finished_at: Option<DateTimeWithTimeZone>,

    pub duration_ms: Option<i64>,

    pub pages_read: i32,

    pub items_read: i64,

    pub items_written: i64,

    pub new_count: i64,

    pub updated_count: i64,

    pub error_count: i64,

    pub message: Option<String>,

    #[sea_orm(column_type = "JsonBinary")]
    pub error_details: Option<JsonValue>,

    #[sea_orm(column_type = "JsonBinary")]
    pub metadata: Option<JsonValue>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
