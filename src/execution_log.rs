//! Execution Logger
//!
//! Lifecycle hooks (`start`, `update`, `complete`) the engine calls for every
//! invocation. Implementations must never fail the caller: a log write that
//! fails is reported through `tracing` and a metric, then dropped.

use async_trait::async_trait;
use sea_orm::DatabaseConnection;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::{DataType, LogStatus, TriggerType};
use crate::repositories::ExecutionLogRepository;
use crate::telemetry::metric_names;

#[derive(Debug, Clone)]
pub struct StartLog {
    pub job_name: String,
    pub trigger: TriggerType,
    pub tenant_id: Option<String>,
    pub data_type: Option<DataType>,
    pub sync_job_id: Option<Uuid>,
    pub metadata: Option<JsonValue>,
}

/// Running totals for one invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogCounters {
    pub pages_read: u32,
    pub items_read: u64,
    pub items_written: u64,
    pub new: u64,
    pub updated: u64,
    pub errors: u64,
}

#[derive(Debug, Clone, Default)]
pub struct LogUpdate {
    pub counters: LogCounters,
    pub message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LogCompletion {
    pub status: LogStatus,
    pub counters: LogCounters,
    pub message: Option<String>,
    pub error_details: Option<JsonValue>,
}

#[async_trait]
pub trait ExecutionLogger: Send + Sync {
    /// Record the start of an invocation and return its log id.
    async fn start(&self, entry: StartLog) -> Uuid;

    async fn update(&self, log_id: Uuid, update: LogUpdate);

    /// Finalize the entry. Later calls for the same id have no effect.
    async fn complete(&self, log_id: Uuid, completion: LogCompletion);
}

/// Writes execution logs to the `execution_logs` table.
#[derive(Debug, Clone)]
pub struct DbExecutionLogger {
    repo: ExecutionLogRepository,
}

impl DbExecutionLogger {
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            repo: ExecutionLogRepository::new(db),
        }
    }
}

fn report_failure(operation: &'static str, log_id: Uuid, error: &sea_orm::DbErr) {
    metrics::counter!(metric_names::LOG_WRITE_FAILURES, "operation" => operation).increment(1);
    tracing::warn!(log_id = %log_id, operation, error = %error, "Execution log write failed");
}

#[async_trait]
impl ExecutionLogger for DbExecutionLogger {
    async fn start(&self, entry: StartLog) -> Uuid {
        // The id exists even if the insert fails so callers never branch on it.
        let log_id = Uuid::new_v4();
        if let Err(error) = self.repo.insert_running(log_id, &entry).await {
            report_failure("start", log_id, &error);
        }
        log_id
    }

    async fn update(&self, log_id: Uuid, update: LogUpdate) {
        if let Err(error) = self
            .repo
            .update_counters(log_id, &update.counters, update.message.as_deref())
            .await
        {
            report_failure("update", log_id, &error);
        }
    }

    async fn complete(&self, log_id: Uuid, completion: LogCompletion) {
        match self.repo.finalize(log_id, &completion).await {
            Ok(0) => {
                tracing::debug!(log_id = %log_id, "Execution log already finalized or missing");
            }
            Ok(_) => {
                tracing::debug!(log_id = %log_id, status = %completion.status, "Execution log finalized");
            }
            Err(error) => report_failure("complete", log_id, &error),
        }
    }
}

/// Discards every call. Used by the CLI's `--no-log` flag.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExecutionLogger;

#[async_trait]
impl ExecutionLogger for NoopExecutionLogger {
    async fn start(&self, _entry: StartLog) -> Uuid {
        Uuid::new_v4()
    }

    async fn update(&self, _log_id: Uuid, _update: LogUpdate) {}

    async fn complete(&self, _log_id: Uuid, _completion: LogCompletion) {}
}
