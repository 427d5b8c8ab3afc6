//! Sync Executor
//!
//! Processes a sync job one bounded chunk at a time: claim the job lease, walk
//! up to `pages_per_chunk` pages from the stored cursor, upsert each page and
//! persist progress with a check-and-set after every page. A later invocation
//! resumes from the last persisted cursor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::counter;
use sea_orm::{DatabaseConnection, DbErr};
use serde::Serialize;
use serde_json::{Value as JsonValue, json};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::{MAX_PAGE_SIZE, SyncConfig};
use crate::crypto::{ApiKey, CryptoError, CryptoKey};
use crate::execution_log::{ExecutionLogger, LogCompletion, LogCounters, LogUpdate, StartLog};
use crate::marketplace::{DateWindow, FetchError, PageFetcher, PageRequest};
use crate::models::sync_job::Model as SyncJob;
use crate::models::{JobStatus, LogStatus};
use crate::repositories::sync_job::PageProgress;
use crate::repositories::{
    Claim, IntegrationRepository, JobStoreError, Lease, RecordUpserter, SyncJobRepository,
    UpsertOutcome,
};
use crate::telemetry::metric_names;

#[derive(Debug, Error)]
pub enum SyncEngineError {
    #[error("sync job {0} is being processed by another invocation")]
    JobBusy(Uuid),
    #[error("integration {0} not found")]
    IntegrationNotFound(Uuid),
    #[error(transparent)]
    Store(#[from] JobStoreError),
    #[error("marketplace fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("database error: {0}")]
    Database(#[from] DbErr),
    #[error("credential error: {0}")]
    Crypto(#[from] CryptoError),
}

/// Why a chunk stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChunkStop {
    /// Job was already terminal when claimed
    AlreadyTerminal,
    Completed,
    /// `pages_per_chunk` pages done, more remain
    ChunkLimit,
    /// Retryable failure recorded, cursor kept
    RetryScheduled,
    Failed,
    Cancelled,
    /// Another invocation took the lease
    LeaseLost,
}

impl ChunkStop {
    fn as_str(&self) -> &'static str {
        match self {
            ChunkStop::AlreadyTerminal => "already_terminal",
            ChunkStop::Completed => "completed",
            ChunkStop::ChunkLimit => "chunk_limit",
            ChunkStop::RetryScheduled => "retry_scheduled",
            ChunkStop::Failed => "failed",
            ChunkStop::Cancelled => "cancelled",
            ChunkStop::LeaseLost => "lease_lost",
        }
    }

    /// Whether another chunk should follow right away.
    pub fn should_continue(&self) -> bool {
        matches!(self, ChunkStop::ChunkLimit)
    }

    fn log_status(&self) -> LogStatus {
        match self {
            ChunkStop::Failed | ChunkStop::RetryScheduled => LogStatus::Failed,
            ChunkStop::Cancelled | ChunkStop::LeaseLost => LogStatus::Cancelled,
            _ => LogStatus::Success,
        }
    }
}

/// Record counts for a run of pages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ChunkCounts {
    pub pages: u32,
    pub items: u64,
    pub new: u64,
    pub updated: u64,
    pub skipped: u64,
    pub errors: u64,
}

impl ChunkCounts {
    fn absorb_page(&mut self, items: usize, outcome: &UpsertOutcome) {
        self.items += items as u64;
        self.new += outcome.new;
        self.updated += outcome.updated;
        self.skipped += outcome.skipped;
        self.errors += outcome.errors;
    }

    fn merge(&mut self, other: &ChunkCounts) {
        self.pages += other.pages;
        self.items += other.items;
        self.new += other.new;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.errors += other.errors;
    }

    fn log_counters(&self) -> LogCounters {
        LogCounters {
            pages_read: self.pages,
            items_read: self.items,
            items_written: self.new + self.updated,
            new: self.new,
            updated: self.updated,
            errors: self.errors,
        }
    }
}

/// Counters persisted on the job across every chunk so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct JobTotals {
    pub pages_done: i32,
    pub items_processed: i64,
    pub total_new: i64,
    pub total_updated: i64,
    pub total_skipped: i64,
    pub total_errors: i64,
}

impl From<&SyncJob> for JobTotals {
    fn from(job: &SyncJob) -> Self {
        Self {
            pages_done: job.pages_done,
            items_processed: job.items_processed,
            total_new: job.total_new,
            total_updated: job.total_updated,
            total_skipped: job.total_skipped,
            total_errors: job.total_errors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ChunkOutcome {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub stop: ChunkStop,
    pub pages_processed: u32,
    /// Counts for this invocation only
    pub chunk: ChunkCounts,
    pub totals: JobTotals,
    pub cursor: i32,
    pub total_pages: Option<i32>,
    #[schema(value_type = Option<Object>)]
    pub error: Option<JsonValue>,
}

impl ChunkOutcome {
    fn new(job: &SyncJob, stop: ChunkStop, chunk: ChunkCounts) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            stop,
            pages_processed: chunk.pages,
            chunk,
            totals: JobTotals::from(job),
            cursor: job.cursor,
            total_pages: job.total_pages,
            error: job.error.clone(),
        }
    }

    /// False when the job failed, or when this invocation stopped on a
    /// rescheduled retry or a lost lease.
    pub fn succeeded(&self) -> bool {
        self.status != JobStatus::Failed
            && !matches!(
                self.stop,
                ChunkStop::Failed | ChunkStop::RetryScheduled | ChunkStop::LeaseLost
            )
    }

    /// Message for an unsuccessful invocation, taken from the job error when present.
    pub fn error_message(&self) -> Option<String> {
        if self.succeeded() {
            return None;
        }
        self.error
            .as_ref()
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .or_else(|| Some(format!("chunk stopped: {}", self.stop.as_str())))
    }

    /// Fold a later chunk of the same job into this one.
    fn absorb(&mut self, later: ChunkOutcome) {
        self.chunk.merge(&later.chunk);
        self.pages_processed = self.chunk.pages;
        self.status = later.status;
        self.stop = later.stop;
        self.totals = later.totals;
        self.cursor = later.cursor;
        self.total_pages = later.total_pages;
        self.error = later.error;
    }
}

/// Result of walking the pages of one chunk, before the lease is released.
struct ChunkRun {
    job: SyncJob,
    stop: ChunkStop,
    counts: ChunkCounts,
}

/// Runs sync job chunks against a [`PageFetcher`].
#[derive(Clone)]
pub struct SyncExecutor {
    db: DatabaseConnection,
    fetcher: Arc<dyn PageFetcher>,
    logger: Arc<dyn ExecutionLogger>,
    crypto_key: CryptoKey,
    config: SyncConfig,
}

impl SyncExecutor {
    pub fn new(
        db: DatabaseConnection,
        fetcher: Arc<dyn PageFetcher>,
        logger: Arc<dyn ExecutionLogger>,
        crypto_key: CryptoKey,
        config: SyncConfig,
    ) -> Self {
        Self {
            db,
            fetcher,
            logger,
            crypto_key,
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn jobs(&self) -> SyncJobRepository {
        SyncJobRepository::new(self.db.clone())
    }

    pub fn integrations(&self) -> IntegrationRepository {
        IntegrationRepository::new(self.db.clone(), self.crypto_key.clone())
    }

    pub fn logger(&self) -> Arc<dyn ExecutionLogger> {
        Arc::clone(&self.logger)
    }

    /// Process at most `pages_per_chunk` pages of a job.
    ///
    /// A terminal job is returned unchanged; a job leased by another invocation
    /// yields [`SyncEngineError::JobBusy`].
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn process_chunk(&self, job_id: Uuid) -> Result<ChunkOutcome, SyncEngineError> {
        let jobs = self.jobs();

        let (lease, job) = match jobs.claim(job_id, self.config.lease_ttl()).await? {
            Claim::Claimed { lease, job } => (lease, job),
            Claim::Terminal(job) => {
                debug!(status = %job.status, "Job already finished, nothing to process");
                return Ok(ChunkOutcome::new(
                    &job,
                    ChunkStop::AlreadyTerminal,
                    ChunkCounts::default(),
                ));
            }
            Claim::Busy => return Err(SyncEngineError::JobBusy(job_id)),
        };

        let log_id = self
            .logger
            .start(StartLog {
                job_name: job.data_type.job_name(),
                trigger: job.trigger_type,
                tenant_id: Some(job.tenant_id.clone()),
                data_type: Some(job.data_type),
                sync_job_id: Some(job.id),
                metadata: Some(json!({
                    "strategy": job.strategy,
                    "cursor": job.cursor,
                    "pages_per_chunk": job.pages_per_chunk,
                })),
            })
            .await;

        let mut counts = ChunkCounts::default();
        let run = match self.credential_for(&job).await {
            Ok(credential) => {
                self.walk_pages(&lease, job, &credential, log_id, &mut counts)
                    .await
            }
            Err(error) => {
                self.fail_setup(&lease, &job, log_id, &error).await;
                return Err(error);
            }
        };

        if let Err(error) = jobs.release(&lease).await {
            warn!(error = %error, "Failed to release job lease");
        }

        let run = match run {
            Ok(run) => run,
            Err(error) => {
                self.logger
                    .complete(
                        log_id,
                        LogCompletion {
                            status: LogStatus::Failed,
                            counters: counts.log_counters(),
                            message: Some("chunk aborted".into()),
                            error_details: Some(json!({ "message": error.to_string() })),
                        },
                    )
                    .await;
                return Err(error);
            }
        };

        counter!(metric_names::CHUNKS_PROCESSED, "stop" => run.stop.as_str()).increment(1);
        info!(
            tenant_id = %run.job.tenant_id,
            data_type = %run.job.data_type,
            stop = run.stop.as_str(),
            pages = run.counts.pages,
            new = run.counts.new,
            updated = run.counts.updated,
            cursor = run.job.cursor,
            "Chunk finished"
        );

        self.logger
            .complete(
                log_id,
                LogCompletion {
                    status: run.stop.log_status(),
                    counters: run.counts.log_counters(),
                    message: Some(format!(
                        "{} after {} page(s), job {}",
                        run.stop.as_str(),
                        run.counts.pages,
                        run.job.status
                    )),
                    error_details: run.job.error.clone().filter(|_| {
                        matches!(run.stop, ChunkStop::Failed | ChunkStop::RetryScheduled)
                    }),
                },
            )
            .await;

        Ok(ChunkOutcome::new(&run.job, run.stop, run.counts))
    }

    /// Run chunks back to back until the job is terminal, a chunk stops early,
    /// or `budget` is spent. Counts are summed over every chunk run.
    #[instrument(skip(self), fields(job_id = %job_id, budget_ms = budget.as_millis() as u64))]
    pub async fn run_until_budget(
        &self,
        job_id: Uuid,
        budget: Duration,
    ) -> Result<ChunkOutcome, SyncEngineError> {
        let deadline = Instant::now() + budget;
        let mut combined = self.process_chunk(job_id).await?;

        while combined.stop.should_continue() {
            if Instant::now() >= deadline {
                info!(cursor = combined.cursor, "Invocation budget spent, job will resume later");
                break;
            }
            let next = self.process_chunk(job_id).await?;
            combined.absorb(next);
        }

        Ok(combined)
    }

    async fn credential_for(&self, job: &SyncJob) -> Result<ApiKey, SyncEngineError> {
        let integrations = self.integrations();
        let integration = integrations
            .find_for_tenant(&job.tenant_id, job.integration_id)
            .await?
            .ok_or(SyncEngineError::IntegrationNotFound(job.integration_id))?;
        Ok(integrations.decrypt_api_key(&integration)?)
    }

    /// A job whose credential cannot be resolved will never succeed: fail it.
    async fn fail_setup(
        &self,
        lease: &Lease,
        job: &SyncJob,
        log_id: Uuid,
        error: &SyncEngineError,
    ) {
        let details = json!({ "kind": "setup", "message": error.to_string() });
        let jobs = self.jobs();
        if let Err(store_error) = jobs.finish(lease, JobStatus::Failed, Some(details.clone())).await {
            warn!(error = %store_error, "Failed to mark job failed after setup error");
            if let Err(release_error) = jobs.release(lease).await {
                warn!(error = %release_error, "Failed to release job lease");
            }
        }

        warn!(
            tenant_id = %job.tenant_id,
            integration_id = %job.integration_id,
            error = %error,
            "Sync job failed before fetching"
        );

        self.logger
            .complete(
                log_id,
                LogCompletion {
                    status: LogStatus::Failed,
                    counters: LogCounters::default(),
                    message: Some("integration credential unavailable".into()),
                    error_details: Some(details),
                },
            )
            .await;
    }

    async fn walk_pages(
        &self,
        lease: &Lease,
        mut job: SyncJob,
        credential: &ApiKey,
        log_id: Uuid,
        counts: &mut ChunkCounts,
    ) -> Result<ChunkRun, SyncEngineError> {
        let jobs = self.jobs();
        let upserter = RecordUpserter::with_batch_limit(self.db.clone(), self.config.write_batch_limit);
        let window = match (job.window_start, job.window_end) {
            (Some(start), Some(end)) => Some(DateWindow { start, end }),
            _ => None,
        };
        let page_size = u32::try_from(job.page_size).unwrap_or(MAX_PAGE_SIZE);

        for _ in 0..job.pages_per_chunk.max(1) {
            if job.max_pages_reached() {
                return self
                    .settle(lease, job, JobStatus::Completed, None, *counts)
                    .await;
            }

            let page_number = u32::try_from(job.cursor).unwrap_or(1).max(1);
            let request = PageRequest {
                credential: credential.clone(),
                data_type: job.data_type,
                page_number,
                page_size,
                window,
            };

            let page = match self.fetcher.fetch_page(&request).await {
                Ok(page) => page,
                Err(error) if error.is_retryable() => {
                    let details = fetch_error_details(&error, page_number);
                    return self.retry_later(lease, job, details, *counts).await;
                }
                Err(error) => {
                    warn!(page = page_number, error = %error, "Permanent fetch failure");
                    let details = fetch_error_details(&error, page_number);
                    return self
                        .settle(lease, job, JobStatus::Failed, Some(details), *counts)
                        .await;
                }
            };

            if page.is_empty() {
                debug!(page = page_number, "Empty page, nothing left to sync");
                counts.pages += 1;
                return self
                    .settle(lease, job, JobStatus::Completed, None, *counts)
                    .await;
            }

            let outcome = match upserter
                .upsert_page(&job.tenant_id, job.data_type, &page.records)
                .await
            {
                Ok(outcome) => outcome,
                Err(error) => {
                    warn!(page = page_number, error = %error, "Page write failed");
                    let details = json!({
                        "kind": "database",
                        "message": error.to_string(),
                        "page": page_number,
                    });
                    return self.retry_later(lease, job, details, *counts).await;
                }
            };

            let progress = PageProgress {
                expected_cursor: job.cursor,
                next_cursor: job.cursor + 1,
                total_pages: page
                    .total_pages
                    .map(|total| i32::try_from(total).unwrap_or(i32::MAX)),
                items: page.records.len() as i64,
                new: outcome.new as i64,
                updated: outcome.updated as i64,
                skipped: outcome.skipped as i64,
                errors: outcome.errors as i64,
            };

            job = match jobs.advance(lease, progress).await {
                Ok(advanced) => advanced,
                Err(JobStoreError::LeaseLost(_)) => return self.lost_lease(job, *counts).await,
                Err(error) => return Err(error.into()),
            };
            counts.pages += 1;
            counts.absorb_page(page.records.len(), &outcome);

            debug!(
                page = page_number,
                records = page.records.len(),
                new = outcome.new,
                updated = outcome.updated,
                cursor = job.cursor,
                "Page synced"
            );

            self.logger
                .update(
                    log_id,
                    LogUpdate {
                        counters: counts.log_counters(),
                        message: None,
                    },
                )
                .await;

            if page.is_last() || job.max_pages_reached() {
                return self
                    .settle(lease, job, JobStatus::Completed, None, *counts)
                    .await;
            }
        }

        Ok(ChunkRun {
            job,
            stop: ChunkStop::ChunkLimit,
            counts: *counts,
        })
    }

    async fn settle(
        &self,
        lease: &Lease,
        job: SyncJob,
        to: JobStatus,
        error: Option<JsonValue>,
        counts: ChunkCounts,
    ) -> Result<ChunkRun, SyncEngineError> {
        match self.jobs().finish(lease, to, error).await {
            Ok(finished) => Ok(ChunkRun {
                job: finished,
                stop: if to == JobStatus::Completed {
                    ChunkStop::Completed
                } else {
                    ChunkStop::Failed
                },
                counts,
            }),
            Err(JobStoreError::LeaseLost(_)) => self.lost_lease(job, counts).await,
            Err(error) => Err(error.into()),
        }
    }

    async fn retry_later(
        &self,
        lease: &Lease,
        job: SyncJob,
        details: JsonValue,
        counts: ChunkCounts,
    ) -> Result<ChunkRun, SyncEngineError> {
        let jobs = self.jobs();
        match jobs
            .record_chunk_failure(lease, details, self.config.max_chunk_retries)
            .await
        {
            Ok(status) => {
                let refreshed = jobs.find(job.id).await?.unwrap_or(job);
                Ok(ChunkRun {
                    job: refreshed,
                    stop: if status == JobStatus::Failed {
                        ChunkStop::Failed
                    } else {
                        ChunkStop::RetryScheduled
                    },
                    counts,
                })
            }
            Err(JobStoreError::LeaseLost(_)) => self.lost_lease(job, counts).await,
            Err(error) => Err(error.into()),
        }
    }

    /// The job moved under us: cancelled, or leased by someone else.
    async fn lost_lease(&self, job: SyncJob, counts: ChunkCounts) -> Result<ChunkRun, SyncEngineError> {
        let current = self.jobs().find(job.id).await?.unwrap_or(job);
        let stop = if current.status == JobStatus::Cancelled {
            info!("Job cancelled, stopping at page boundary");
            ChunkStop::Cancelled
        } else {
            warn!(status = %current.status, "Job lease lost, stopping chunk");
            ChunkStop::LeaseLost
        };
        Ok(ChunkRun {
            job: current,
            stop,
            counts,
        })
    }
}

fn fetch_error_details(error: &FetchError, page_number: u32) -> JsonValue {
    json!({
        "kind": error.kind(),
        "message": error.to_string(),
        "page": page_number,
        "retry_after_secs": error.retry_after_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_stop_log_status() {
        assert_eq!(ChunkStop::Completed.log_status(), LogStatus::Success);
        assert_eq!(ChunkStop::ChunkLimit.log_status(), LogStatus::Success);
        assert_eq!(ChunkStop::RetryScheduled.log_status(), LogStatus::Failed);
        assert_eq!(ChunkStop::Cancelled.log_status(), LogStatus::Cancelled);
        assert!(ChunkStop::ChunkLimit.should_continue());
        assert!(!ChunkStop::RetryScheduled.should_continue());
    }

    #[test]
    fn counts_merge_and_map_to_log() {
        let mut first = ChunkCounts {
            pages: 2,
            items: 20,
            new: 15,
            updated: 5,
            ..Default::default()
        };
        first.merge(&ChunkCounts {
            pages: 1,
            items: 3,
            skipped: 3,
            ..Default::default()
        });

        let log = first.log_counters();
        assert_eq!(log.pages_read, 3);
        assert_eq!(log.items_read, 23);
        assert_eq!(log.items_written, 20);
    }

    fn outcome(status: JobStatus, stop: ChunkStop, error: Option<JsonValue>) -> ChunkOutcome {
        ChunkOutcome {
            job_id: Uuid::nil(),
            status,
            stop,
            pages_processed: 0,
            chunk: ChunkCounts::default(),
            totals: JobTotals::default(),
            cursor: 1,
            total_pages: None,
            error,
        }
    }

    #[test]
    fn rescheduled_or_lost_chunks_are_not_successful() {
        let rate_limited = json!({ "kind": "rate_limited", "message": "rate limited by marketplace" });
        let retry = outcome(
            JobStatus::InProgress,
            ChunkStop::RetryScheduled,
            Some(rate_limited),
        );
        assert!(!retry.succeeded());
        assert_eq!(
            retry.error_message().as_deref(),
            Some("rate limited by marketplace")
        );

        let lost = outcome(JobStatus::InProgress, ChunkStop::LeaseLost, None);
        assert!(!lost.succeeded());
        assert_eq!(
            lost.error_message().as_deref(),
            Some("chunk stopped: lease_lost")
        );

        for stop in [ChunkStop::ChunkLimit, ChunkStop::Completed, ChunkStop::Cancelled] {
            let ok = outcome(JobStatus::InProgress, stop, None);
            assert!(ok.succeeded(), "{stop:?}");
            assert!(ok.error_message().is_none());
        }
        assert!(!outcome(JobStatus::Failed, ChunkStop::AlreadyTerminal, None).succeeded());
    }

    #[test]
    fn fetch_error_details_carry_page() {
        let details = fetch_error_details(
            &FetchError::RateLimited {
                retry_after_secs: Some(7),
            },
            4,
        );
        assert_eq!(details["page"], 4);
        assert_eq!(details["retry_after_secs"], 7);
        assert_eq!(details["kind"], "rate_limited");
    }
}
