//! # Repository Layer
//!
//! SeaORM access for integrations, sync jobs, synced records and execution logs.
//! Every read or write of tenant data is scoped by `tenant_id`.

pub mod execution_log;
pub mod integration;
pub mod records;
pub mod sync_job;

pub use execution_log::ExecutionLogRepository;
pub use integration::IntegrationRepository;
pub use records::{RecordUpserter, UpsertOutcome};
pub use sync_job::{Claim, JobStoreError, Lease, SyncJobRepository};
