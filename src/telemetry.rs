//! Telemetry: global subscriber setup, request-scoped correlation ids and the
//! metric names emitted by the sync engine.

use std::any::type_name_of_val;
use std::sync::atomic::{AtomicBool, Ordering};

use log::LevelFilter;
use thiserror::Error;
use tokio::task_local;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::Layer,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

use crate::config::AppConfig;

/// Metric names, kept in one place so dashboards and code agree.
pub mod metric_names {
    pub const PAGES_FETCHED: &str = "marketsync_pages_fetched_total";
    pub const FETCH_RETRIES: &str = "marketsync_fetch_retries_total";
    pub const FETCH_FAILURES: &str = "marketsync_fetch_failures_total";
    pub const FETCH_LATENCY: &str = "marketsync_fetch_latency_seconds";
    pub const RECORDS_UPSERTED: &str = "marketsync_records_upserted_total";
    pub const UPSERT_BATCH_SIZE: &str = "marketsync_upsert_batch_size";
    pub const CHUNKS_PROCESSED: &str = "marketsync_chunks_processed_total";
    pub const JOBS_FINISHED: &str = "marketsync_jobs_finished_total";
    pub const LOG_WRITE_FAILURES: &str = "marketsync_execution_log_failures_total";
}

/// Trace context containing request correlation ID.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
}

impl TraceContext {
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
        }
    }

    /// Context with a freshly generated `corr-` id.
    pub fn generated() -> Self {
        Self::new(new_trace_id())
    }
}

task_local! {
    static ACTIVE_TRACE_CONTEXT: TraceContext;
}

/// Errors that can occur while initializing global telemetry.
#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("failed to install log tracer bridge: {0}")]
    LogTracer(#[from] log::SetLoggerError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

static TELEMETRY_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize global tracing/logging exactly once, wiring `log::` macros into the tracing pipeline.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if TELEMETRY_INITIALIZED
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Ok(());
    }

    if let Err(err) = LogTracer::builder()
        .with_max_level(LevelFilter::Trace)
        .init()
    {
        // Another LogTracer (tests, embedding binary) is fine
        let logger_type = type_name_of_val(log::logger());
        if !logger_type.contains("LogTracer") {
            eprintln!(
                "Warning: Failed to install log tracer bridge: {err}. `log::` macros will not emit structured tracing events."
            );
        }
    }

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.log_level)));

    let fmt_layer = match config.log_format.as_str() {
        "pretty" => fmt::layer().pretty().boxed(),
        _ => fmt::layer().json().with_current_span(true).boxed(),
    };

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        TELEMETRY_INITIALIZED.store(false, Ordering::SeqCst);
        eprintln!(
            "Warning: Failed to set global tracing subscriber: {err}. Default subscriber remains in effect."
        );
    }

    describe_metrics();

    Ok(())
}

/// sqlx statement logging is noisy at debug; keep it at warn unless asked for.
fn default_directives(level: &str) -> String {
    format!("{level},sqlx=warn,sea_orm=warn,hyper=warn,reqwest=warn")
}

fn describe_metrics() {
    use metric_names::*;
    metrics::describe_counter!(PAGES_FETCHED, "Marketplace pages fetched successfully");
    metrics::describe_counter!(FETCH_RETRIES, "Marketplace requests retried after 429/5xx/network errors");
    metrics::describe_counter!(FETCH_FAILURES, "Marketplace page fetches that gave up");
    metrics::describe_histogram!(FETCH_LATENCY, metrics::Unit::Seconds, "Marketplace request latency");
    metrics::describe_counter!(RECORDS_UPSERTED, "Records processed by the upserter, by outcome");
    metrics::describe_histogram!(UPSERT_BATCH_SIZE, "Records written per upsert transaction");
    metrics::describe_counter!(CHUNKS_PROCESSED, "Sync chunks processed");
    metrics::describe_counter!(JOBS_FINISHED, "Sync jobs reaching a terminal status");
    metrics::describe_counter!(LOG_WRITE_FAILURES, "Execution log writes that failed and were swallowed");
}

/// Generate a correlation id of the form `corr-xxxxxxxx`.
pub fn new_trace_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("corr-{}", &id[..8])
}

/// Execute `future` within the provided trace context, making it available through task-local
/// storage for the duration of the request.
pub async fn with_trace_context<Fut, R>(context: TraceContext, future: Fut) -> R
where
    Fut: std::future::Future<Output = R>,
{
    ACTIVE_TRACE_CONTEXT.scope(context, future).await
}

/// Get the currently active trace ID, if one has been set for the running task.
pub fn current_trace_id() -> Option<String> {
    ACTIVE_TRACE_CONTEXT
        .try_with(|ctx| ctx.trace_id.clone())
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trace_id_visible_inside_scope_only() {
        assert!(current_trace_id().is_none());

        let seen = with_trace_context(TraceContext::new("corr-abc12345"), async {
            current_trace_id()
        })
        .await;

        assert_eq!(seen.as_deref(), Some("corr-abc12345"));
        assert!(current_trace_id().is_none());
    }

    #[test]
    fn generated_ids_have_prefix() {
        let id = new_trace_id();
        assert!(id.starts_with("corr-"));
        assert_eq!(id.len(), 13);
    }

    #[test]
    fn default_directives_quiet_sql_logging() {
        let d = default_directives("debug");
        assert!(d.starts_with("debug,"));
        assert!(d.contains("sqlx=warn"));
    }
}
