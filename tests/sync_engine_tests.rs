//! End-to-end tests of the sync engine against a mocked marketplace API.

mod test_utils;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use marketsync::execution_log::DbExecutionLogger;
use marketsync::marketplace::{FetchError, Page, PageFetcher, PageRequest};
use marketsync::models::{DataType, JobStatus, SyncStrategy, TriggerType, sale};
use marketsync::repositories::sync_job::CreateJobParams;
use marketsync::repositories::{Claim, JobStoreError};
use marketsync::sync_executor::{ChunkStop, SyncEngineError};
use sea_orm::{ColumnTrait, ConnectionTrait, Database, DatabaseConnection, EntityTrait, QueryFilter};
use test_utils::*;
use uuid::Uuid;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BUDGET: Duration = Duration::from_secs(30);

fn sales_job(integration: &marketsync::models::integration::Model, pages_per_chunk: u32) -> CreateJobParams {
    CreateJobParams {
        tenant_id: integration.tenant_id.clone(),
        integration_id: integration.id,
        data_type: DataType::Sales,
        strategy: SyncStrategy::All,
        trigger: TriggerType::Manual,
        max_pages: None,
        pages_per_chunk,
        page_size: 100,
        window: None,
    }
}

#[tokio::test]
async fn full_sales_sync_completes_and_stores_every_record() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    mount_page(&server, "/v2/sales", 1, sales_body(1, 2, sales_page(1))).await;
    mount_page(&server, "/v2/sales", 2, sales_body(2, 2, sales_page(6))).await;

    let integration = seed_integration(&db, "T1", &[SyncStrategy::All]).await?;
    let config = marketsync::config::SyncConfig {
        pages_per_chunk: 2,
        ..test_sync_config()
    };
    let orchestrator = build_orchestrator(&db, &server.uri(), config);

    let run = orchestrator
        .sync_tenant(&integration, DataType::Sales, SyncStrategy::All, TriggerType::Manual, BUDGET)
        .await?;

    assert!(run.created);
    assert_eq!(run.outcome.status, JobStatus::Completed);
    assert_eq!(run.outcome.stop, ChunkStop::Completed);
    assert_eq!(run.outcome.chunk.new, 10);
    assert_eq!(run.outcome.chunk.updated, 0);
    assert_eq!(run.outcome.totals.pages_done, 2);
    assert_eq!(run.outcome.cursor, 3);
    assert_eq!(count_rows(&db, "sales").await?, 10);

    // Every request carries the tenant's decrypted key
    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 2);
    for request in requests {
        assert_eq!(
            request.headers.get("authorization").and_then(|v| v.to_str().ok()),
            Some(format!("Key {TEST_API_KEY}").as_str())
        );
    }

    Ok(())
}

#[tokio::test]
async fn rerun_counts_only_changed_records_as_updated() -> Result<()> {
    let db = setup_test_db().await?;
    let integration = seed_integration(&db, "T1", &[SyncStrategy::All]).await?;

    let first = MockServer::start().await;
    mount_page(&first, "/v2/sales", 1, sales_body(1, 2, sales_page(1))).await;
    mount_page(&first, "/v2/sales", 2, sales_body(2, 2, sales_page(6))).await;
    build_orchestrator(&db, &first.uri(), test_sync_config())
        .sync_tenant(&integration, DataType::Sales, SyncStrategy::All, TriggerType::Manual, BUDGET)
        .await?;

    let mut changed = sales_page(1);
    changed[0] = test_utils::sale(1, 999.0);
    changed[4] = test_utils::sale(5, 1.5);
    let second = MockServer::start().await;
    mount_page(&second, "/v2/sales", 1, sales_body(1, 2, changed)).await;
    mount_page(&second, "/v2/sales", 2, sales_body(2, 2, sales_page(6))).await;

    let run = build_orchestrator(&db, &second.uri(), test_sync_config())
        .sync_tenant(&integration, DataType::Sales, SyncStrategy::All, TriggerType::Manual, BUDGET)
        .await?;

    assert!(run.created, "a completed job is never resumed");
    assert_eq!(run.outcome.status, JobStatus::Completed);
    assert_eq!(run.outcome.chunk.new, 0);
    assert_eq!(run.outcome.chunk.updated, 2);
    assert_eq!(run.outcome.chunk.skipped, 8);
    assert_eq!(count_rows(&db, "sales").await?, 10);

    let stored = sale::Entity::find()
        .filter(sale::Column::TenantId.eq("T1"))
        .filter(sale::Column::NaturalKey.eq("1"))
        .one(&db)
        .await?
        .expect("sale 1 stored");
    assert_eq!(stored.selling_price, Some(999.0));
    assert_eq!(stored.order_date.as_deref(), Some("15 Jan 2026 10:30:00"));

    Ok(())
}

#[tokio::test]
async fn identical_rerun_writes_nothing() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    mount_page(&server, "/v2/sales", 1, sales_body(1, 1, sales_page(1))).await;
    let integration = seed_integration(&db, "T1", &[SyncStrategy::All]).await?;
    let orchestrator = build_orchestrator(&db, &server.uri(), test_sync_config());

    orchestrator
        .sync_tenant(&integration, DataType::Sales, SyncStrategy::All, TriggerType::Manual, BUDGET)
        .await?;
    let again = orchestrator
        .sync_tenant(&integration, DataType::Sales, SyncStrategy::All, TriggerType::Manual, BUDGET)
        .await?;

    assert_eq!(again.outcome.chunk.new, 0);
    assert_eq!(again.outcome.chunk.updated, 0);
    assert_eq!(again.outcome.chunk.skipped, 5);
    assert_eq!(count_rows(&db, "sales").await?, 5);
    Ok(())
}

#[tokio::test]
async fn page_cap_completes_the_job() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    let ten_sales: Vec<_> = (1..=10).map(|id| test_utils::sale(id, 50.0)).collect();
    mount_page(&server, "/v2/sales", 1, sales_body(1, 1, ten_sales)).await;

    let integration = seed_integration(&db, "T1", &[SyncStrategy::All]).await?;
    let executor = build_executor(&db, &server.uri(), test_sync_config());
    let (job, _) = executor
        .jobs()
        .create_or_resume(CreateJobParams {
            max_pages: Some(2),
            ..sales_job(&integration, 2)
        })
        .await?;

    let outcome = executor.process_chunk(job.id).await?;
    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(outcome.pages_processed, 1);
    assert_eq!(outcome.totals.total_new, 10);
    assert_eq!(outcome.totals.total_updated, 0);

    // With more remote pages than the cap, fetching stops at the cap
    let server = MockServer::start().await;
    for page in 1..=2u32 {
        Mock::given(method("GET"))
            .and(path("/v2/offers"))
            .and(query_param("page_number", page.to_string()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(offers_body(page, 5, vec![offer(i64::from(page), 1.0, 1)])),
            )
            .expect(1)
            .mount(&server)
            .await;
    }
    let executor = build_executor(&db, &server.uri(), test_sync_config());
    let (job, _) = executor
        .jobs()
        .create_or_resume(CreateJobParams {
            data_type: DataType::Products,
            max_pages: Some(2),
            ..sales_job(&integration, 5)
        })
        .await?;

    let outcome = executor.process_chunk(job.id).await?;
    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(outcome.totals.pages_done, 2);
    assert_eq!(outcome.cursor, 3);
    Ok(())
}

#[tokio::test]
async fn job_resumes_from_cursor_across_invocations() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    for page in 1..=3u32 {
        Mock::given(method("GET"))
            .and(path("/v2/sales"))
            .and(query_param("page_number", page.to_string()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(sales_body(page, 3, sales_page(i64::from(page) * 10))),
            )
            .expect(1)
            .mount(&server)
            .await;
    }

    let integration = seed_integration(&db, "T1", &[SyncStrategy::All]).await?;
    let (job, _) = build_executor(&db, &server.uri(), test_sync_config())
        .jobs()
        .create_or_resume(sales_job(&integration, 1))
        .await?;

    let first = build_executor(&db, &server.uri(), test_sync_config())
        .process_chunk(job.id)
        .await?;
    assert_eq!(first.stop, ChunkStop::ChunkLimit);
    assert_eq!(first.status, JobStatus::InProgress);
    assert_eq!(first.cursor, 2);

    // A fresh executor stands in for a new invocation
    let second = build_executor(&db, &server.uri(), test_sync_config())
        .process_chunk(job.id)
        .await?;
    assert_eq!(second.stop, ChunkStop::ChunkLimit);
    assert_eq!(second.cursor, 3);
    assert_eq!(second.totals.items_processed, 10);

    let third = build_executor(&db, &server.uri(), test_sync_config())
        .process_chunk(job.id)
        .await?;
    assert_eq!(third.stop, ChunkStop::Completed);
    assert_eq!(third.status, JobStatus::Completed);
    assert_eq!(third.totals.total_new, 15);
    assert_eq!(count_rows(&db, "sales").await?, 15);

    let after = build_executor(&db, &server.uri(), test_sync_config())
        .process_chunk(job.id)
        .await?;
    assert_eq!(after.stop, ChunkStop::AlreadyTerminal);

    Ok(())
}

#[tokio::test]
async fn rate_limited_page_is_attempted_three_times_then_rescheduled() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/sales"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "1"))
        .expect(3)
        .mount(&server)
        .await;

    let integration = seed_integration(&db, "T1", &[SyncStrategy::All]).await?;
    let executor = build_executor(&db, &server.uri(), test_sync_config());
    let (job, _) = executor.jobs().create_or_resume(sales_job(&integration, 5)).await?;

    let outcome = executor.process_chunk(job.id).await?;

    assert_eq!(outcome.stop, ChunkStop::RetryScheduled);
    assert_eq!(outcome.status, JobStatus::InProgress);
    assert_eq!(outcome.cursor, 1);
    let error = outcome.error.expect("failure recorded on the job");
    assert_eq!(error["kind"], "rate_limited");

    let stored = executor.jobs().find(job.id).await?.expect("job exists");
    assert_eq!(stored.retry_count, 1);
    assert!(stored.lease_token.is_none(), "lease released for the next attempt");
    Ok(())
}

#[tokio::test]
async fn repeated_transient_failures_fail_the_job() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/sales"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(9)
        .mount(&server)
        .await;

    let integration = seed_integration(&db, "T1", &[SyncStrategy::All]).await?;
    let executor = build_executor(&db, &server.uri(), test_sync_config());
    let (job, _) = executor.jobs().create_or_resume(sales_job(&integration, 5)).await?;

    assert_eq!(executor.process_chunk(job.id).await?.stop, ChunkStop::RetryScheduled);
    assert_eq!(executor.process_chunk(job.id).await?.stop, ChunkStop::RetryScheduled);
    let last = executor.process_chunk(job.id).await?;

    assert_eq!(last.stop, ChunkStop::Failed);
    assert_eq!(last.status, JobStatus::Failed);
    let stored = executor.jobs().find(job.id).await?.expect("job exists");
    assert_eq!(stored.retry_count, 3);
    assert!(stored.completed_at.is_some());
    Ok(())
}

#[tokio::test]
async fn rejected_credentials_fail_without_retry() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/offers"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let integration = seed_integration(&db, "T1", &[SyncStrategy::All]).await?;
    let run = build_orchestrator(&db, &server.uri(), test_sync_config())
        .sync_tenant(&integration, DataType::Products, SyncStrategy::All, TriggerType::Manual, BUDGET)
        .await?;

    assert_eq!(run.outcome.status, JobStatus::Failed);
    assert_eq!(run.outcome.error.expect("error recorded")["kind"], "unauthorized");
    Ok(())
}

#[tokio::test]
async fn empty_first_page_completes_without_advancing() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    mount_page(&server, "/v2/offers", 1, offers_body(1, 0, vec![])).await;

    let integration = seed_integration(&db, "T1", &[SyncStrategy::All]).await?;
    let run = build_orchestrator(&db, &server.uri(), test_sync_config())
        .sync_tenant(&integration, DataType::Products, SyncStrategy::All, TriggerType::Manual, BUDGET)
        .await?;

    assert_eq!(run.outcome.status, JobStatus::Completed);
    assert_eq!(run.outcome.cursor, 1);
    assert_eq!(run.outcome.chunk.pages, 1);
    assert_eq!(count_rows(&db, "product_offers").await?, 0);
    Ok(())
}

#[tokio::test]
async fn last_100_reads_a_single_full_page() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/offers"))
        .and(query_param("page_number", "1"))
        .and(query_param("page_size", "100"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(offers_body(
            1,
            40,
            (1..=3).map(|tsin| offer(tsin, 50.0, 4)).collect(),
        )))
        .expect(1)
        .mount(&server)
        .await;

    let integration = seed_integration(&db, "T1", &[SyncStrategy::Last100]).await?;
    let run = build_orchestrator(&db, &server.uri(), test_sync_config())
        .sync_tenant(&integration, DataType::Products, SyncStrategy::Last100, TriggerType::Cron, BUDGET)
        .await?;

    assert_eq!(run.outcome.status, JobStatus::Completed);
    assert_eq!(run.outcome.totals.pages_done, 1);
    assert_eq!(run.outcome.total_pages, Some(40));
    assert_eq!(count_rows(&db, "product_offers").await?, 3);
    Ok(())
}

#[tokio::test]
async fn recent_sales_are_requested_with_a_date_filter() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    mount_page(&server, "/v2/sales", 1, sales_body(1, 1, sales_page(1))).await;

    let integration = seed_integration(&db, "T1", &[SyncStrategy::Last30Days]).await?;
    build_orchestrator(&db, &server.uri(), test_sync_config())
        .sync_tenant(&integration, DataType::Sales, SyncStrategy::Last30Days, TriggerType::Manual, BUDGET)
        .await?;

    let requests = server.received_requests().await.unwrap_or_default();
    let filters = requests[0]
        .url
        .query_pairs()
        .find(|(key, _)| key == "filters")
        .map(|(_, value)| value.into_owned())
        .expect("filters query parameter");
    assert!(filters.starts_with("start_date:"));
    assert!(filters.contains(";end_date:"));
    Ok(())
}

#[tokio::test]
async fn leased_job_is_busy_for_other_invocations() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    let integration = seed_integration(&db, "T1", &[SyncStrategy::All]).await?;
    let executor = build_executor(&db, &server.uri(), test_sync_config());
    let (job, _) = executor.jobs().create_or_resume(sales_job(&integration, 5)).await?;

    let held = executor.jobs().claim(job.id, Duration::from_secs(60)).await?;
    assert!(matches!(held, Claim::Claimed { .. }));
    assert!(matches!(
        executor.jobs().claim(job.id, Duration::from_secs(60)).await?,
        Claim::Busy
    ));

    let err = executor.process_chunk(job.id).await.unwrap_err();
    assert!(matches!(err, SyncEngineError::JobBusy(id) if id == job.id));
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
    Ok(())
}

#[tokio::test]
async fn one_active_job_per_tenant_and_data_type() -> Result<()> {
    let db = setup_test_db().await?;
    let integration = seed_integration(&db, "T1", &[SyncStrategy::All]).await?;
    let jobs = build_executor(&db, "http://127.0.0.1:9", test_sync_config()).jobs();

    let (first, created) = jobs.create_or_resume(sales_job(&integration, 5)).await?;
    let (second, created_again) = jobs.create_or_resume(sales_job(&integration, 5)).await?;
    assert!(created);
    assert!(!created_again);
    assert_eq!(first.id, second.id);

    let mut products = sales_job(&integration, 5);
    products.data_type = DataType::Products;
    let (other, created_products) = jobs.create_or_resume(products).await?;
    assert!(created_products);
    assert_ne!(other.id, first.id);
    Ok(())
}

#[tokio::test]
async fn terminal_jobs_reject_transitions_and_cancellation() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    mount_page(&server, "/v2/sales", 1, sales_body(1, 1, sales_page(1))).await;
    let integration = seed_integration(&db, "T1", &[SyncStrategy::All]).await?;
    let executor = build_executor(&db, &server.uri(), test_sync_config());
    let (job, _) = executor.jobs().create_or_resume(sales_job(&integration, 5)).await?;
    assert_eq!(executor.process_chunk(job.id).await?.status, JobStatus::Completed);

    let err = executor
        .jobs()
        .transition(job.id, JobStatus::InProgress, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        JobStoreError::IllegalTransition {
            from: JobStatus::Completed,
            to: JobStatus::InProgress
        }
    ));

    let err = executor.jobs().cancel("T1", job.id).await.unwrap_err();
    assert!(matches!(err, JobStoreError::IllegalTransition { .. }));

    let err = executor.jobs().cancel("T2", job.id).await.unwrap_err();
    assert!(matches!(err, JobStoreError::NotFound(_)));
    Ok(())
}

#[tokio::test]
async fn cancelled_job_is_not_fetched() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    let integration = seed_integration(&db, "T1", &[SyncStrategy::All]).await?;
    let executor = build_executor(&db, &server.uri(), test_sync_config());
    let (job, _) = executor.jobs().create_or_resume(sales_job(&integration, 5)).await?;

    let cancelled = executor.jobs().cancel("T1", job.id).await?;
    assert_eq!(cancelled.status, JobStatus::Cancelled);

    let outcome = executor.process_chunk(job.id).await?;
    assert_eq!(outcome.stop, ChunkStop::AlreadyTerminal);
    assert_eq!(outcome.status, JobStatus::Cancelled);
    assert!(server.received_requests().await.unwrap_or_default().is_empty());
    Ok(())
}

#[tokio::test]
async fn missing_integration_fails_the_job() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    let executor = build_executor(&db, &server.uri(), test_sync_config());
    let (job, _) = executor
        .jobs()
        .create_or_resume(CreateJobParams {
            tenant_id: "T1".to_string(),
            integration_id: Uuid::new_v4(),
            data_type: DataType::Sales,
            strategy: SyncStrategy::All,
            trigger: TriggerType::Manual,
            max_pages: None,
            pages_per_chunk: 5,
            page_size: 100,
            window: None,
        })
        .await?;

    let err = executor.process_chunk(job.id).await.unwrap_err();
    assert!(matches!(err, SyncEngineError::IntegrationNotFound(_)));

    let stored = executor.jobs().find(job.id).await?.expect("job exists");
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.error.expect("error recorded")["kind"], "setup");
    Ok(())
}

#[tokio::test]
async fn broken_log_store_does_not_break_the_sync() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    mount_page(&server, "/v2/sales", 1, sales_body(1, 1, sales_page(1))).await;
    let integration = seed_integration(&db, "T1", &[SyncStrategy::All]).await?;

    // Logger pointed at a database without the execution_logs table
    let unmigrated = Database::connect("sqlite::memory:").await?;
    let executor = build_executor_with_logger(
        &db,
        &server.uri(),
        test_sync_config(),
        Arc::new(DbExecutionLogger::new(unmigrated)),
    );
    let (job, _) = executor.jobs().create_or_resume(sales_job(&integration, 5)).await?;

    let outcome = executor.process_chunk(job.id).await?;
    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(count_rows(&db, "sales").await?, 5);
    assert_eq!(count_rows(&db, "execution_logs").await?, 0);
    Ok(())
}

#[tokio::test]
async fn chunk_is_recorded_in_the_execution_log() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    mount_page(&server, "/v2/sales", 1, sales_body(1, 2, sales_page(1))).await;
    mount_page(&server, "/v2/sales", 2, sales_body(2, 2, sales_page(6))).await;
    let integration = seed_integration(&db, "T1", &[SyncStrategy::All]).await?;

    build_orchestrator(&db, &server.uri(), test_sync_config())
        .sync_tenant(&integration, DataType::Sales, SyncStrategy::All, TriggerType::Manual, BUDGET)
        .await?;

    let logs = marketsync::models::execution_log::Entity::find().all(&db).await?;
    assert_eq!(logs.len(), 1);
    let log = &logs[0];
    assert_eq!(log.job_name, "sales-sync");
    assert_eq!(log.status, marketsync::models::LogStatus::Success);
    assert_eq!(log.tenant_id.as_deref(), Some("T1"));
    assert_eq!(log.pages_read, 2);
    assert_eq!(log.items_read, 10);
    assert_eq!(log.new_count, 10);
    assert!(log.finished_at.is_some());
    assert!(log.duration_ms.is_some());
    Ok(())
}

#[tokio::test]
async fn scheduled_fanout_isolates_tenant_failures() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    mount_page(&server, "/v2/sales", 1, sales_body(1, 1, sales_page(1))).await;

    seed_integration(&db, "T1", &[SyncStrategy::Last100]).await?;
    seed_integration(&db, "T2", &[SyncStrategy::Last100, SyncStrategy::All]).await?;
    seed_integration(&db, "T3", &[SyncStrategy::All]).await?;

    // Encrypted under a different key: decrypting it fails
    let foreign_key = marketsync::crypto::CryptoKey::new(vec![9u8; 32])?;
    marketsync::repositories::IntegrationRepository::new(db.clone(), foreign_key)
        .create(
            "T4",
            "T4 store",
            &marketsync::crypto::ApiKey::new("other"),
            &[SyncStrategy::Last100],
        )
        .await?;

    let summary = build_orchestrator(&db, &server.uri(), test_sync_config())
        .run_scheduled(DataType::Sales, SyncStrategy::Last100)
        .await?;

    assert_eq!(summary.tenants.len(), 3, "T3 has last_100 disabled");
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.totals.new, 10);

    let failed = summary.tenants.iter().find(|t| !t.success).expect("one failure");
    assert_eq!(failed.tenant_id, "T4");
    assert!(failed.error.is_some());

    let cron_logs = marketsync::models::execution_log::Entity::find()
        .filter(marketsync::models::execution_log::Column::JobName.eq("cron-sales-last_100"))
        .all(&db)
        .await?;
    assert_eq!(cron_logs.len(), 1);
    assert_eq!(cron_logs[0].status, marketsync::models::LogStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn scheduled_run_counts_rate_limited_tenant_as_failed() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/sales"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;
    seed_integration(&db, "T1", &[SyncStrategy::Last100]).await?;

    let summary = build_orchestrator(&db, &server.uri(), test_sync_config())
        .run_scheduled(DataType::Sales, SyncStrategy::Last100)
        .await?;

    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.failed, 1);
    let tenant = &summary.tenants[0];
    assert!(!tenant.success);
    assert_eq!(tenant.status.as_deref(), Some("in_progress"));
    assert!(
        tenant
            .error
            .as_deref()
            .is_some_and(|message| message.contains("rate limited"))
    );

    let cron_logs = marketsync::models::execution_log::Entity::find()
        .filter(marketsync::models::execution_log::Column::JobName.eq("cron-sales-last_100"))
        .all(&db)
        .await?;
    assert_eq!(cron_logs.len(), 1);
    assert_eq!(cron_logs[0].status, marketsync::models::LogStatus::Failed);
    Ok(())
}

#[tokio::test]
async fn progress_is_kept_per_page_when_a_later_page_fails() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    mount_page(&server, "/v2/sales", 1, sales_body(1, 3, sales_page(1))).await;
    // Page 2 is down for one whole retry budget, then recovers
    Mock::given(method("GET"))
        .and(path("/v2/sales"))
        .and(query_param("page_number", "2"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .up_to_n_times(3)
        .expect(3)
        .mount(&server)
        .await;
    mount_page(&server, "/v2/sales", 2, sales_body(2, 3, sales_page(6))).await;
    mount_page(&server, "/v2/sales", 3, sales_body(3, 3, sales_page(11))).await;

    let integration = seed_integration(&db, "T1", &[SyncStrategy::All]).await?;
    let executor = build_executor(&db, &server.uri(), test_sync_config());
    let (job, _) = executor.jobs().create_or_resume(sales_job(&integration, 3)).await?;

    let first = executor.process_chunk(job.id).await?;
    assert_eq!(first.stop, ChunkStop::RetryScheduled);
    assert_eq!(first.cursor, 2);
    assert_eq!(first.totals.pages_done, 1);
    assert_eq!(first.chunk.pages, 1);
    assert_eq!(first.chunk.new, 5);
    let stored = executor.jobs().find(job.id).await?.expect("job exists");
    assert_eq!(stored.cursor, 2);
    assert_eq!(stored.pages_done, 1);
    assert_eq!(count_rows(&db, "sales").await?, 5);

    let second = executor.process_chunk(job.id).await?;
    assert_eq!(second.stop, ChunkStop::Completed);
    assert_eq!(second.chunk.pages, 2);

    // Same remote data synced in one go, on a fresh database
    let fresh = setup_test_db().await?;
    let fresh_integration = seed_integration(&fresh, "T1", &[SyncStrategy::All]).await?;
    let uninterrupted = build_executor(&fresh, &server.uri(), test_sync_config());
    let (fresh_job, _) = uninterrupted
        .jobs()
        .create_or_resume(sales_job(&fresh_integration, 3))
        .await?;
    let reference = uninterrupted.process_chunk(fresh_job.id).await?;
    assert_eq!(reference.stop, ChunkStop::Completed);

    assert_eq!(second.totals.total_new, reference.totals.total_new);
    assert_eq!(second.totals.total_new, 15);
    assert_eq!(second.totals.pages_done, 3);
    assert_eq!(count_rows(&db, "sales").await?, 15);
    Ok(())
}

#[tokio::test]
async fn cancelling_mid_page_stops_without_advancing() -> Result<()> {
    let db = setup_test_db().await?;
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v2/sales"))
        .and(query_param("page_number", "1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(sales_body(1, 2, sales_page(1)))
                .set_delay(Duration::from_millis(500)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let integration = seed_integration(&db, "T1", &[SyncStrategy::All]).await?;
    let executor = build_executor(&db, &server.uri(), test_sync_config());
    let (job, _) = executor.jobs().create_or_resume(sales_job(&integration, 5)).await?;

    let (outcome, cancelled) = tokio::join!(executor.process_chunk(job.id), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        executor.jobs().cancel("T1", job.id).await
    });
    assert_eq!(cancelled?.status, JobStatus::Cancelled);

    let outcome = outcome?;
    assert_eq!(outcome.stop, ChunkStop::Cancelled);
    assert_eq!(outcome.status, JobStatus::Cancelled);
    assert_eq!(outcome.cursor, 1);
    assert_eq!(outcome.pages_processed, 0);
    assert_eq!(outcome.totals.pages_done, 0);

    let stored = executor.jobs().find(job.id).await?.expect("job exists");
    assert_eq!(stored.cursor, 1);
    assert_eq!(stored.status, JobStatus::Cancelled);

    let logs = marketsync::models::execution_log::Entity::find()
        .filter(marketsync::models::execution_log::Column::SyncJobId.eq(job.id))
        .all(&db)
        .await?;
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, marketsync::models::LogStatus::Cancelled);
    assert_eq!(logs[0].pages_read, 0);
    Ok(())
}

/// Serves fixed sales pages and drops the job table out from under the
/// executor when page 2 is requested.
struct TableDroppingFetcher {
    db: DatabaseConnection,
}

#[async_trait]
impl PageFetcher for TableDroppingFetcher {
    async fn fetch_page(&self, request: &PageRequest) -> Result<Page, FetchError> {
        if request.page_number == 2 {
            self.db
                .execute_unprepared("ALTER TABLE sync_jobs RENAME TO sync_jobs_gone")
                .await
                .map_err(|e| FetchError::Malformed {
                    message: e.to_string(),
                })?;
        }
        let first = i64::from(request.page_number - 1) * 5 + 1;
        Ok(Page {
            records: sales_page(first),
            page_number: request.page_number,
            total_pages: Some(3),
        })
    }
}

#[tokio::test]
async fn aborted_chunk_log_keeps_pages_already_synced() -> Result<()> {
    let db = setup_test_db().await?;
    let integration = seed_integration(&db, "T1", &[SyncStrategy::All]).await?;
    let executor = marketsync::sync_executor::SyncExecutor::new(
        db.clone(),
        Arc::new(TableDroppingFetcher { db: db.clone() }),
        Arc::new(DbExecutionLogger::new(db.clone())),
        test_crypto_key(),
        test_sync_config(),
    );
    let (job, _) = executor.jobs().create_or_resume(sales_job(&integration, 3)).await?;

    let result = executor.process_chunk(job.id).await;
    assert!(matches!(result, Err(SyncEngineError::Store(JobStoreError::Database(_)))));

    let logs = marketsync::models::execution_log::Entity::find().all(&db).await?;
    assert_eq!(logs.len(), 1);
    let log = &logs[0];
    assert_eq!(log.status, marketsync::models::LogStatus::Failed);
    assert_eq!(log.pages_read, 1);
    assert_eq!(log.items_read, 5);
    assert_eq!(log.new_count, 5);
    assert!(log.finished_at.is_some());
    Ok(())
}
