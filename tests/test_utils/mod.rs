//! Test utilities for database and marketplace testing.
//!
//! This module provides utilities for setting up in-memory SQLite databases
//! with migrations, seeding integrations, and mocking the marketplace API with
//! wiremock.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use marketsync::config::{AppConfig, RateLimitPolicyConfig, SyncConfig};
use marketsync::crypto::{ApiKey, CryptoKey};
use marketsync::execution_log::{DbExecutionLogger, ExecutionLogger};
use marketsync::marketplace::{ProxyPool, RetryPolicy, TakealotClient};
use marketsync::models::{SyncStrategy, integration};
use marketsync::orchestrator::SyncOrchestrator;
use marketsync::repositories::IntegrationRepository;
use marketsync::sync_executor::SyncExecutor;
use migration::{Migrator, MigratorTrait};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};
use serde_json::{Value, json};
use std::time::Duration;
use url::Url;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_API_KEY: &str = "seller-key-123";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;

    // Fixtures insert integrations and jobs independently; SQLite would otherwise
    // enforce relations the tests do not care about.
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = OFF".to_string(),
    ))
    .await?;

    Ok(db)
}

pub fn test_crypto_key() -> CryptoKey {
    CryptoKey::new(vec![42u8; 32]).expect("32 byte key")
}

/// Sync settings with fast timings suitable for tests.
pub fn test_sync_config() -> SyncConfig {
    SyncConfig {
        pages_per_chunk: 5,
        max_chunk_retries: 3,
        write_batch_limit: 500,
        lease_ttl_seconds: 60,
        invocation_budget_seconds: 30,
        fanout_concurrency: 2,
        fanout_batch_delay_ms: 0,
    }
}

/// Retries that finish in milliseconds.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base: Duration::from_millis(5),
        max: Duration::from_millis(20),
        jitter_factor: 0.0,
    }
}

pub fn test_app_config(server_uri: &str) -> AppConfig {
    AppConfig {
        profile: "test".to_string(),
        operator_tokens: vec!["test-operator-token".to_string()],
        cron_secret: Some("test-cron-secret".to_string()),
        crypto_key: Some(vec![42u8; 32]),
        marketplace: marketsync::config::MarketplaceConfig {
            api_base: server_uri.to_string(),
            request_timeout_ms: 5_000,
            page_size: 100,
        },
        sync: test_sync_config(),
        rate_limit_policy: RateLimitPolicyConfig {
            max_attempts: 3,
            base_ms: 5,
            max_ms: 20,
            jitter_factor: 0.0,
        },
        ..AppConfig::default()
    }
}

pub fn takealot_client(server_uri: &str) -> TakealotClient {
    TakealotClient::new(
        Url::parse(server_uri).expect("mock server uri"),
        ProxyPool::direct(Duration::from_secs(5)).expect("direct client"),
        fast_retry(),
    )
}

/// Executor wired to the mock marketplace and a database-backed logger.
pub fn build_executor(db: &DatabaseConnection, server_uri: &str, config: SyncConfig) -> SyncExecutor {
    build_executor_with_logger(
        db,
        server_uri,
        config,
        Arc::new(DbExecutionLogger::new(db.clone())),
    )
}

pub fn build_executor_with_logger(
    db: &DatabaseConnection,
    server_uri: &str,
    config: SyncConfig,
    logger: Arc<dyn ExecutionLogger>,
) -> SyncExecutor {
    SyncExecutor::new(
        db.clone(),
        Arc::new(takealot_client(server_uri)),
        logger,
        test_crypto_key(),
        config,
    )
}

pub fn build_orchestrator(
    db: &DatabaseConnection,
    server_uri: &str,
    config: SyncConfig,
) -> SyncOrchestrator {
    SyncOrchestrator::new(build_executor(db, server_uri, config), 100)
}

/// Creates an active integration with an encrypted test API key.
pub async fn seed_integration(
    db: &DatabaseConnection,
    tenant_id: &str,
    strategies: &[SyncStrategy],
) -> Result<integration::Model> {
    IntegrationRepository::new(db.clone(), test_crypto_key())
        .create(
            tenant_id,
            &format!("{tenant_id} store"),
            &ApiKey::new(TEST_API_KEY),
            strategies,
        )
        .await
}

pub fn sale(order_id: i64, price: f64) -> Value {
    json!({
        "order_id": order_id,
        "order_item_id": order_id * 10,
        "tsin": 9000 + order_id,
        "sku": format!("SKU-{order_id}"),
        "product_title": format!("Product {order_id}"),
        "quantity": 1,
        "selling_price": price,
        "sale_status": "Shipped to Customer",
        "order_date": "15 Jan 2026 10:30:00",
    })
}

pub fn offer(tsin: i64, price: f64, stock: i64) -> Value {
    json!({
        "tsin_id": tsin,
        "offer_id": tsin + 1_000_000,
        "sku": format!("OFFER-{tsin}"),
        "barcode": format!("600{tsin}"),
        "title": format!("Offer {tsin}"),
        "selling_price": price,
        "rrp": price * 1.2,
        "stock_at_takealot_total": stock,
        "total_stock_on_way": 0,
        "status": "Buyable",
    })
}

pub fn sales_body(page_number: u32, total_pages: u32, sales: Vec<Value>) -> Value {
    json!({
        "sales": sales,
        "page_summary": { "page_number": page_number, "total_pages": total_pages },
    })
}

pub fn offers_body(page_number: u32, total_pages: u32, offers: Vec<Value>) -> Value {
    json!({
        "offers": offers,
        "page_summary": { "page_number": page_number, "total_pages": total_pages },
    })
}

/// Serves `body` for `GET {endpoint}?page_number={page}`.
pub async fn mount_page(server: &MockServer, endpoint: &str, page: u32, body: Value) {
    Mock::given(method("GET"))
        .and(path(endpoint))
        .and(query_param("page_number", page.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Five sales per page, order ids starting at `first`.
pub fn sales_page(first: i64) -> Vec<Value> {
    (first..first + 5).map(|id| sale(id, 100.0 + id as f64)).collect()
}

pub async fn count_rows(db: &DatabaseConnection, table: &str) -> Result<i64> {
    let row = db
        .query_one(Statement::from_string(
            db.get_database_backend(),
            format!("SELECT COUNT(*) AS n FROM {table}"),
        ))
        .await?
        .expect("count row");
    Ok(row.try_get("", "n")?)
}
