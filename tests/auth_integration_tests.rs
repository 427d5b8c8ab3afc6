//! Integration tests for operator authentication, tenant validation and the
//! cron secret, against a server bound to a real socket.

use std::sync::Arc;

use anyhow::{Context, Result as AnyhowResult};
use marketsync::config::AppConfig;
use marketsync::execution_log::NoopExecutionLogger;
use marketsync::server::{AppState, create_app};
use reqwest::StatusCode;
use serde_json::Value;
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};

mod test_utils;

struct TestServerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<AnyhowResult<()>>>,
}

impl TestServerHandle {
    fn new(shutdown_tx: oneshot::Sender<()>, join_handle: JoinHandle<AnyhowResult<()>>) -> Self {
        Self {
            shutdown_tx: Some(shutdown_tx),
            join_handle: Some(join_handle),
        }
    }

    async fn shutdown(mut self) -> AnyhowResult<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(handle) = self.join_handle.take() {
            let result = handle.await.context("server task join failed")?;
            result?;
        }

        Ok(())
    }
}

impl Drop for TestServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

fn config() -> AppConfig {
    AppConfig {
        operator_tokens: vec!["token-a".to_string(), "token-b".to_string()],
        cron_secret: Some("cron-secret".to_string()),
        ..test_utils::test_app_config("http://127.0.0.1:9")
    }
}

/// Test helper to spawn a test server
async fn spawn_test_app(config: AppConfig) -> (String, TestServerHandle) {
    let db = test_utils::setup_test_db().await.unwrap();
    let state = AppState::new(config, db, Arc::new(NoopExecutionLogger)).unwrap();
    let app = create_app(state);

    // Bind to a random port
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server_url = format!("http://{}", addr);

    let (ready_tx, ready_rx) = oneshot::channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let server_task = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let _ = ready_tx.send(());

        server.await.context("axum server error")
    });

    ready_rx.await.expect("server task to signal readiness");

    (server_url, TestServerHandle::new(shutdown_tx, server_task))
}

#[tokio::test]
async fn test_public_endpoints_no_auth_required() {
    let (server_url, handle) = spawn_test_app(config()).await;
    let client = reqwest::Client::new();

    for path in ["/", "/healthz", "/docs", "/openapi.json"] {
        let response = client
            .get(format!("{server_url}{path}"))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{path}");
    }

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_and_malformed_authorization() {
    let (server_url, handle) = spawn_test_app(config()).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{server_url}/jobs"))
        .header("X-Tenant-Id", "T1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client
        .get(format!("{server_url}/jobs"))
        .header("Authorization", "Basic dXNlcjpwYXNz")
        .header("X-Tenant-Id", "T1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client
        .get(format!("{server_url}/jobs"))
        .header("Authorization", "Bearer not-a-token")
        .header("X-Tenant-Id", "T1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_every_configured_token_is_accepted() {
    let (server_url, handle) = spawn_test_app(config()).await;
    let client = reqwest::Client::new();

    for token in ["token-a", "token-b"] {
        let response = client
            .get(format!("{server_url}/jobs"))
            .bearer_auth(token)
            .header("X-Tenant-Id", "store-42")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{token}");
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["jobs"], serde_json::json!([]));
    }

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_or_invalid_tenant_header() {
    let (server_url, handle) = spawn_test_app(config()).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{server_url}/logs"))
        .bearer_auth("token-a")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .get(format!("{server_url}/logs"))
        .bearer_auth("token-a")
        .header("X-Tenant-Id", "tenant with spaces")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cron_routes_use_the_cron_secret_only() {
    let (server_url, handle) = spawn_test_app(config()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{server_url}/cron/sync/products"))
        .bearer_auth("token-a")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // No integrations seeded, so the fan-out is empty
    let response = client
        .post(format!("{server_url}/cron/sync/products"))
        .bearer_auth("cron-secret")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["tenants"], serde_json::json!([]));

    // The cron secret does not open operator routes
    let response = client
        .get(format!("{server_url}/jobs"))
        .bearer_auth("cron-secret")
        .header("X-Tenant-Id", "T1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cron_disabled_without_secret() {
    let config = AppConfig {
        cron_secret: None,
        ..config()
    };
    let (server_url, handle) = spawn_test_app(config).await;

    let response = reqwest::Client::new()
        .post(format!("{server_url}/cron/sync/sales"))
        .bearer_auth("anything")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_openapi_security_scheme() {
    let (server_url, handle) = spawn_test_app(config()).await;

    let openapi: Value = reqwest::Client::new()
        .get(format!("{server_url}/openapi.json"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let bearer_auth = &openapi["components"]["securitySchemes"]["bearer_auth"];
    assert_eq!(bearer_auth["type"], "http");
    assert_eq!(bearer_auth["scheme"], "bearer");

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_error_response_format() {
    let (server_url, handle) = spawn_test_app(config()).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{server_url}/jobs"))
        .header("X-Tenant-Id", "T1")
        .header("x-request-id", "req-123")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/problem+json"
    );
    assert_eq!(response.headers().get("x-request-id").unwrap(), "req-123");

    let error: Value = response.json().await.unwrap();
    assert_eq!(error["code"], "UNAUTHORIZED");
    assert!(error.get("message").is_some());
    assert_eq!(error["trace_id"], "req-123");

    let response = client
        .get(format!("{server_url}/jobs"))
        .bearer_auth("token-a")
        .send()
        .await
        .unwrap();
    let error: Value = response.json().await.unwrap();
    assert_eq!(error["code"], "VALIDATION_FAILED");
    assert!(error["details"]["X-Tenant-Id"].is_string());

    handle.shutdown().await.unwrap();
}
