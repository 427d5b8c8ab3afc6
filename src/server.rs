//! # Server Configuration
//!
//! Router, shared state and OpenAPI document for the marketsync HTTP surface.

use std::sync::Arc;

use axum::{
    Router,
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use anyhow::Context;

use crate::auth::{auth_middleware, cron_auth_middleware};
use crate::config::AppConfig;
use crate::crypto::CryptoKey;
use crate::execution_log::ExecutionLogger;
use crate::handlers;
use crate::marketplace::TakealotClient;
use crate::orchestrator::SyncOrchestrator;
use crate::sync_executor::SyncExecutor;
use crate::telemetry::{self, TraceContext};

const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub orchestrator: SyncOrchestrator,
}

impl AppState {
    /// Wires the marketplace client, executor and orchestrator from configuration.
    pub fn new(
        config: AppConfig,
        db: DatabaseConnection,
        logger: Arc<dyn ExecutionLogger>,
    ) -> anyhow::Result<Self> {
        let key_bytes = config
            .crypto_key
            .clone()
            .context("MARKETSYNC_CRYPTO_KEY must be set")?;
        let crypto_key = CryptoKey::new(key_bytes).context("invalid crypto key")?;
        let client = TakealotClient::from_config(&config)
            .context("failed to build marketplace client")?;

        let executor = SyncExecutor::new(
            db.clone(),
            Arc::new(client),
            logger,
            crypto_key,
            config.sync.clone(),
        );
        let orchestrator = SyncOrchestrator::new(executor, config.marketplace.page_size);

        Ok(Self {
            config: Arc::new(config),
            db,
            orchestrator,
        })
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let config = Arc::clone(&state.config);

    let operator_routes = Router::new()
        .route(
            "/sync/{data_type}",
            get(handlers::sync::manual_sync).post(handlers::sync::manual_sync),
        )
        .route("/jobs", get(handlers::jobs::list_jobs))
        .route("/jobs/{id}", get(handlers::jobs::get_job))
        .route("/jobs/{id}/process", post(handlers::jobs::process_job))
        .route("/jobs/{id}/cancel", post(handlers::jobs::cancel_job))
        .route("/logs", get(handlers::logs::list_logs))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&config),
            auth_middleware,
        ));

    let cron_routes = Router::new()
        .route(
            "/cron/sync/{data_type}",
            get(handlers::sync::cron_sync).post(handlers::sync::cron_sync),
        )
        .layer(middleware::from_fn_with_state(config, cron_auth_middleware));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .merge(operator_routes)
        .merge(cron_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Runs the request inside a trace context, reusing the caller's `x-request-id`
/// when present and echoing it on the response.
async fn trace_context_middleware(mut request: Request, next: Next) -> Response {
    let context = request
        .headers()
        .get(&REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .map(TraceContext::new)
        .unwrap_or_else(TraceContext::generated);

    request.extensions_mut().insert(context.clone());
    let trace_id = context.trace_id.clone();

    let mut response = telemetry::with_trace_context(context, next.run(request)).await;
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Starts the server with the given configuration
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let addr = state.config.bind_addr()?;
    let profile = state.config.profile.clone();
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, %profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(%error, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::sync::manual_sync,
        crate::handlers::sync::cron_sync,
        crate::handlers::jobs::list_jobs,
        crate::handlers::jobs::get_job,
        crate::handlers::jobs::process_job,
        crate::handlers::jobs::cancel_job,
        crate::handlers::logs::list_logs,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::handlers::HealthStatus,
            crate::models::JobStatus,
            crate::models::DataType,
            crate::models::SyncStrategy,
            crate::models::TriggerType,
            crate::models::LogStatus,
            crate::error::ApiError,
            crate::handlers::types::TriggerResponse,
            crate::handlers::types::CronTriggerResponse,
            crate::handlers::jobs::JobInfo,
            crate::handlers::jobs::JobsResponse,
            crate::handlers::logs::ExecutionLogInfo,
            crate::handlers::logs::LogsResponse,
            crate::orchestrator::TenantSyncResult,
            crate::sync_executor::ChunkOutcome,
            crate::sync_executor::ChunkStop,
            crate::sync_executor::ChunkCounts,
            crate::sync_executor::JobTotals,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "marketsync API",
        description = "Resumable marketplace sync engine: triggers, jobs and execution logs",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
