//! API Service - Lookup front door for the numbering registry
//!
//! Endpoints:
//! - GET /health - Health check
//! - GET /api/:phone - Operator and region owning an 11-digit number
//! - POST /api/parse/:file_num - Start ingestion of one source file
//! - POST /api/parse_all?only_changed= - Start ingestion of every source file

use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use registry::lookup::lookup_subscriber;
use registry::model::{find_source, SourceFile};
use registry::{build_ingestor, Config, FileReport, IngestError, Ingestor, LookupError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// ============================================================================
// State
// ============================================================================

#[derive(Clone)]
struct AppState {
    ingestor: Ingestor,
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

#[derive(Serialize)]
struct AcceptedResponse {
    accepted: bool,
    sources: Vec<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// ============================================================================
// Query params
// ============================================================================

#[derive(Deserialize)]
struct ParseAllQuery {
    #[serde(default)]
    only_changed: bool,
}

fn error_response(status: StatusCode, error: impl ToString) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn lookup_handler(State(state): State<Arc<AppState>>, Path(phone): Path<String>) -> impl IntoResponse {
    match lookup_subscriber(state.ingestor.pool(), &phone).await {
        Ok(Some(info)) => Json(info).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("Number {} not found", phone)),
        Err(e @ LookupError::InvalidNumber(_)) => error_response(StatusCode::UNPROCESSABLE_ENTITY, e),
        Err(e) => {
            error!(phone = %phone, error = %e, "lookup failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

/// Background body of `POST /api/parse/:file_num`.
async fn run_scheduled(ingestor: Ingestor, source: SourceFile) -> Result<FileReport, IngestError> {
    let result = ingestor.ingest_file(&source, false).await;
    match &result {
        Ok(report) => info!(source = %source.id, outcome = ?report.outcome, "scheduled ingestion finished"),
        Err(e) => warn!(source = %source.id, kind = e.kind(), error = %e, "scheduled ingestion failed"),
    }
    result
}

async fn parse_file_handler(State(state): State<Arc<AppState>>, Path(file_num): Path<String>) -> impl IntoResponse {
    let Some(source) = find_source(state.ingestor.sources(), &file_num).cloned() else {
        return error_response(StatusCode::NOT_FOUND, format!("Unknown source file {}", file_num));
    };

    let ingestor = state.ingestor.clone();
    let source_id = source.id.clone();
    tokio::spawn(run_scheduled(ingestor, source));

    info!(source = %source_id, "ingestion scheduled");
    (
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            accepted: true,
            sources: vec![source_id],
        }),
    )
        .into_response()
}

async fn parse_all_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ParseAllQuery>,
) -> impl IntoResponse {
    let ingestor = state.ingestor.clone();
    let sources = ingestor.sources().iter().map(|s| s.id.clone()).collect();
    tokio::spawn(async move {
        let results = ingestor.ingest_all(params.only_changed).await;
        let failed = results.iter().filter(|r| r.result.is_err()).count();
        if failed > 0 {
            warn!(failed, total = results.len(), "ingest-all finished with failures");
        } else {
            info!(total = results.len(), "ingest-all finished");
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            accepted: true,
            sources,
        }),
    )
}

fn router(state: Arc<AppState>) -> Router {
    // CORS for web frontend
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/:phone", get(lookup_handler))
        .route("/api/parse/:file_num", post(parse_file_handler))
        .route("/api/parse_all", post(parse_all_handler))
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env().context("Invalid configuration")?;

    println!("=== Numbering Registry API ===");
    println!("Connecting to database...");

    let ingestor = build_ingestor(&config)
        .await
        .context("Failed to initialise registry")?;

    println!("Database connected");

    let app = router(Arc::new(AppState { ingestor }));

    println!("API listening on http://{}", config.api_bind);
    println!("\nEndpoints:");
    println!("  GET  /health");
    println!("  GET  /api/:phone");
    println!("  POST /api/parse/:file_num");
    println!("  POST /api/parse_all?only_changed=");

    let listener = tokio::net::TcpListener::bind(&config.api_bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
