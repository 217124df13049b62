//! JSON HTTP API over the synchronizer and the query engine.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/sync` | Run a sync pass and return its summary |
//! | `GET`  | `/sync/status` | Current phase, start time, last summary or error |
//! | `POST` | `/sync/cancel` | Request cancellation of the active run |
//! | `POST` | `/search` | Hybrid search |
//! | `GET`  | `/stats` | Collection and ledger statistics |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "sync_already_running", "message": "a sync run is already in progress" } }
//! ```
//!
//! Error codes: `bad_request` (400), `sync_already_running` (409),
//! `embedding_unavailable` (503), `index_unavailable` (503),
//! `config_error` (500), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::time::Instant;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::engine::Engine;
use crate::error::CmdexError;
use crate::models::{EntityType, SearchResult, Version};
use crate::query::SearchFilters;
use crate::stats::{collect_stats, StatsReport};
use crate::sync::{SyncOptions, SyncStatusReport, SyncSummary};

/// Starts the HTTP server on `[server].bind`. Runs until the process is
/// terminated.
pub async fn run_server(engine: Engine) -> anyhow::Result<()> {
    let bind_addr = engine.config.server.bind.clone();
    let app = build_router(engine);

    info!("cmdex server listening on http://{}", bind_addr);
    println!("cmdex server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

pub fn build_router(engine: Engine) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/sync", post(handle_sync))
        .route("/sync/status", get(handle_sync_status))
        .route("/sync/cancel", post(handle_sync_cancel))
        .route("/search", post(handle_search))
        .route("/stats", get(handle_stats))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(engine)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

impl From<CmdexError> for AppError {
    fn from(err: CmdexError) -> Self {
        let (status, code) = match &err {
            CmdexError::SyncAlreadyRunning => (StatusCode::CONFLICT, err.code()),
            CmdexError::EmbeddingUnavailable(_) | CmdexError::IndexUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, err.code())
            }
            CmdexError::PermanentConfig(_) => (StatusCode::INTERNAL_SERVER_ERROR, err.code()),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        if status.is_server_error() {
            error!(code, error = %err, "request failed");
        }
        AppError {
            status,
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /sync ============

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SyncRequest {
    #[serde(default)]
    reset: bool,
}

/// Runs the pass on its own task so a dropped connection does not abort
/// it halfway; the response waits for the summary.
async fn handle_sync(
    State(engine): State<Engine>,
    body: Option<Json<SyncRequest>>,
) -> Result<Json<SyncSummary>, AppError> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let sync = engine.synchronizer.clone();
    let options = SyncOptions {
        reset: request.reset,
    };
    let summary = tokio::spawn(async move { sync.run(options).await })
        .await
        .map_err(|e| CmdexError::Other(anyhow::anyhow!("sync task failed: {}", e)))??;
    Ok(Json(summary))
}

// ============ GET /sync/status ============

async fn handle_sync_status(State(engine): State<Engine>) -> Json<SyncStatusReport> {
    Json(engine.synchronizer.status().await)
}

// ============ POST /sync/cancel ============

#[derive(Serialize)]
struct CancelResponse {
    cancelled: bool,
}

async fn handle_sync_cancel(State(engine): State<Engine>) -> Json<CancelResponse> {
    Json(CancelResponse {
        cancelled: engine.synchronizer.cancel(),
    })
}

// ============ POST /search ============

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchRequest {
    query: String,
    #[serde(default)]
    version: Option<u8>,
    #[serde(default)]
    include_deprecated: bool,
    #[serde(default)]
    entity_types: Option<Vec<String>>,
    #[serde(default)]
    include_all_chunks: bool,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SearchResponse {
    results: Vec<SearchResult>,
    duration_ms: u64,
}

fn parse_filters(req: &SearchRequest) -> Result<SearchFilters, AppError> {
    let version = req
        .version
        .map(Version::try_from)
        .transpose()
        .map_err(bad_request)?;
    let entity_types = req
        .entity_types
        .as_ref()
        .map(|types| {
            types
                .iter()
                .map(|t| t.parse::<EntityType>())
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()
        .map_err(bad_request)?;
    if matches!(&entity_types, Some(types) if types.is_empty()) {
        return Err(bad_request("entityTypes must not be empty"));
    }
    Ok(SearchFilters {
        version,
        include_deprecated: req.include_deprecated,
        entity_types,
        include_all_chunks: req.include_all_chunks,
    })
}

async fn handle_search(
    State(engine): State<Engine>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, AppError> {
    if req.limit == Some(0) {
        return Err(bad_request("limit must be >= 1"));
    }
    let filters = parse_filters(&req)?;

    let started = Instant::now();
    let results = engine.query.query(&req.query, &filters, req.limit).await?;

    Ok(Json(SearchResponse {
        results,
        duration_ms: started.elapsed().as_millis() as u64,
    }))
}

// ============ GET /stats ============

async fn handle_stats(State(engine): State<Engine>) -> Result<Json<StatsReport>, AppError> {
    let report = collect_stats(engine.index.as_ref(), &engine.ledger)
        .await
        .map_err(|e| match e {
            CmdexError::TransientIo(m) | CmdexError::PermanentConfig(m) => {
                CmdexError::IndexUnavailable(m)
            }
            other => other,
        })?;
    Ok(Json(report))
}
