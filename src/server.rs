//! HTTP front end for one-off classifications.
//!
//! Accepts an uploaded image and runs the same classify → match → refine
//! pipeline as the directory watcher, returning the report as JSON.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/classify` | Raw image bytes in the body; returns a report |
//! | `GET`  | `/picklist` | The loaded catalog |
//! | `GET`  | `/health` | Health check (returns version and model) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "request body must contain an image" } }
//! ```
//!
//! Error codes: `bad_request` (400), `internal` (500).
//!
//! Each request gets its own gateway and resolver, so Sessions are never
//! shared between requests. The vision backend and picklist are shared
//! read-only. Classification retries are capped by `[server].max_attempts`.

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::gateway::{load_prompt, ClassificationGateway};
use crate::matcher::Matcher;
use crate::models::Product;
use crate::picklist::Picklist;
use crate::resolver::{Report, Resolver, RetryPolicy};
use crate::vision::{create_model, VisionModel};
use crate::watcher::Shutdown;

/// Uploads above this size are rejected by axum with 413.
const MAX_IMAGE_BYTES: usize = 20 * 1024 * 1024;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    model: Arc<dyn VisionModel>,
    picklist: Arc<Picklist>,
    /// Few-shot prompt, read once at startup.
    prompt: Arc<str>,
}

/// Starts the HTTP server with the configured vision backend and picklist.
///
/// Runs until `shutdown` fires.
pub async fn run_server(config: &Config, shutdown: Shutdown) -> anyhow::Result<()> {
    let model = create_model(&config.model)?;
    let picklist = Arc::new(Picklist::load(&config.picklist.path));
    run_server_with_model(config, model, picklist, shutdown).await
}

/// Starts the HTTP server with an explicit vision backend and catalog.
pub async fn run_server_with_model(
    config: &Config,
    model: Arc<dyn VisionModel>,
    picklist: Arc<Picklist>,
    shutdown: Shutdown,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState {
        config: Arc::new(config.clone()),
        prompt: Arc::from(load_prompt(&config.prompt.path)),
        model,
        picklist,
    };

    let app = router(state);

    println!("scout server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.wait().await })
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/classify", post(handle_classify))
        .route("/picklist", get(handle_picklist))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES))
        .layer(cors)
        .with_state(state)
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

/// Internal error type that converts into an Axum HTTP response.
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

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    model: String,
    products: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        model: state.model.model_name().to_string(),
        products: state.picklist.len(),
    })
}

// ============ GET /picklist ============

#[derive(Serialize)]
struct PicklistResponse {
    products: Vec<Product>,
}

async fn handle_picklist(State(state): State<AppState>) -> Json<PicklistResponse> {
    Json(PicklistResponse {
        products: state.picklist.products().to_vec(),
    })
}

// ============ POST /classify ============

/// Handler for `POST /classify`.
///
/// Returns `400` for an empty body. Model failures are not HTTP errors; they
/// come back as an `unclassified` report.
async fn handle_classify(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Report>, AppError> {
    if body.is_empty() {
        return Err(bad_request("request body must contain an image"));
    }

    let retry = RetryPolicy::from_config(&state.config.retry)
        .with_max_attempts(state.config.server.max_attempts);
    let mut resolver = Resolver::new(
        ClassificationGateway::new(state.model.clone(), state.prompt.as_ref()),
        Matcher::new(state.picklist.clone()),
        retry,
        state.config.refine.clone(),
    );

    let report = resolver
        .resolve_bytes(&body)
        .await
        .map_err(|e| internal(e.to_string()))?;

    tracing::info!(id = %report.id, bytes = body.len(), "classify request resolved");
    Ok(Json(report))
}
