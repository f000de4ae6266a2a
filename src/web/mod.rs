//! HTTP layer: router, state and the JSON handlers.

use std::net::SocketAddr;
use std::num::NonZeroU16;
use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{Value, json};
use tower_http::services::ServeDir;
use tracing::{error, info};

use crate::constants::STATIC_DIR;
use crate::error::AppError;
use crate::generation::GenerationService;
use crate::storage::{Storage, StorageStats};
use crate::validate::{self, GeneratePayload};

mod download;
mod middleware;
mod views;

use middleware::RateLimiter;
pub use middleware::RateLimit;

#[derive(Clone)]
pub(crate) struct AppState {
    service: Arc<GenerationService>,
    storage: Arc<Storage>,
    limiter: Arc<RateLimiter>,
}

impl AppState {
    fn new(
        service: Arc<GenerationService>,
        storage: Arc<Storage>,
        rate_limit: Option<RateLimit>,
    ) -> Self {
        Self {
            service,
            storage,
            limiter: Arc::new(RateLimiter::new(rate_limit)),
        }
    }
}

/// Response body for the generate endpoint. The error field and the success
/// fields are mutually exclusive.
#[derive(Debug, Serialize)]
pub(crate) struct GenerateResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn generate_handler(
    State(state): State<AppState>,
    payload: Result<Json<GeneratePayload>, JsonRejection>,
) -> Result<Json<GenerateResponse>, AppError> {
    let Json(payload) = payload.map_err(|err| AppError::Validation(err.body_text()))?;
    let request = validate::build_request(payload)?;

    let outcome = state.service.generate(&request).await?;
    let artifact = state.storage.save(&request.prompt, &outcome.png)?;
    info!(
        "Stored {} ({} bytes) for prompt {:?}",
        artifact.filename, artifact.size, request.prompt
    );

    Ok(Json(GenerateResponse {
        success: true,
        download_url: Some(format!("/download/{}", artifact.filename)),
        filename: Some(artifact.filename),
        prompt: Some(request.prompt),
        generation_time: Some(outcome.elapsed.as_secs_f64()),
        file_size: Some(artifact.size),
        error: None,
    }))
}

async fn health_handler() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn stats_handler(State(state): State<AppState>) -> Result<Json<StorageStats>, AppError> {
    Ok(Json(state.storage.stats()?))
}

fn create_router(state: AppState) -> Router {
    let generate = Router::new()
        .route("/generate", post(generate_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ));

    Router::new()
        .route("/", get(views::index_handler))
        .route("/download/{filename}", get(download::download_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .merge(generate)
        .nest_service("/static", ServeDir::new(STATIC_DIR))
        .layer(axum::middleware::from_fn(middleware::security_headers))
        .with_state(state)
}

/// Builds the application state and serves it until the listener fails.
pub async fn setup_server(
    listen_addr: &str,
    port: NonZeroU16,
    service: Arc<GenerationService>,
    storage: Arc<Storage>,
    rate_limit: Option<RateLimit>,
) -> Result<(), anyhow::Error> {
    let app = create_router(AppState::new(service, storage, rate_limit));

    let addr = format!("{}:{}", listen_addr, port);
    info!("Starting server on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    // Connect info backs the rate limiter's per-peer identity.
    let app = app.into_make_service_with_connect_info::<SocketAddr>();
    if let Err(err) = axum::serve(listener, app).await {
        error!("Server error: {}", err);
    }
    Ok(())
}
