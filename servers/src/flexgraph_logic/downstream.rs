use crate::flexgraph_logic::state::AppState;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use lib_flexgraph::{EngineError, InstrumentSnapshot};
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// # API Error
///
/// Errors surfaced to HTTP clients as `{error_type, message}` JSON bodies.
#[derive(Debug)]
pub enum ApiError {
    /// The requested instrument has never been observed.
    NotFound(String),
    /// The request body could not be decoded.
    BadRequest(String),
    /// The poller could not be reached.
    Unavailable(String),
    /// Anything else the engine reported.
    Engine(EngineError),
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::NotFound(id) => ApiError::NotFound(id),
            other => ApiError::Engine(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_json) = match self {
            ApiError::NotFound(id) => (
                StatusCode::NOT_FOUND,
                json!({
                    "error_type": "InstrumentNotFound",
                    "message": format!("Unknown instrument '{}'", id),
                }),
            ),
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                json!({
                    "error_type": "InvalidRequestBody",
                    "message": msg,
                }),
            ),
            ApiError::Unavailable(msg) => {
                warn!("Ingest command rejected: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({
                        "error_type": "PollerUnavailable",
                        "message": msg,
                    }),
                )
            }
            ApiError::Engine(e) => {
                error!("Engine error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({
                        "error_type": "EngineError",
                        "message": e.to_string(),
                    }),
                )
            }
        };
        (status, Json(error_json)).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct PauseRequest {
    pub paused: bool,
}

#[derive(Debug, Deserialize)]
pub struct WindowRequest {
    pub seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct FieldsRequest {
    pub fields: BTreeSet<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClearRequest {
    #[serde(default)]
    pub rescan: bool,
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/instruments", get(list_handler))
        .route("/instruments/{id}", get(snapshot_handler))
        .route("/instruments/{id}/pause", post(pause_handler))
        .route("/instruments/{id}/window", post(window_handler))
        .route("/instruments/{id}/fields", post(fields_handler))
        .route("/instruments/{id}/clear", post(clear_handler))
        .route("/display", get(display_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(app_state)
}

pub async fn run(port: u16, app_state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let app = router(app_state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Downstream server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("Downstream server shutting down.");
        })
        .await?;
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn list_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.snapshots.overview())
}

async fn snapshot_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InstrumentSnapshot>, ApiError> {
    Ok(Json(state.snapshots.build(&id)?))
}

async fn pause_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<InstrumentSnapshot>, ApiError> {
    let request: PauseRequest = decode(&body)?;
    state.registry.set_paused(&id, request.paused)?;
    Ok(Json(state.snapshots.build(&id)?))
}

async fn window_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<InstrumentSnapshot>, ApiError> {
    let request: WindowRequest = decode(&body)?;
    state.registry.set_window(&id, request.seconds)?;
    Ok(Json(state.snapshots.build(&id)?))
}

async fn fields_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<InstrumentSnapshot>, ApiError> {
    let request: FieldsRequest = decode(&body)?;
    state.registry.set_selected_fields(&id, request.fields)?;
    Ok(Json(state.snapshots.build(&id)?))
}

async fn clear_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    // the body is optional: an empty POST is a plain clear
    let request: ClearRequest = if body.is_empty() { ClearRequest::default() } else { decode(&body)? };
    let removed = state.registry.clear(&id)?;
    if request.rescan {
        state.request_rescan(&id).map_err(ApiError::Unavailable)?;
    }
    Ok(Json(json!({
        "instrument": id,
        "removed": removed,
        "rescan": request.rescan,
    })))
}

async fn display_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.display.as_ref().clone())
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "instruments": state.registry.len(),
        "ingest": state.metrics.snapshot(),
    }))
}

fn decode<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}
