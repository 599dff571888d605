use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use uuid::Uuid;

use crate::geojson::{current_to_geojson, history_to_geojson};
use crate::store::SnapshotStore;

const ICAO_MAX_LEN: usize = 6;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn SnapshotStore>,
}

/// Error body returned by the read API
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

async fn index() -> impl IntoResponse {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn current_aircraft(State(state): State<AppState>) -> Result<Response, ApiError> {
    let aircraft = state.store.current_aircraft().await.map_err(|e| {
        error!("Failed to load current aircraft: {}", e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "failed to load current aircraft")
    })?;

    Ok(Json(current_to_geojson(&aircraft)).into_response())
}

async fn aircraft_history(
    State(state): State<AppState>,
    Path(icao): Path<String>,
) -> Result<Response, ApiError> {
    let icao = icao.trim().to_ascii_uppercase();
    if icao.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "ICAO code cannot be empty"));
    }
    if icao.len() > ICAO_MAX_LEN {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "ICAO code cannot be longer than 6 characters",
        ));
    }

    let points = state.store.history(&icao).await.map_err(|e| {
        error!("Failed to load history for {}: {}", icao, e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "failed to load history")
    })?;

    let collection = history_to_geojson(&points)
        .map_err(|e| ApiError::new(StatusCode::NOT_FOUND, e.to_string()))?;
    Ok(Json(collection).into_response())
}

async fn request_logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = Uuid::new_v4().simple().to_string()[..8].to_string();
    let start_time = Instant::now();

    let response = next.run(request).await;
    let status = response.status();

    metrics::counter!("web.requests_total", "status" => status.as_u16().to_string()).increment(1);
    info!(
        "{} {} [{}] {} in {:.2}ms",
        method,
        path,
        request_id,
        status.as_u16(),
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    response
}

pub fn router(store: Arc<dyn SnapshotStore>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/aircraft/current", get(current_aircraft))
        .route("/aircraft/history/{icao}", get(aircraft_history))
        .with_state(AppState { store })
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(CorsLayer::permissive())
}

pub async fn start_web_server(
    interface: String,
    port: u16,
    store: Arc<dyn SnapshotStore>,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", interface, port)).await?;
    info!("Web server listening on http://{}:{}", interface, port);

    axum::serve(listener, router(store))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
