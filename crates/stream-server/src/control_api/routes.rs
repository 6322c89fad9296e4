/// Route handlers for the renderer API

use super::types::*;
use crate::stream::ClientRegistry;
use crate::upnp::ControlHandle;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use wavecast_core::{RendererRegistry, SelectionStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: RendererRegistry,
    pub store: Arc<dyn SelectionStore>,
    pub control: ControlHandle,
    pub clients: ClientRegistry,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/renderers", get(list_renderers))
        .route(
            "/api/renderers/selection",
            post(set_selection).delete(clear_selection),
        )
        .route("/api/health", get(health_check))
        .with_state(state)
}

/// GET /api/renderers - Every known renderer with its selection flag
async fn list_renderers(State(state): State<AppState>) -> Response {
    debug!("GET /api/renderers");

    let renderers = state
        .registry
        .snapshot()
        .into_iter()
        .map(|renderer| (renderer.uuid.clone(), renderer))
        .collect();

    Json(RenderersResponse { renderers }).into_response()
}

/// POST /api/renderers/selection - Replace the persisted selection
async fn set_selection(
    State(state): State<AppState>,
    Json(req): Json<SelectionRequest>,
) -> Response {
    info!("POST /api/renderers/selection: {} renderer(s)", req.renderers.len());

    if let Err(e) = state.store.set_selected_renderers(&req.renderers).await {
        error!("Failed to store selection: {}", e);
        return store_error("Failed to store selection", e);
    }
    notify_control(&state);

    let response = SuccessResponse {
        success: true,
        message: format!("Selected {} renderer(s)", req.renderers.len()),
    };
    (StatusCode::OK, Json(response)).into_response()
}

/// DELETE /api/renderers/selection - Forget every selected renderer
async fn clear_selection(State(state): State<AppState>) -> Response {
    info!("DELETE /api/renderers/selection");

    if let Err(e) = state.store.erase_selected_renderers().await {
        error!("Failed to erase selection: {}", e);
        return store_error("Failed to erase selection", e);
    }
    notify_control(&state);

    let response = SuccessResponse {
        success: true,
        message: "Selection cleared".to_string(),
    };
    (StatusCode::OK, Json(response)).into_response()
}

fn notify_control(state: &AppState) {
    if !state.control.configuration_changed() {
        warn!("Selection stored but the control engine could not be notified");
    }
}

fn store_error(message: &str, e: anyhow::Error) -> Response {
    let response = ErrorResponse {
        error: message.to_string(),
        details: Some(e.to_string()),
    };
    (StatusCode::INTERNAL_SERVER_ERROR, Json(response)).into_response()
}

/// GET /api/health - Health check
async fn health_check(State(state): State<AppState>) -> Response {
    let response = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        clients: state.clients.len(),
        renderers: state.registry.len(),
    };

    Json(response).into_response()
}
