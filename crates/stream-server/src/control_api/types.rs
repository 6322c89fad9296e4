/// Type definitions for the renderer API

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use wavecast_core::{Renderer, SelectedRenderers};

/// Response for GET /api/renderers, keyed by uuid
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderersResponse {
    pub renderers: BTreeMap<String, Renderer>,
}

/// Request for POST /api/renderers/selection: uuid -> display name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionRequest {
    pub renderers: SelectedRenderers,
}

/// Response for GET /api/health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub clients: usize,
    pub renderers: usize,
}

/// Generic success response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: Option<String>,
}
