//! HTTP API Routes
//!
//! REST API endpoints for the dashboard:
//! - /api/state - Read or replace the state snapshot
//! - /api/state/flush - Retry a parked save
//! - /api/memory/upload - Store a memory file
//! - /api/memory/list - List stored memory files
//! - /api/memory/status - Last autonomous dedup run
//! - /api/shopify - Store admin API proxy

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::memory::{DedupError, LibraryError, StateSnapshot};
use crate::proxy::ProxyError;
use crate::server::state::ServerState;

/// Multipart field carrying the uploaded file
pub const UPLOAD_FIELD: &str = "memoryFile";

/// Error body returned by every API route
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<LibraryError> for ApiError {
    fn from(err: LibraryError) -> Self {
        let status = match &err {
            LibraryError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            LibraryError::InvalidName(_) | LibraryError::InvalidText { .. } => {
                StatusCode::BAD_REQUEST
            }
            LibraryError::Store(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, err.to_string())
    }
}

impl From<DedupError> for ApiError {
    fn from(err: DedupError) -> Self {
        let status = match &err {
            DedupError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            DedupError::Store(_) | DedupError::Malformed(_) => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, err.to_string())
    }
}

impl From<ProxyError> for ApiError {
    fn from(err: ProxyError) -> Self {
        let status = match &err {
            ProxyError::MissingEndpoint => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

// ============================================================================
// State snapshot
// ============================================================================

/// Current snapshot plus sync status
pub async fn get_state(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let sync = state.sync.status();
    Json(json!({
        "state": state.snapshot().await,
        "connection": sync.connection(),
        "sync": sync,
    }))
}

/// Replace the snapshot and schedule a debounced save
pub async fn put_state(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<Value>,
) -> ApiResult {
    if !body.is_object() {
        return Err(ApiError::bad_request("State must be a JSON object."));
    }

    state.replace_snapshot(StateSnapshot::new(body)).await;
    let sync = state.sync.status();
    Ok(Json(json!({
        "accepted": true,
        "connection": sync.connection(),
        "sync": sync,
    })))
}

/// Retry a parked save right away
pub async fn flush_state(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let started = state.sync.flush();
    if started {
        info!("Flush requested, retrying parked state write");
    }
    Json(json!({
        "started": started,
        "sync": state.sync.status(),
    }))
}

// ============================================================================
// Memory library
// ============================================================================

/// Store the `memoryFile` part of a multipart upload
pub async fn upload_memory(
    State(state): State<Arc<ServerState>>,
    mut multipart: Multipart,
) -> ApiResult {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Invalid upload: {}", e)))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::bad_request("Uploaded file has no name."))?;
        let media_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {}", e)))?;

        let stored = state
            .library
            .store_file(&name, &media_type, &bytes)
            .await
            .map_err(|e| {
                error!("Failed to store memory file {}: {}", name, e);
                ApiError::from(e)
            })?;

        return Ok(Json(json!({
            "message": format!("Stored {} in persistent memory.", stored.name),
            "file": stored,
        })));
    }

    Err(ApiError::bad_request(format!(
        "Multipart field '{}' is required.",
        UPLOAD_FIELD
    )))
}

/// Every stored memory-file key
pub async fn list_memory(State(state): State<Arc<ServerState>>) -> ApiResult {
    let keys = state.library.list().await.map_err(|e| {
        warn!("Failed to list memory files: {}", e);
        ApiError::from(e)
    })?;
    Ok(Json(json!({ "keys": keys })))
}

/// Last autonomous dedup run, `null` if none has completed
pub async fn memory_status(State(state): State<Arc<ServerState>>) -> ApiResult {
    let status = state.dedup.status().await.map_err(|e| {
        warn!("Failed to read autonomous status: {}", e);
        ApiError::from(e)
    })?;
    Ok(Json(json!({
        "status": status,
        "scheduler": state.heartbeat(),
    })))
}

// ============================================================================
// Store proxy
// ============================================================================

pub async fn shopify_proxy(
    State(state): State<Arc<ServerState>>,
    Json(body): Json<Value>,
) -> ApiResult {
    if !state.shopify.is_configured() {
        return Err(ProxyError::NotConfigured.into());
    }
    let endpoint = body
        .get("endpoint")
        .and_then(Value::as_str)
        .ok_or(ProxyError::MissingEndpoint)?;

    let data = state.shopify.forward(endpoint).await.map_err(|e| {
        error!("Shopify proxy request for {} failed: {}", endpoint, e);
        ApiError::from(e)
    })?;
    Ok(Json(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_error_status() {
        assert_eq!(
            ApiError::from(LibraryError::NotConfigured).status,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from(LibraryError::InvalidName("..".into())).status,
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_proxy_error_status() {
        let err = ApiError::from(ProxyError::Upstream {
            status: 404,
            body: "Not Found".into(),
        });
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "Shopify API Error: 404 - Not Found");
        assert_eq!(
            ApiError::from(ProxyError::MissingEndpoint).status,
            StatusCode::BAD_REQUEST
        );
    }
}
