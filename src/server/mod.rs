//! Luminous Headless Server
//!
//! Serves the dashboard's static build and the HTTP API it talks to:
//! state snapshot sync, the memory library and the store proxy. The
//! autonomous memory heartbeat runs alongside the listener.

pub mod api;
pub mod auth;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{info, warn};

use crate::memory::LoadOutcome;
use crate::scheduler::HeartbeatEngine;
use crate::server::api::{
    flush_state, get_state, list_memory, memory_status, put_state, shopify_proxy, upload_memory,
};
use crate::server::auth::{auth_middleware, AuthConfig};
use crate::server::state::ServerState;

// Re-export ServerConfig from config module
pub use crate::config::server::ServerConfig;

/// Luminous server instance
pub struct LuminousServer {
    config: ServerConfig,
    state: Arc<ServerState>,
    heartbeat: HeartbeatEngine,
}

impl LuminousServer {
    /// Create a new server instance.
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ServerConfig) -> Self {
        let state = ServerState::from_config(&config);
        let heartbeat = HeartbeatEngine::new(state.dedup.clone(), config.dedup_interval());
        let state = Arc::new(state.with_heartbeat(heartbeat.state_handle()));

        Self {
            config,
            state,
            heartbeat,
        }
    }

    /// Load persisted state, start the heartbeat and serve until `shutdown`
    /// is cancelled. Unsaved dashboard changes are written before returning.
    pub async fn start(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let addr: SocketAddr = self
            .config
            .bind_addr()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid address: {}", e))?;

        let outcome = self.state.sync.load().await;
        match &outcome {
            LoadOutcome::Remote(_) => info!("Restored state from persistent memory"),
            LoadOutcome::Initialized(_) => info!("Initialized persistent memory with default state"),
            LoadOutcome::NotConfigured(_) => warn!("Running without persistent memory"),
            LoadOutcome::Fallback { error, .. } => warn!("Using local fallback state: {}", error),
        }
        self.state.install_loaded(outcome.into_snapshot()).await;

        let heartbeat = self.heartbeat.spawn(shutdown.child_token());

        let app = build_router(&self.config, Arc::clone(&self.state));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind: {}", e))?;

        info!("Luminous server listening on {}", addr);
        info!("API endpoints available at http://{}/api", addr);
        info!("Serving dashboard from {}", self.config.public_dir.display());

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .await
            .map_err(|e| anyhow::anyhow!("Server error: {}", e));

        // Stop the heartbeat even when serve failed on its own
        shutdown.cancel();
        if let Err(e) = heartbeat.await {
            warn!("Memory heartbeat task ended abnormally: {}", e);
        }

        persist_on_shutdown(&self.state, self.config.kv_timeout() * 2).await;
        served
    }
}

/// Write the latest snapshot if the dashboard changed anything, then wait for
/// the writer to drain
async fn persist_on_shutdown(state: &ServerState, limit: Duration) {
    if !state.sync.is_configured() || !state.is_dirty() {
        return;
    }

    info!("Saving state before shutdown");
    state.sync.save_now(state.snapshot().await);
    if tokio::time::timeout(limit, state.sync.wait_idle()).await.is_err() {
        warn!("Timed out waiting for the final state save");
        return;
    }
    if let Some(error) = state.sync.status().last_error {
        warn!("Final state save failed: {}", error);
    }
}

/// Build the Axum router
pub fn build_router(config: &ServerConfig, state: Arc<ServerState>) -> Router {
    // CORS middleware
    let cors = if config.enable_cors {
        tower_http::cors::CorsLayer::permissive()
    } else {
        tower_http::cors::CorsLayer::new()
    };

    let auth = Arc::new(AuthConfig::new(config.api_key.clone()));
    if config.auth_required() {
        info!("API key required on /api routes");
    }

    let api = Router::new()
        .route("/state", get(get_state).put(put_state))
        .route("/state/flush", post(flush_state))
        .route(
            "/memory/upload",
            post(upload_memory).layer(DefaultBodyLimit::max(config.max_upload_bytes)),
        )
        .route("/memory/list", get(list_memory))
        .route("/memory/status", get(memory_status))
        .route("/shopify", post(shopify_proxy))
        .route_layer(middleware::from_fn_with_state(auth, auth_middleware));

    // Unknown paths get index.html so client-side routes survive a reload
    let dashboard = ServeDir::new(&config.public_dir)
        .fallback(ServeFile::new(config.public_dir.join("index.html")));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api)
        .with_state(state)
        .fallback_service(dashboard)
        .layer(cors)
}

/// Health check handler
async fn health_handler(
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
) -> impl axum::response::IntoResponse {
    let sync = state.sync.status();

    axum::Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "persistent_memory": sync.configured,
        "connection": sync.connection(),
        "shopify": state.shopify.is_configured(),
        "heartbeat_running": state.heartbeat().map(|h| h.running).unwrap_or(false),
        "uptime_secs": state.uptime_secs(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
