//! EditorLink Server
//!
//! HTTP bridge between automation clients and the editor plugin. Clients
//! post automation requests; the plugin long-polls for queued work and posts
//! results back.

pub mod dispatch;
pub mod sweeper;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use editorlink_core::{
    ActionRouter, BridgeConfig, BusySet, Coalescer, PluginRequest, PluginResponse,
};
use tokio::sync::{watch, Mutex, Notify};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

pub use dispatch::{ChannelSink, Completion, PendingEditorRequest};
pub use sweeper::{spawn_sweeper, sweep};

/// Shared application state
pub struct AppState {
    pub config: BridgeConfig,

    /// Action spelling table, built once
    pub router: ActionRouter,

    /// Duplicate-request coalescer owned by this server
    pub coalescer: Arc<Coalescer>,

    /// Blueprints with a modification outstanding in the editor
    pub busy: Arc<BusySet>,

    /// Queue of pending requests to send to the plugin
    pub request_queue: Mutex<VecDeque<PluginRequest>>,

    /// Editor requests awaiting a plugin response, by plugin request id
    pub pending: Mutex<HashMap<Uuid, PendingEditorRequest>>,

    /// Trigger to wake up long-polling requests
    pub trigger: watch::Sender<()>,

    /// Signalled by the shutdown endpoint
    pub shutdown: Notify,
}

impl AppState {
    pub fn new(config: BridgeConfig) -> Arc<Self> {
        let (trigger, _) = watch::channel(());
        Arc::new(Self {
            config,
            router: ActionRouter::new(),
            coalescer: Arc::new(Coalescer::new()),
            busy: Arc::new(BusySet::new()),
            request_queue: Mutex::new(VecDeque::new()),
            pending: Mutex::new(HashMap::new()),
            trigger,
            shutdown: Notify::new(),
        })
    }
}

/// Create the main router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Automation clients
        .route("/automation", post(dispatch::handle_automation))
        .route("/automation/inflight", get(handle_inflight))
        // Editor plugin communication
        .route("/bridge/request", get(handle_request_poll))
        .route("/bridge/response", post(handle_response))
        // Control
        .route("/health", get(handle_health))
        .route("/shutdown", post(handle_shutdown))
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Health check endpoint
async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.coalescer.stats();
    let pending = state.pending.lock().await.len();
    let queued = state.request_queue.lock().await.len();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "inFlight": state.coalescer.in_flight_count(),
        "pendingEditorRequests": pending,
        "queuedEditorRequests": queued,
        "busyBlueprints": state.busy.len(),
        "coalescer": stats,
        "dedupRatio": stats.dedup_ratio(),
    }))
}

/// List operations currently in flight
async fn handle_inflight(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.coalescer.snapshot())
}

/// Long-polling endpoint for plugin to receive requests
async fn handle_request_poll(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // Subscribe before checking the queue so a push in between still wakes us
    let mut trigger_rx = state.trigger.subscribe();

    if let Some(request) = state.request_queue.lock().await.pop_front() {
        return (StatusCode::OK, Json(Some(request)));
    }

    let timeout = state.config.bridge.poll_timeout();
    tokio::select! {
        _ = tokio::time::sleep(timeout) => {
            (StatusCode::NO_CONTENT, Json(None))
        }
        _ = trigger_rx.changed() => {
            match state.request_queue.lock().await.pop_front() {
                Some(request) => (StatusCode::OK, Json(Some(request))),
                None => (StatusCode::NO_CONTENT, Json(None)),
            }
        }
    }
}

/// Handle response from plugin
async fn handle_response(
    State(state): State<Arc<AppState>>,
    Json(response): Json<PluginResponse>,
) -> impl IntoResponse {
    let pending = state.pending.lock().await.remove(&response.id);
    match pending {
        Some(pending) => {
            tracing::info!(
                "Editor finished {} ({}): success={}",
                pending.action,
                response.id,
                response.success
            );
            pending.completion.complete(response.into_outcome());
            StatusCode::OK
        }
        None => {
            tracing::warn!("Response for unknown or expired request {}", response.id);
            StatusCode::NOT_FOUND
        }
    }
}

async fn handle_shutdown(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::info!("Shutdown requested");
    state.shutdown.notify_one();
    Json(serde_json::json!({"status": "shutting_down"}))
}

/// Start the server
pub async fn run_server(config: BridgeConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = AppState::new(config);
    let sweeper = spawn_sweeper(state.clone());
    let router = create_router(state.clone());

    tracing::info!("EditorLink server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = state.shutdown.notified() => {}
                _ = tokio::signal::ctrl_c() => {}
            }
        })
        .await?;

    sweeper.abort();
    tracing::info!("EditorLink server stopped");
    Ok(())
}
