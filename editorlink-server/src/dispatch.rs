//! Automation request dispatch
//!
//! Routes client requests to the editor plugin queue, collapsing duplicate
//! concurrent requests through the shared coalescer.

use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use editorlink_core::{
    Action, AutomationRequest, AutomationResponse, BusyGuard, CoalesceError, Flight, LeaderGuard,
    Outcome, PluginRequest, ResponseSink, Waiter,
};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::AppState;

/// Hands outcomes to the HTTP handler that is waiting on the channel
pub struct ChannelSink(pub mpsc::UnboundedSender<AutomationResponse>);

impl ResponseSink for ChannelSink {
    fn deliver(&self, request_id: &str, outcome: Outcome) -> Result<(), CoalesceError> {
        self.0
            .send(AutomationResponse::from_outcome(request_id, &outcome))
            .map_err(|_| CoalesceError::DeliveryFailed {
                request_id: request_id.to_string(),
            })
    }
}

/// Who gets told when the editor answers
#[derive(Debug)]
pub enum Completion {
    /// Fan out to every waiter of the in-flight key
    Coalesced(LeaderGuard),
    /// Single uncoalesced request
    Direct(Waiter),
}

impl Completion {
    pub fn complete(self, outcome: Outcome) {
        match self {
            Completion::Coalesced(guard) => {
                guard.finish(outcome);
            }
            Completion::Direct(waiter) => {
                if let Err(e) = waiter.deliver(outcome) {
                    tracing::warn!("{}", e);
                }
            }
        }
    }
}

/// Editor request awaiting a plugin response
#[derive(Debug)]
pub struct PendingEditorRequest {
    pub action: String,
    pub sent_at: Instant,
    pub completion: Completion,
    /// Busy mark held until the editor answers or the request expires
    pub busy: Option<BusyGuard>,
}

/// Queue an editor operation for the plugin.
///
/// When the pending limit is reached nothing is queued and the completion
/// receives an `OperationFailed` outcome instead.
///
/// Both locks are taken before anything is recorded, so a caller cancelled
/// while waiting leaves no half-registered request behind.
pub async fn dispatch_to_editor(
    state: &AppState,
    action: &Action,
    payload: serde_json::Value,
    completion: Completion,
    busy: Option<BusyGuard>,
) -> Option<Uuid> {
    let id = Uuid::new_v4();
    {
        let mut pending = state.pending.lock().await;
        let limit = state.config.bridge.max_pending_requests;
        if pending.len() >= limit {
            drop(pending);
            drop(busy);
            tracing::warn!("Rejecting {}: {} editor requests pending", action.name(), limit);
            completion.complete(Err(CoalesceError::operation_failed(format!(
                "bridge busy: {} editor requests pending",
                limit
            ))));
            return None;
        }
        let mut queue = state.request_queue.lock().await;

        pending.insert(
            id,
            PendingEditorRequest {
                action: action.name().to_string(),
                sent_at: Instant::now(),
                completion,
                busy,
            },
        );
        queue.push_back(PluginRequest {
            id,
            action: action.name().to_string(),
            payload,
        });
    }
    let _ = state.trigger.send(());

    tracing::info!("Queued {} for editor ({})", action.name(), id);
    Some(id)
}

fn status_for(response: &AutomationResponse) -> StatusCode {
    match response.error.as_deref() {
        Some("TIMEOUT") => StatusCode::GATEWAY_TIMEOUT,
        Some("INVALID_KEY") => StatusCode::BAD_REQUEST,
        Some("BLUEPRINT_BUSY") => StatusCode::CONFLICT,
        _ => StatusCode::OK,
    }
}

/// Handle an automation request - coalesces, queues for the editor and waits
pub async fn handle_automation(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AutomationRequest>,
) -> impl IntoResponse {
    let request_id = req
        .request_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    if req.action.trim().is_empty() {
        let response =
            AutomationResponse::failure(&request_id, "INVALID_ACTION", "action must not be empty");
        return (StatusCode::BAD_REQUEST, Json(response));
    }

    let action = state.router.resolve(&req.action);
    tracing::debug!("Request {} routed to {:?}", request_id, action);

    let busy = match action.busy_key(&req.payload) {
        Ok(Some(path)) => match state.busy.try_mark(&path) {
            Ok(guard) => Some(guard),
            Err(e) => {
                let response = AutomationResponse::from_outcome(&request_id, &Err(e));
                return (StatusCode::CONFLICT, Json(response));
            }
        },
        Ok(None) => None,
        Err(e) => {
            let response = AutomationResponse::from_outcome(&request_id, &Err(e));
            return (StatusCode::BAD_REQUEST, Json(response));
        }
    };

    let key = if state.config.coalescing.enabled {
        action.coalesce_key(&req.payload)
    } else {
        Ok(None)
    };
    let key = match key {
        Ok(key) => key,
        Err(e) => {
            let response = AutomationResponse::from_outcome(&request_id, &Err(e));
            return (StatusCode::BAD_REQUEST, Json(response));
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let waiter = Waiter::new(request_id.clone(), Arc::new(ChannelSink(tx)));

    match key {
        Some(key) => match state.coalescer.begin(key.as_str(), waiter) {
            Ok(Flight::Leader(guard)) => {
                tracing::info!("Request {} leads '{}'", guard.request_id(), guard.key());
                dispatch_to_editor(
                    &state,
                    &action,
                    req.payload,
                    Completion::Coalesced(guard),
                    busy,
                )
                .await;
            }
            Ok(Flight::Follower) => {}
            Err(e) => {
                let response = AutomationResponse::from_outcome(&request_id, &Err(e));
                return (StatusCode::BAD_REQUEST, Json(response));
            }
        },
        None => {
            dispatch_to_editor(&state, &action, req.payload, Completion::Direct(waiter), busy)
                .await;
        }
    }

    let timeout = req
        .timeout_ms
        .map(std::time::Duration::from_millis)
        .unwrap_or_else(|| state.config.bridge.request_timeout());

    match tokio::time::timeout(timeout, rx.recv()).await {
        Ok(Some(response)) => {
            tracing::info!(
                "Responding to {}: success={}",
                response.request_id,
                response.success
            );
            (status_for(&response), Json(response))
        }
        Ok(None) => {
            tracing::warn!("Channel closed for {}", request_id);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(AutomationResponse::failure(
                    &request_id,
                    "CHANNEL_CLOSED",
                    "response channel closed",
                )),
            )
        }
        Err(_) => {
            tracing::warn!("Timeout waiting for editor response: {}", request_id);
            (
                StatusCode::GATEWAY_TIMEOUT,
                Json(AutomationResponse::failure(
                    &request_id,
                    "TIMEOUT",
                    format!("Timeout waiting for editor response after {}ms", timeout.as_millis()),
                )),
            )
        }
    }
}
