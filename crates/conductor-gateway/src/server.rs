use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use conductor_agent::{AgentDescriptor, HttpAgent};
use conductor_core::ConductorError;
use conductor_kernel::Kernel;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Shared application state.
pub struct AppState {
    /// The kernel serving this gateway.
    pub kernel: Arc<Kernel>,
}

/// The task submission and agent registration gateway.
pub struct GatewayServer;

impl GatewayServer {
    /// Build the gateway router around a kernel.
    pub fn build(kernel: Arc<Kernel>) -> Router {
        let state = Arc::new(AppState { kernel });
        Router::new()
            .route("/health", get(health_handler))
            .route("/tasks", post(submit_task_handler))
            .route("/tasks/{id}/cancel", post(cancel_task_handler))
            .route("/agents", post(register_agent_handler).get(list_agents_handler))
            .route("/events", get(events_handler))
            .with_state(state)
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({"status": "ok", "service": "conductor"}))
}

#[derive(Deserialize)]
struct SubmitTaskRequest {
    /// Session to attach the task to; a fresh session is created if absent.
    session_id: Option<Uuid>,
    raw_input: String,
}

async fn submit_task_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitTaskRequest>,
) -> impl IntoResponse {
    let session_id = request.session_id.unwrap_or_else(Uuid::new_v4);
    match state.kernel.submit(session_id, request.raw_input).await {
        Ok(response) => (StatusCode::OK, Json(serde_json::json!(response))),
        Err(e) => error_response(e),
    }
}

async fn cancel_task_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let cancelled = state.kernel.cancel(id).await;
    let status = if cancelled {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    (status, Json(serde_json::json!({"cancelled": cancelled})))
}

#[derive(Deserialize)]
struct RegisterAgentRequest {
    agent_id: String,
    capabilities: HashSet<String>,
    concurrency_limit: Option<u32>,
    /// Endpoint the worker listens on; invocations are POSTed here.
    endpoint: String,
}

async fn register_agent_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterAgentRequest>,
) -> impl IntoResponse {
    let mut descriptor = AgentDescriptor::new(
        request.agent_id.clone(),
        request.capabilities.iter().map(|c| c.as_str().into()),
    );
    if let Some(limit) = request.concurrency_limit {
        descriptor = descriptor.with_concurrency_limit(limit);
    }

    let handler = Arc::new(HttpAgent::new(request.agent_id.clone(), request.endpoint));
    match state.kernel.registry().register(descriptor, handler).await {
        Ok(()) => {
            info!(agent_id = %request.agent_id, "Gateway: agent registered");
            (
                StatusCode::CREATED,
                Json(serde_json::json!({"registered": request.agent_id})),
            )
        }
        Err(e) => error_response(e),
    }
}

async fn list_agents_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let agents = state.kernel.registry().snapshot().await;
    (StatusCode::OK, Json(serde_json::json!({"agents": agents})))
}

/// Upgrade to a WebSocket and forward kernel progress events as JSON text.
async fn events_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let events = state.kernel.subscribe();
    ws.on_upgrade(move |socket| forward_events(socket, events))
}

async fn forward_events(
    mut socket: WebSocket,
    mut events: tokio::sync::broadcast::Receiver<conductor_kernel::TaskEvent>,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let Ok(text) = serde_json::to_string(&event) else {
                    continue;
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "Event subscriber lagged");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn error_response(e: ConductorError) -> (StatusCode, Json<serde_json::Value>) {
    let status = match &e {
        ConductorError::Registry(_) => StatusCode::CONFLICT,
        ConductorError::Decomposition(_) => StatusCode::UNPROCESSABLE_ENTITY,
        ConductorError::Kernel(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({"error": {"kind": e.kind(), "detail": e.to_string()}})),
    )
}
