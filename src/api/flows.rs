//! Flow REST API endpoints
//!
//! Thin handlers over [`FlowSession`]: every route resolves (opening on first
//! use) the session for `{id}` and forwards to it. Reads of a flow that was
//! never stored answer with an empty flow and open nothing. Failures come back
//! as a status code with `{ "error": "..." }`.

use crate::{
    flow::{
        graph::GraphError,
        registry::FlowRegistry,
        types::{Edge, FlowDocument, Node, NodeType, Position},
    },
    runtime::{
        engine::RunReport,
        scheduler::{ArmedSchedule, ScheduleError, ScheduleStatus},
        session::{FlowSession, RunError},
    },
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, patch, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Open flows, opened lazily per request
    pub registry: Arc<FlowRegistry>,
}

type ApiError = (StatusCode, Json<Value>);
type ApiResult<T> = Result<T, ApiError>;

fn api_error(status: StatusCode, message: impl std::fmt::Display) -> ApiError {
    (status, Json(json!({ "error": message.to_string() })))
}

fn graph_error(e: GraphError) -> ApiError {
    let status = match e {
        GraphError::SelfLoop(_) | GraphError::Cycle { .. } => StatusCode::CONFLICT,
        GraphError::UnknownNode(_) => StatusCode::NOT_FOUND,
        GraphError::KindMismatch(_) => StatusCode::BAD_REQUEST,
        GraphError::IncompleteOrder { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    api_error(status, e)
}

fn schedule_error(e: ScheduleError) -> ApiError {
    api_error(StatusCode::UNPROCESSABLE_ENTITY, e)
}

fn run_error(e: RunError) -> ApiError {
    match e {
        RunError::InProgress(_) | RunError::Closed(_) => api_error(StatusCode::CONFLICT, e),
        RunError::Integrity(e) => graph_error(e),
    }
}

/// Request body for node creation
#[derive(Debug, Deserialize)]
pub struct CreateNodeRequest {
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub position: Option<Position>,
}

/// Request body for node payload edits; exactly one field must be set
#[derive(Debug, Deserialize)]
pub struct UpdateNodeRequest {
    pub command: Option<String>,
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleTextRequest {
    pub text: String,
}

/// Create flow routes
///
/// All routes are nested under `/api/flows/{id}`.
pub fn create_flow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/flows/{id}", get(get_flow))
        .route("/api/flows/{id}/nodes", post(add_node))
        .route(
            "/api/flows/{id}/nodes/{node_id}",
            patch(update_node).delete(remove_node),
        )
        .route("/api/flows/{id}/edges", post(add_edge))
        .route(
            "/api/flows/{id}/edges/{source}/{target}",
            axum::routing::delete(remove_edge),
        )
        .route("/api/flows/{id}/order", get(get_order))
        .route("/api/flows/{id}/save", post(save_flow))
        .route("/api/flows/{id}/run", post(run_flow))
        .route(
            "/api/flows/{id}/schedule",
            get(get_schedule).put(set_schedule_text).delete(clear_schedule),
        )
        .route("/api/flows/{id}/schedule/commit", post(commit_schedule))
        .route("/api/flows/{id}/close", post(close_flow))
}

async fn session(state: &AppState, id: &str) -> Arc<FlowSession> {
    state.registry.get_or_open(id).await
}

/// Session for read-only routes; `None` for flows never stored
async fn existing_session(state: &AppState, id: &str) -> Option<Arc<FlowSession>> {
    state.registry.get_existing(id).await
}

/// GET /api/flows/{id}
async fn get_flow(State(state): State<AppState>, Path(id): Path<String>) -> Json<FlowDocument> {
    match existing_session(&state, &id).await {
        Some(session) => Json(session.document().await),
        None => Json(FlowDocument::default()),
    }
}

/// POST /api/flows/{id}/nodes
/// Body: { "type": "instruction" | "note", "position": { "x": 0, "y": 0 }? }
async fn add_node(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<CreateNodeRequest>,
) -> (StatusCode, Json<Node>) {
    let node = session(&state, &id)
        .await
        .add_node(payload.node_type, payload.position)
        .await;
    (StatusCode::CREATED, Json(node))
}

/// PATCH /api/flows/{id}/nodes/{node_id}
/// Body: { "command": "..." } for instructions or { "text": "..." } for notes
async fn update_node(
    State(state): State<AppState>,
    Path((id, node_id)): Path<(String, String)>,
    Json(payload): Json<UpdateNodeRequest>,
) -> ApiResult<Json<Node>> {
    let session = session(&state, &id).await;
    let updated = match (payload.command, payload.text) {
        (Some(command), None) => session.set_command(&node_id, &command).await,
        (None, Some(text)) => session.set_note_text(&node_id, &text).await,
        _ => {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                "expected exactly one of `command` or `text`",
            ))
        }
    };
    updated.map(Json).map_err(graph_error)
}

/// DELETE /api/flows/{id}/nodes/{node_id}
async fn remove_node(
    State(state): State<AppState>,
    Path((id, node_id)): Path<(String, String)>,
) -> StatusCode {
    session(&state, &id).await.remove_node(&node_id).await;
    StatusCode::NO_CONTENT
}

/// POST /api/flows/{id}/edges
/// Body: { "source": "...", "target": "..." }
async fn add_edge(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(edge): Json<Edge>,
) -> ApiResult<Json<Edge>> {
    session(&state, &id)
        .await
        .add_edge(&edge.source, &edge.target)
        .await
        .map(Json)
        .map_err(graph_error)
}

/// DELETE /api/flows/{id}/edges/{source}/{target}
async fn remove_edge(
    State(state): State<AppState>,
    Path((id, source, target)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    if session(&state, &id).await.remove_edge(&source, &target).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(api_error(
            StatusCode::NOT_FOUND,
            format!("no edge {} -> {}", source, target),
        ))
    }
}

/// GET /api/flows/{id}/order
/// Returns: { "order": ["node-id", ...] }
async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let order = match existing_session(&state, &id).await {
        Some(session) => session.order().await.map_err(graph_error)?,
        None => Vec::new(),
    };
    Ok(Json(json!({ "order": order })))
}

/// POST /api/flows/{id}/save
async fn save_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    session(&state, &id)
        .await
        .save()
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e))?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/flows/{id}/run
///
/// Runs synchronously and returns the full report. A second run while one is
/// in flight gets `409`.
async fn run_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RunReport>> {
    tracing::info!("🚀 Manual run requested for flow '{}'", id);
    session(&state, &id)
        .await
        .run_now()
        .await
        .map(Json)
        .map_err(run_error)
}

/// GET /api/flows/{id}/schedule
async fn get_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Json<ScheduleStatus> {
    match existing_session(&state, &id).await {
        Some(session) => Json(session.schedule_status()),
        None => Json(ScheduleStatus::default()),
    }
}

/// PUT /api/flows/{id}/schedule
/// Body: { "text": "tomorrow 3pm" }
///
/// Parsing is debounced; poll GET to see the resolved instant.
async fn set_schedule_text(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<ScheduleTextRequest>,
) -> (StatusCode, Json<ScheduleStatus>) {
    let session = session(&state, &id).await;
    session.set_schedule_text(&payload.text);
    (StatusCode::ACCEPTED, Json(session.schedule_status()))
}

/// POST /api/flows/{id}/schedule/commit
async fn commit_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ArmedSchedule>> {
    session(&state, &id)
        .await
        .commit_schedule()
        .await
        .map(Json)
        .map_err(schedule_error)
}

/// DELETE /api/flows/{id}/schedule
async fn clear_schedule(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    session(&state, &id).await.clear_schedule().await;
    StatusCode::NO_CONTENT
}

/// POST /api/flows/{id}/close
async fn close_flow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.registry.close(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(api_error(
            StatusCode::NOT_FOUND,
            format!("flow '{}' is not open", id),
        ))
    }
}
