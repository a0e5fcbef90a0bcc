//! REST API handlers
//!
//! One route per session request. Load requests answer with a bare
//! boolean once the node is attached or has failed; synchronous failures
//! (collisions, unknown names, bad transforms) come back as an error status.

use arlink_core::{Matrix4, NodeDescriptor, RegistryError, SessionConfig};
use arlink_session::{LoadHandle, SessionError};
use arlink_tracking::{ScreenPoint, TouchPhase};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::state::AppState;

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

fn error_response(error: SessionError) -> Response {
    let status = match &error {
        SessionError::Registry(RegistryError::NameCollision(_)) => StatusCode::CONFLICT,
        SessionError::Registry(RegistryError::NotFound(_)) => StatusCode::NOT_FOUND,
        SessionError::Registry(RegistryError::InvariantViolation(_)) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        SessionError::Registry(_) => StatusCode::BAD_REQUEST,
        SessionError::Transform(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SessionError::Engine(_) | SessionError::Closed => StatusCode::SERVICE_UNAVAILABLE,
    };
    debug!(status = %status, error = %error, "Request failed");
    (status, Json(ApiError::new(error.to_string()))).into_response()
}

async fn load_response(result: Result<LoadHandle, SessionError>) -> Response {
    match result {
        Ok(handle) => {
            let outcome = handle.outcome().await;
            Json(outcome.is_attached()).into_response()
        }
        Err(e) => error_response(e),
    }
}

fn status_response(result: Result<(), SessionError>, status: &str) -> Response {
    match result {
        Ok(()) => Json(serde_json::json!({ "status": status })).into_response(),
        Err(e) => error_response(e),
    }
}

fn removed_response(result: Result<Vec<String>, SessionError>) -> Response {
    match result {
        Ok(removed) => Json(serde_json::json!({ "removed": removed })).into_response(),
        Err(e) => error_response(e),
    }
}

/// Start or reconfigure the AR session
pub async fn init_session(
    State(state): State<Arc<AppState>>,
    Json(config): Json<SessionConfig>,
) -> impl IntoResponse {
    info!(handle_taps = config.handle_taps, show_planes = config.show_planes, "initSession");
    status_response(state.session.init_session(config).await, "active")
}

pub async fn suspend_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    status_response(state.session.suspend().await, "suspended")
}

pub async fn resume_session(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    status_response(state.session.resume().await, "active")
}

/// Place a node under the scene root
pub async fn add_node(
    State(state): State<Arc<AppState>>,
    Json(descriptor): Json<NodeDescriptor>,
) -> impl IntoResponse {
    load_response(state.session.add_node(descriptor).await).await
}

/// Place a node under a named anchor
pub async fn add_node_to_anchor(
    State(state): State<Arc<AppState>>,
    Path(anchor): Path<String>,
    Json(descriptor): Json<NodeDescriptor>,
) -> impl IntoResponse {
    load_response(state.session.add_node_to_anchor(descriptor, &anchor).await).await
}

pub async fn remove_node(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    removed_response(state.session.remove_node(&name).await)
}

#[derive(Deserialize)]
pub struct TransformRequest {
    transform: Matrix4,
}

pub async fn update_node_transform(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<TransformRequest>,
) -> impl IntoResponse {
    status_response(
        state.session.update_node_transform(&name, req.transform).await,
        "updated",
    )
}

#[derive(Deserialize)]
pub struct AnchorRequest {
    name: String,
    transform: Matrix4,
}

pub async fn add_plane_anchor(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AnchorRequest>,
) -> impl IntoResponse {
    match state.session.add_plane_anchor(req.transform, &req.name).await {
        Ok(()) => Json(true).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn remove_anchor(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    removed_response(state.session.remove_anchor(&name).await)
}

#[derive(Deserialize)]
pub struct TouchRequest {
    x: f64,
    y: f64,
    #[serde(default = "default_phase")]
    phase: TouchPhase,
}

fn default_phase() -> TouchPhase {
    TouchPhase::Down
}

/// Feed a touch from the view; answers with the event it produced, if any
pub async fn touch(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TouchRequest>,
) -> impl IntoResponse {
    match state
        .session
        .touch(ScreenPoint::new(req.x, req.y), req.phase)
        .await
    {
        Ok(event) => Json(event).into_response(),
        Err(e) => error_response(e),
    }
}

/// Current scene, planes and pending loads
pub async fn get_scene(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.session.snapshot().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn get_entity(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.session.lookup(&name).await {
        Ok(Some(entity)) => Json(entity).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiError::new(format!("No entity named {}", name))),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

/// Engine name and daemon version
pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "engine": state.engine.name(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Daemon configuration
pub async fn get_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.config.clone())
}
