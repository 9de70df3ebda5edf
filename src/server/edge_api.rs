// src/server/edge_api.rs

//! The kiosk/admin edge API: a thin `axum` HTTP + WebSocket surface the
//! out-of-scope touchscreen UI and admin dashboard attach to. Contains no
//! business logic of its own — every handler is a direct translation from
//! HTTP/WS to a typed call on the components in [`crate::core::state`],
//! the same shape as the teacher's own `metrics_server`: a small axum
//! server bolted onto the coordinator's background tasks.

use crate::core::consultation::ConsultationStatus;
use crate::core::errors::ConsultEaseError;
use crate::core::state::AppState;
use axum::{
    Json, Router,
    extract::{Path, State, WebSocketUpgrade, ws::Message},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::{EnvFilter, Registry, reload};

/// State shared with the edge API only: the core `AppState` plus the
/// tracing reload handle, which is strictly an operational concern and has
/// no business belonging to the core component set.
#[derive(Clone)]
pub struct EdgeApiState {
    pub app: Arc<AppState>,
    pub log_reload: Arc<reload::Handle<EnvFilter, Registry>>,
}

pub fn router(state: EdgeApiState) -> Router {
    Router::new()
        .route("/api/auth/scan", post(scan))
        .route("/api/auth/admin", post(admin_login))
        .route("/api/faculty", get(list_faculty))
        .route("/api/students", get(list_students))
        .route("/api/consultations", post(create_consultation))
        .route("/api/consultations/{id}/transition", post(transition_consultation))
        .route("/api/admin/log-level", post(set_log_level))
        .route("/ws/events", get(ws_events))
        .with_state(state)
}

/// Wraps [`ConsultEaseError`] so it can be returned directly from a
/// handler; converts each kind to the HTTP status an admin dashboard or
/// kiosk can key off of without parsing the message text.
struct ApiError(ConsultEaseError);

impl From<ConsultEaseError> for ApiError {
    fn from(e: ConsultEaseError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ConsultEaseError::Validation(_) => StatusCode::BAD_REQUEST,
            ConsultEaseError::NotFound(_) => StatusCode::NOT_FOUND,
            ConsultEaseError::Conflict(_) => StatusCode::CONFLICT,
            ConsultEaseError::Unauthorized => StatusCode::UNAUTHORIZED,
            ConsultEaseError::Locked { .. } => StatusCode::TOO_MANY_REQUESTS,
            ConsultEaseError::Transient(_) | ConsultEaseError::BusUnavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ConsultEaseError::Fatal(_) | ConsultEaseError::Database(_) | ConsultEaseError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ConsultEaseError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
struct ScanRequest {
    uid: String,
}

async fn scan(
    State(state): State<EdgeApiState>,
    Json(req): Json<ScanRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (student, session_id) = state.app.auth.authenticate_student(&req.uid, None).await?;
    Ok(Json(serde_json::json!({ "student": student, "session_id": session_id })))
}

#[derive(Deserialize)]
struct AdminLoginRequest {
    username: String,
    password: String,
}

async fn admin_login(
    State(state): State<EdgeApiState>,
    Json(req): Json<AdminLoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state
        .app
        .auth
        .authenticate_admin(&req.username, &req.password, None)
        .await?;
    Ok(Json(serde_json::json!({
        "session_id": outcome.session_id,
        "admin": outcome.admin,
        "force_change": outcome.force_change,
    })))
}

async fn list_faculty(State(state): State<EdgeApiState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.app.admin_ops.list_faculty().await?))
}

async fn list_students(State(state): State<EdgeApiState>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.app.admin_ops.list_students().await?))
}

#[derive(Deserialize)]
struct CreateConsultationRequest {
    student_id: i64,
    faculty_id: i64,
    request_text: String,
    course_code: Option<String>,
}

async fn create_consultation(
    State(state): State<EdgeApiState>,
    Json(req): Json<CreateConsultationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let consultation = state
        .app
        .consultations
        .create(req.student_id, req.faculty_id, &req.request_text, req.course_code.as_deref())
        .await?;
    Ok(Json(consultation))
}

#[derive(Deserialize)]
struct TransitionRequest {
    to: String,
}

async fn transition_consultation(
    State(state): State<EdgeApiState>,
    Path(id): Path<i64>,
    Json(req): Json<TransitionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let to = ConsultationStatus::from_str(&req.to)?;
    let consultation = state.app.consultations.transition(id, to).await?;
    Ok(Json(consultation))
}

#[derive(Deserialize)]
struct LogLevelRequest {
    level: String,
}

/// Adjusts the running server's log verbosity without a restart, the same
/// capability the teacher exposes through its own reloadable filter.
async fn set_log_level(
    State(state): State<EdgeApiState>,
    Json(req): Json<LogLevelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = EnvFilter::try_new(&req.level)
        .map_err(|e| ConsultEaseError::Validation(format!("invalid log filter: {e}")))?;
    state
        .log_reload
        .reload(filter)
        .map_err(|e| ConsultEaseError::Fatal(format!("failed to reload log filter: {e}")))?;
    Ok(StatusCode::NO_CONTENT)
}

/// Streams `DomainEvent`s as JSON text frames for as long as the client
/// stays connected. One-way: the kiosk/dashboard never sends application
/// data over this socket.
async fn ws_events(State(state): State<EdgeApiState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| async move {
        let mut socket = socket;
        let mut events = state.app.events.subscribe();
        loop {
            match events.recv().await {
                Ok(event) => {
                    let text = match serde_json::to_string(&event) {
                        Ok(t) => t,
                        Err(e) => {
                            warn!("failed to serialize domain event: {e}");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("edge API websocket client lagged, dropped {n} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
