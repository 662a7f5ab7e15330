//! Operator-only escape hatch for stuck sessions. Resolutions bypass
//! the usual turn checks but still flow through the state machine, so
//! a forced outcome can never leave the record half-written.

use axum::{
    extract::{Path, State},
    response::Json,
};
use serde::Deserialize;

use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::models::{ApiResponse, ForceResolution, Session};

#[derive(Debug, Deserialize)]
pub struct ForceResolveRequest {
    /// "refund", "first_wins", "second_wins" or "draw"
    pub resolution: String,
    pub actor: String,
}

/// Force-resolve a session
/// POST /api/v1/admin/sessions/{session_id}/resolve
pub async fn force_resolve(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<ForceResolveRequest>,
) -> Result<Json<ApiResponse<Session>>> {
    if req.actor.trim().is_empty() {
        return Err(AppError::BadRequest("actor is required".to_string()));
    }

    let resolution = ForceResolution::parse(&req.resolution)?;
    let session = state
        .sessions
        .force_resolve(&session_id, resolution, &req.actor)
        .await?;
    Ok(Json(ApiResponse::ok(session)))
}
