//! REST surface over the session service. Every mutating endpoint
//! accepts an optional `expected_version` so clients holding a stale
//! view fail with a conflict instead of overwriting a newer record.

use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::api::AppState;
use crate::error::Result;
use crate::models::{ApiResponse, Session, Visibility};

const DEFAULT_OPEN_LIMIT: i64 = 50;
const MAX_OPEN_LIMIT: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub first_player: String,
    pub wager_token: String,
    pub wager_amount: Decimal,
    pub visibility: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PlayerActionRequest {
    pub player: String,
    pub expected_version: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub player: String,
    #[serde(rename = "move")]
    pub mv: String,
    pub expected_version: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct OpenSessionsQuery {
    pub limit: Option<i64>,
}

/// Create a new session
/// POST /api/v1/sessions
pub async fn create_session(
    State(state): State<AppState>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<ApiResponse<Session>>> {
    let visibility = match req.visibility.as_deref() {
        None => Visibility::Public,
        Some(raw) => Visibility::parse(raw)?,
    };

    let session = state
        .sessions
        .create(req.first_player, req.wager_token, req.wager_amount, visibility)
        .await?;

    tracing::info!("Created session {}", session.session_id);
    Ok(Json(ApiResponse::ok(session)))
}

/// Get a session by id
/// GET /api/v1/sessions/{session_id}
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ApiResponse<Session>>> {
    let session = state.sessions.get(&session_id).await?;
    Ok(Json(ApiResponse::ok(session)))
}

/// List public sessions waiting for an opponent
/// GET /api/v1/sessions/open
pub async fn list_open_sessions(
    State(state): State<AppState>,
    Query(query): Query<OpenSessionsQuery>,
) -> Result<Json<ApiResponse<Vec<Session>>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_OPEN_LIMIT)
        .clamp(1, MAX_OPEN_LIMIT);
    let sessions = state.sessions.list_open(limit).await?;
    Ok(Json(ApiResponse::ok(sessions)))
}

/// Join a waiting session as the second player
/// POST /api/v1/sessions/{session_id}/join
pub async fn join_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<PlayerActionRequest>,
) -> Result<Json<ApiResponse<Session>>> {
    let session = state
        .sessions
        .join(&session_id, &req.player, req.expected_version)
        .await?;
    tracing::info!("Player {} joined session {}", req.player, session_id);
    Ok(Json(ApiResponse::ok(session)))
}

/// Apply a move
/// POST /api/v1/sessions/{session_id}/move
pub async fn apply_move(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<MoveRequest>,
) -> Result<Json<ApiResponse<Session>>> {
    let session = state
        .sessions
        .apply_move(&session_id, &req.player, &req.mv, req.expected_version)
        .await?;
    Ok(Json(ApiResponse::ok(session)))
}

/// Resign an active session
/// POST /api/v1/sessions/{session_id}/resign
pub async fn resign_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<PlayerActionRequest>,
) -> Result<Json<ApiResponse<Session>>> {
    let session = state
        .sessions
        .resign(&session_id, &req.player, req.expected_version)
        .await?;
    tracing::info!("Player {} resigned session {}", req.player, session_id);
    Ok(Json(ApiResponse::ok(session)))
}

/// Cancel a session that never started
/// POST /api/v1/sessions/{session_id}/cancel
pub async fn cancel_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(req): Json<PlayerActionRequest>,
) -> Result<Json<ApiResponse<Session>>> {
    let session = state
        .sessions
        .cancel(&session_id, &req.player, req.expected_version)
        .await?;
    tracing::info!("Session {} cancelled by {}", session_id, req.player);
    Ok(Json(ApiResponse::ok(session)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_request_parses_move_keyword() {
        let req: MoveRequest = serde_json::from_str(
            r#"{"player":"0xalice","move":"e2e4","expected_version":1}"#,
        )
        .unwrap();
        assert_eq!(req.mv, "e2e4");
        assert_eq!(req.expected_version, Some(1));
    }

    #[test]
    fn action_request_version_is_optional() {
        let req: PlayerActionRequest =
            serde_json::from_str(r#"{"player":"0xbob"}"#).unwrap();
        assert_eq!(req.expected_version, None);
    }
}
