use axum::{extract::State, response::Json};
use serde_json::{json, Value};

use crate::api::AppState;
use crate::constants::API_VERSION;

/// Health check endpoint
/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let database = match state.db.pool().acquire().await {
        Ok(_) => "connected",
        Err(e) => {
            tracing::error!("Health check: database unreachable: {}", e);
            "unreachable"
        }
    };

    let redis = match state.redis.clone() {
        Some(mut conn) => {
            let pong: redis::RedisResult<String> =
                redis::cmd("PING").query_async(&mut conn).await;
            match pong {
                Ok(_) => "connected",
                Err(e) => {
                    tracing::error!("Health check: redis unreachable: {}", e);
                    "unreachable"
                }
            }
        }
        None => "disabled",
    };

    Json(json!({
        "status": if database == "connected" { "ok" } else { "degraded" },
        "version": API_VERSION,
        "database": database,
        "redis": redis,
        "environment": state.config.environment,
    }))
}
