use axum::http::HeaderValue;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod config;
mod constants;
mod db;
mod error;
mod models;
mod relay;
mod rules;
mod services;
mod state_machine;
mod websocket;

use config::Config;
use constants::API_VERSION;
use db::Database;
use relay::{DeltaPublisher, SessionRelay};
use services::SessionService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wagerchess_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    config.validate()?;

    tracing::info!("Starting WagerChess Backend Server");
    tracing::info!("Environment: {}", config.environment);
    tracing::info!("API Version: {}", API_VERSION);

    // Initialize database
    let db = Database::new(&config).await?;

    // Run migrations
    tracing::info!("Running database migrations...");
    db.run_migrations().await?;

    // Redis is optional: with it, deltas fan out across every relay
    // instance; without it, only in-process observers see them.
    let redis = match &config.redis_url {
        Some(url) => {
            let client = redis::Client::open(url.clone())?;
            Some(redis::aio::ConnectionManager::new(client).await?)
        }
        None => {
            tracing::warn!("REDIS_URL not set; relay runs single-instance");
            None
        }
    };

    let relay = Arc::new(SessionRelay::new());
    let publisher = match redis.clone() {
        Some(conn) => DeltaPublisher::with_bridge(relay.clone(), conn),
        None => DeltaPublisher::local(relay.clone()),
    };
    let sessions = Arc::new(SessionService::new(Arc::new(db.clone()), publisher));

    let app_state = api::AppState {
        db: db.clone(),
        redis,
        relay: relay.clone(),
        sessions,
        config: config.clone(),
    };

    // Build router
    let app = build_router(app_state);

    // Start background services
    tokio::spawn(services::start_background_services(
        db.clone(),
        config.clone(),
    ));

    // Bridge published deltas back into the local relay.
    if let Some(url) = config.redis_url.clone() {
        tracing::info!("Starting relay bridge...");
        tokio::spawn(relay::bridge::start_bridge(url, relay.clone()));
    }

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_router(state: api::AppState) -> Router {
    // CORS configuration
    let cors = cors_from_config(&state.config);

    Router::new()
        // Health check
        .route("/health", get(api::health::health_check))
        // Sessions
        .route("/api/v1/sessions", post(api::sessions::create_session))
        .route(
            "/api/v1/sessions/open",
            get(api::sessions::list_open_sessions),
        )
        .route(
            "/api/v1/sessions/{session_id}",
            get(api::sessions::get_session),
        )
        .route(
            "/api/v1/sessions/{session_id}/join",
            post(api::sessions::join_session),
        )
        .route(
            "/api/v1/sessions/{session_id}/move",
            post(api::sessions::apply_move),
        )
        .route(
            "/api/v1/sessions/{session_id}/resign",
            post(api::sessions::resign_session),
        )
        .route(
            "/api/v1/sessions/{session_id}/cancel",
            post(api::sessions::cancel_session),
        )
        // Admin (manual maintenance)
        .route(
            "/api/v1/admin/sessions/{session_id}/resolve",
            post(api::admin::force_resolve),
        )
        // WebSocket endpoints
        .route("/ws/session", get(websocket::session::handler))
        .layer(cors)
        .with_state(state)
}

fn cors_from_config(config: &Config) -> CorsLayer {
    let raw = config.cors_allowed_origins.trim();
    if raw.is_empty() || raw == "*" {
        return CorsLayer::very_permissive();
    }

    let allowed: Vec<HeaderValue> = raw
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<HeaderValue>().ok())
        .collect();

    if allowed.is_empty() {
        tracing::warn!("No valid CORS origins parsed; falling back to permissive");
        return CorsLayer::very_permissive();
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}
