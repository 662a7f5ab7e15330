pub mod admin;
pub mod health;
pub mod sessions;

use redis::aio::ConnectionManager;
use std::sync::Arc;

use crate::{config::Config, db::Database, relay::SessionRelay, services::SessionService};

/// Shared application state passed to all handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub redis: Option<ConnectionManager>,
    pub relay: Arc<SessionRelay>,
    pub sessions: Arc<SessionService>,
    pub config: Config,
}
