//! Cross-process delta bridge. With Redis configured, committed
//! deltas go through a pub/sub channel per session and every relay
//! process (including the publishing one) fans them out to its local
//! observers; without Redis, deltas go straight to the local relay.

use std::sync::Arc;

use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::time::{sleep, Duration};

use crate::error::Result;
use crate::models::Session;

use super::SessionRelay;

const CHANNEL_PREFIX: &str = "session:";
const RECONNECT_DELAY_SECS: u64 = 5;

/// Wire form of a session delta, shared by the bridge, the WebSocket
/// snapshot, and direct relay publishes.
pub fn delta_message(session: &Session) -> String {
    serde_json::json!({
        "type": "delta",
        "session_id": session.session_id,
        "session": session,
    })
    .to_string()
}

#[derive(Clone)]
pub struct DeltaPublisher {
    relay: Arc<SessionRelay>,
    redis: Option<ConnectionManager>,
}

impl DeltaPublisher {
    pub fn local(relay: Arc<SessionRelay>) -> Self {
        Self { relay, redis: None }
    }

    pub fn with_bridge(relay: Arc<SessionRelay>, redis: ConnectionManager) -> Self {
        Self {
            relay,
            redis: Some(redis),
        }
    }

    /// Publishes the committed session to observers. Publish happens
    /// strictly after the store write, so deltas carry the committed
    /// version.
    pub async fn publish_session(&self, session: &Session) {
        let delta = delta_message(session);

        if let Some(redis) = &self.redis {
            let channel = format!("{}{}", CHANNEL_PREFIX, session.session_id);
            let mut conn = redis.clone();
            match conn.publish::<_, _, ()>(&channel, &delta).await {
                Ok(()) => return,
                Err(e) => {
                    // Local observers still get the delta; remote
                    // processes reconcile on reconnect.
                    tracing::warn!("Delta bridge publish failed, local fan-out only: {}", e);
                }
            }
        }

        self.relay.publish(&session.session_id, &delta);
    }
}

/// Forwards bridge messages into the local relay. Runs until process
/// shutdown, reconnecting on any Redis failure.
pub async fn start_bridge(redis_url: String, relay: Arc<SessionRelay>) {
    loop {
        match run_bridge(&redis_url, &relay).await {
            Ok(()) => tracing::warn!("Delta bridge stream ended, reconnecting"),
            Err(e) => tracing::error!("Delta bridge error: {}", e),
        }
        sleep(Duration::from_secs(RECONNECT_DELAY_SECS)).await;
    }
}

async fn run_bridge(redis_url: &str, relay: &SessionRelay) -> Result<()> {
    let client = redis::Client::open(redis_url)?;
    let mut pubsub = client.get_async_pubsub().await?;
    pubsub.psubscribe(format!("{}*", CHANNEL_PREFIX)).await?;
    tracing::info!("Delta bridge subscribed");

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let channel = msg.get_channel_name().to_string();
        let Some(session_id) = channel.strip_prefix(CHANNEL_PREFIX) else {
            continue;
        };
        match msg.get_payload::<String>() {
            Ok(payload) => {
                relay.publish(session_id, &payload);
            }
            Err(e) => tracing::warn!("Dropping malformed bridge payload: {}", e),
        }
    }

    Ok(())
}
