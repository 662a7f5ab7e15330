pub mod reconciler;
pub mod session_service;
pub mod settlement;

pub use reconciler::SettlementReconciler;
pub use session_service::SessionService;
pub use settlement::{SettlementSubmitter, StarknetSubmitter};

use crate::{config::Config, db::Database};
use std::sync::Arc;

/// Start all background services. The reconciler only runs when a
/// settlement signer is configured; a relay-only deployment is valid
/// (some other instance settles).
pub async fn start_background_services(db: Database, config: Config) {
    tracing::info!("Starting background services...");

    if !config.has_settlement_signer() {
        tracing::warn!("Settlement reconciler disabled: no settlement signer configured");
        return;
    }

    match StarknetSubmitter::from_config(&config) {
        Ok(submitter) => {
            let reconciler = Arc::new(SettlementReconciler::new(
                Arc::new(db),
                Arc::new(submitter),
                &config,
            ));
            reconciler.start().await;
            tracing::info!(
                "Settlement reconciler started (interval {}s)",
                config.reconciler_interval_secs
            );
        }
        Err(e) => {
            tracing::error!("Settlement submitter misconfigured, reconciler disabled: {}", e);
        }
    }
}
