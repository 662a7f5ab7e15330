//! Periodic settlement sweep: finds finished, unsettled sessions and
//! drives each to exactly-once on-chain settlement. Multiple
//! reconciler instances may run concurrently; the store-level
//! compare-and-set claim keeps them from double-paying.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::{sleep, timeout, Duration};

use crate::{
    config::Config,
    db::Database,
    error::{AppError, Result},
    models::{Session, Side},
};

use super::settlement::{SettlementPayout, SettlementSubmitter};

use crate::constants::RECONCILER_BATCH_LIMIT;

/// The slice of the session store the reconciler needs.
#[async_trait]
pub trait SettlementStore: Send + Sync {
    async fn find_unsettled_finished(&self, limit: i64) -> Result<Vec<Session>>;
    /// Compare-and-set claim; `false` means another instance won.
    async fn claim_settlement(&self, session_id: &str) -> Result<bool>;
    async fn release_settlement_claim(&self, session_id: &str) -> Result<()>;
    async fn record_settlement(
        &self,
        session_id: &str,
        tx_hash: &str,
        confirmed_at: DateTime<Utc>,
    ) -> Result<()>;
}

#[async_trait]
impl SettlementStore for Database {
    async fn find_unsettled_finished(&self, limit: i64) -> Result<Vec<Session>> {
        Database::find_unsettled_finished(self, limit).await
    }

    async fn claim_settlement(&self, session_id: &str) -> Result<bool> {
        Database::claim_settlement(self, session_id).await
    }

    async fn release_settlement_claim(&self, session_id: &str) -> Result<()> {
        Database::release_settlement_claim(self, session_id).await
    }

    async fn record_settlement(
        &self,
        session_id: &str,
        tx_hash: &str,
        confirmed_at: DateTime<Utc>,
    ) -> Result<()> {
        Database::record_settlement(self, session_id, tx_hash, confirmed_at).await
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub settled: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct SettlementReconciler {
    store: Arc<dyn SettlementStore>,
    submitter: Arc<dyn SettlementSubmitter>,
    interval: Duration,
    confirm_timeout: Duration,
}

impl SettlementReconciler {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        submitter: Arc<dyn SettlementSubmitter>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            submitter,
            interval: Duration::from_secs(config.reconciler_interval_secs),
            confirm_timeout: Duration::from_secs(config.settlement_confirm_timeout_secs),
        }
    }

    /// Start the reconciliation loop.
    pub async fn start(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                match self.sweep().await {
                    Ok(stats) if stats.settled > 0 || stats.failed > 0 => {
                        tracing::info!(
                            "Settlement sweep: {} settled, {} skipped, {} failed",
                            stats.settled,
                            stats.skipped,
                            stats.failed
                        );
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!("Settlement sweep error: {}", e),
                }
                sleep(self.interval).await;
            }
        });
    }

    /// One full pass over the finished-unsettled backlog. Failures
    /// are isolated per session and wait for the next sweep; there is
    /// no retry loop inside a sweep.
    pub async fn sweep(&self) -> Result<SweepStats> {
        let candidates = self
            .store
            .find_unsettled_finished(RECONCILER_BATCH_LIMIT)
            .await?;

        let mut stats = SweepStats::default();
        for session in candidates {
            match self.settle_session(&session).await {
                Ok(true) => stats.settled += 1,
                Ok(false) => stats.skipped += 1,
                Err(e) => {
                    stats.failed += 1;
                    tracing::error!(
                        "Settlement failed for session {} (claim released): {}",
                        session.session_id,
                        e
                    );
                }
            }
        }
        Ok(stats)
    }

    /// Claims and settles one session. `Ok(false)` means another
    /// reconciler instance holds the claim. On any failure after the
    /// claim the claim is released so a future sweep retries.
    async fn settle_session(&self, session: &Session) -> Result<bool> {
        if !self.store.claim_settlement(&session.session_id).await? {
            return Ok(false);
        }

        match self.submit_and_record(session).await {
            Ok(()) => Ok(true),
            Err(e) => {
                // Never leave a session half-claimed.
                if let Err(release_err) = self
                    .store
                    .release_settlement_claim(&session.session_id)
                    .await
                {
                    tracing::error!(
                        "Failed to release settlement claim for {}: {}",
                        session.session_id,
                        release_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn submit_and_record(&self, session: &Session) -> Result<()> {
        let payout = resolve_payout(session)?;

        let pending = timeout(
            self.confirm_timeout,
            self.submitter.submit(&session.invite_code, &payout),
        )
        .await
        .map_err(|_| AppError::SubmitterFailure("Submission timed out".to_string()))??;

        let confirmed = self
            .submitter
            .await_confirmation(&pending, self.confirm_timeout)
            .await?;

        self.store
            .record_settlement(
                &session.session_id,
                &confirmed.tx_hash,
                confirmed.confirmed_at,
            )
            .await?;

        tracing::info!(
            "Settled session {} in tx {}",
            session.session_id,
            confirmed.tx_hash
        );
        Ok(())
    }
}

/// Resolves the settlement-eligible payout from the outcome and the
/// bound player addresses. The refund path never reaches this flow.
fn resolve_payout(session: &Session) -> Result<SettlementPayout> {
    let outcome = session.outcome.ok_or_else(|| {
        AppError::Internal(format!(
            "Finished session {} has no outcome",
            session.session_id
        ))
    })?;

    match outcome.winner() {
        None => Ok(SettlementPayout::Draw),
        Some(side) => {
            let winner = session.player(side).ok_or_else(|| {
                AppError::Internal(format!(
                    "Finished session {} has an unbound winner slot",
                    session.session_id
                ))
            })?;
            Ok(SettlementPayout::Winner(winner.to_string()))
        }
    }
}
