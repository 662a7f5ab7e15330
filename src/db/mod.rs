use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::{
    config::Config,
    error::{AppError, Result},
    models::{Session, SessionRow},
};

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ==================== SESSION QUERIES ====================
impl Database {
    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>("SELECT * FROM sessions WHERE session_id = $1")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Session::try_from).transpose()
    }

    /// Creation fails if the session id (or minted invite code) is
    /// already taken.
    pub async fn insert_session(&self, session: &Session) -> Result<Session> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            INSERT INTO sessions
                (session_id, invite_code, first_player, position,
                 wager_token, wager_amount, visibility, state, schema_version)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
            RETURNING *
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.invite_code)
        .bind(&session.first_player)
        .bind(&session.position)
        .bind(&session.wager_token)
        .bind(session.wager_amount)
        .bind(session.visibility.as_str())
        .bind(session.state.as_str())
        .bind(session.schema_version)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                AppError::AlreadyExists(session.session_id.clone())
            }
            _ => AppError::Database(e),
        })?;

        Session::try_from(row)
    }

    /// Conditional full-record write of the mutable game fields. The
    /// store rejects the write when `expected_version` no longer
    /// matches; callers re-read and retry. This is the only way game
    /// state is mutated, so two racing transitions can never both
    /// commit against the same observed record.
    pub async fn put_if_version(
        &self,
        session: &Session,
        expected_version: i64,
    ) -> Result<Option<Session>> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            UPDATE sessions
            SET second_player = $3,
                position      = $4,
                state         = $5,
                outcome       = $6,
                version       = version + 1,
                updated_at    = NOW()
            WHERE session_id = $1 AND version = $2
            RETURNING *
            "#,
        )
        .bind(&session.session_id)
        .bind(expected_version)
        .bind(&session.second_player)
        .bind(&session.position)
        .bind(session.state.as_str())
        .bind(session.outcome.map(|o| o.as_str()))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Session::try_from).transpose()
    }

    pub async fn list_open_sessions(&self, limit: i64) -> Result<Vec<Session>> {
        let rows = sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM sessions
             WHERE state = 'waiting' AND visibility = 'public'
             ORDER BY created_at DESC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Session::try_from).collect()
    }
}

// ==================== SETTLEMENT QUERIES ====================
impl Database {
    pub async fn find_unsettled_finished(&self, limit: i64) -> Result<Vec<Session>> {
        let rows = sqlx::query_as::<_, SessionRow>(
            "SELECT * FROM sessions
             WHERE state = 'finished' AND settlement_status IS NULL
             ORDER BY updated_at ASC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Session::try_from).collect()
    }

    /// Single-flight claim: compare-and-set against the claim being
    /// absent, not a plain existence check, so concurrent reconciler
    /// instances cannot both win.
    pub async fn claim_settlement(&self, session_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE sessions
             SET settlement_status = 'pending', updated_at = NOW()
             WHERE session_id = $1
               AND state = 'finished'
               AND settlement_status IS NULL",
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Reverts a failed claim so the next sweep retries.
    pub async fn release_settlement_claim(&self, session_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE sessions
             SET settlement_status = NULL, updated_at = NOW()
             WHERE session_id = $1 AND settlement_status = 'pending'",
        )
        .bind(session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_settlement(
        &self,
        session_id: &str,
        tx_hash: &str,
        confirmed_at: DateTime<Utc>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE sessions
             SET settlement_status = 'confirmed',
                 settlement_tx_hash = $2,
                 settlement_confirmed_at = $3,
                 updated_at = NOW()
             WHERE session_id = $1 AND settlement_status = 'pending'",
        )
        .bind(session_id)
        .bind(tx_hash)
        .bind(confirmed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Err(AppError::Internal(format!(
                "Settlement receipt for {} written without a live claim",
                session_id
            )));
        }
        Ok(())
    }
}

// ==================== AUDIT QUERIES ====================
impl Database {
    pub async fn insert_admin_audit(
        &self,
        actor: &str,
        session_id: &str,
        action: &str,
        detail: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO admin_audit_log (actor, session_id, action, detail)
             VALUES ($1,$2,$3,$4)",
        )
        .bind(actor)
        .bind(session_id)
        .bind(action)
        .bind(detail)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
