use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::{AppError, Result};

// ==================== ENUMS ====================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Waiting,
    Active,
    Finished,
    Cancelled,
    Refunded,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Finished => "finished",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "waiting" => Ok(Self::Waiting),
            "active" => Ok(Self::Active),
            "finished" => Ok(Self::Finished),
            "cancelled" => Ok(Self::Cancelled),
            "refunded" => Ok(Self::Refunded),
            other => Err(AppError::Internal(format!(
                "Unknown session state in store: {}",
                other
            ))),
        }
    }

    /// Terminal with respect to `state`; the settlement sub-flow
    /// still progresses on `finished`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Cancelled | Self::Refunded)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    FirstWins,
    SecondWins,
    Draw,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FirstWins => "first_wins",
            Self::SecondWins => "second_wins",
            Self::Draw => "draw",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "first_wins" => Ok(Self::FirstWins),
            "second_wins" => Ok(Self::SecondWins),
            "draw" => Ok(Self::Draw),
            other => Err(AppError::Internal(format!(
                "Unknown outcome in store: {}",
                other
            ))),
        }
    }

    pub fn winner(self) -> Option<Side> {
        match self {
            Self::FirstWins => Some(Side::First),
            Self::SecondWins => Some(Side::Second),
            Self::Draw => None,
        }
    }
}

/// Player slot. The first player always plays White.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    First,
    Second,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Self::First => Self::Second,
            Self::Second => Self::First,
        }
    }

    pub fn wins(self) -> Outcome {
        match self {
            Self::First => Outcome::FirstWins,
            Self::Second => Outcome::SecondWins,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Private,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            other => Err(AppError::BadRequest(format!(
                "Unknown visibility: {}",
                other
            ))),
        }
    }
}

/// Settlement sub-state, tracked independently of `state`.
/// Absent (`None` on the session) means not yet claimed by any
/// reconciler; `Pending` is the single-flight claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Settlement {
    Pending,
    Confirmed,
}

impl Settlement {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(Self::Pending),
            "confirmed" => Ok(Self::Confirmed),
            other => Err(AppError::Internal(format!(
                "Unknown settlement status in store: {}",
                other
            ))),
        }
    }
}

/// Administrative escape hatch argument for `force_resolve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceResolution {
    Outcome(Outcome),
    Refund,
}

impl ForceResolution {
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "refund" => Ok(Self::Refund),
            other => Ok(Self::Outcome(Outcome::parse(other).map_err(|_| {
                AppError::BadRequest(format!("Unknown resolution: {}", other))
            })?)),
        }
    }
}

// ==================== SESSION ====================

/// One chess game instance with wager, players, and lifecycle state.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub session_id: String,
    /// Fixed-width on-chain identifier correlating this session to
    /// the wager escrow. Minted at creation, never derived from the
    /// session id.
    pub invite_code: String,
    pub first_player: String,
    pub second_player: Option<String>,
    /// Current board position (FEN) including side-to-move.
    pub position: String,
    pub wager_token: String,
    pub wager_amount: Decimal,
    pub visibility: Visibility,
    pub state: SessionState,
    pub outcome: Option<Outcome>,
    pub settlement_status: Option<Settlement>,
    pub settlement_tx_hash: Option<String>,
    pub settlement_confirmed_at: Option<DateTime<Utc>>,
    pub schema_version: i32,
    /// Optimistic-concurrency token; incremented by the store on
    /// every committed write.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Player bound to a slot, if any.
    pub fn player(&self, side: Side) -> Option<&str> {
        match side {
            Side::First => Some(self.first_player.as_str()),
            Side::Second => self.second_player.as_deref(),
        }
    }

    /// Which slot an address is bound to, if it participates.
    pub fn side_of(&self, address: &str) -> Option<Side> {
        if self.first_player == address {
            return Some(Side::First);
        }
        if self.second_player.as_deref() == Some(address) {
            return Some(Side::Second);
        }
        None
    }
}

/// Raw row shape; the store keeps enums as TEXT.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRow {
    pub session_id: String,
    pub invite_code: String,
    pub first_player: String,
    pub second_player: Option<String>,
    pub position: String,
    pub wager_token: String,
    pub wager_amount: Decimal,
    pub visibility: String,
    pub state: String,
    pub outcome: Option<String>,
    pub settlement_status: Option<String>,
    pub settlement_tx_hash: Option<String>,
    pub settlement_confirmed_at: Option<DateTime<Utc>>,
    pub schema_version: i32,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<SessionRow> for Session {
    type Error = AppError;

    fn try_from(row: SessionRow) -> Result<Self> {
        Ok(Session {
            visibility: Visibility::parse(&row.visibility)?,
            state: SessionState::parse(&row.state)?,
            outcome: row.outcome.as_deref().map(Outcome::parse).transpose()?,
            settlement_status: row
                .settlement_status
                .as_deref()
                .map(Settlement::parse)
                .transpose()?,
            session_id: row.session_id,
            invite_code: row.invite_code,
            first_player: row.first_player,
            second_player: row.second_player,
            position: row.position,
            wager_token: row.wager_token,
            wager_amount: row.wager_amount,
            settlement_tx_hash: row.settlement_tx_hash,
            settlement_confirmed_at: row.settlement_confirmed_at,
            schema_version: row.schema_version,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

// ==================== API ENVELOPE ====================

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}
