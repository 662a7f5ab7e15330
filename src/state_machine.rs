//! Authoritative session state machine. Pure: every transition takes
//! the last-observed record and returns the successor record or a
//! taxonomy error. Persistence (including the version check that
//! serializes concurrent transitions) lives in the store layer.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::constants::SESSION_SCHEMA_VERSION;
use crate::error::{AppError, Result};
use crate::models::{ForceResolution, Outcome, Session, SessionState, Side, Visibility};
use crate::rules::{self, TerminalKind};

pub struct CreateSession {
    pub session_id: String,
    pub invite_code: String,
    pub first_player: String,
    pub wager_token: String,
    pub wager_amount: Decimal,
    pub visibility: Visibility,
}

/// `create(sessionId, firstPlayer, wager, visibility)` -> `waiting`.
pub fn create(params: CreateSession, now: DateTime<Utc>) -> Result<Session> {
    if params.first_player.trim().is_empty() {
        return Err(AppError::BadRequest("first_player is required".to_string()));
    }
    if params.wager_token.trim().is_empty() {
        return Err(AppError::BadRequest("wager_token is required".to_string()));
    }
    if params.wager_amount <= Decimal::ZERO {
        return Err(AppError::BadRequest(
            "wager_amount must be positive".to_string(),
        ));
    }

    Ok(Session {
        session_id: params.session_id,
        invite_code: params.invite_code,
        first_player: params.first_player,
        second_player: None,
        position: rules::initial_position(),
        wager_token: params.wager_token,
        wager_amount: params.wager_amount,
        visibility: params.visibility,
        state: SessionState::Waiting,
        outcome: None,
        settlement_status: None,
        settlement_tx_hash: None,
        settlement_confirmed_at: None,
        schema_version: SESSION_SCHEMA_VERSION,
        version: 0,
        created_at: now,
        updated_at: now,
    })
}

/// Binds the second player and activates the session atomically.
pub fn join(session: &Session, second_player: &str, now: DateTime<Utc>) -> Result<Session> {
    if session.state != SessionState::Waiting {
        return Err(AppError::InvalidState(format!(
            "Cannot join a session in state {}",
            session.state.as_str()
        )));
    }
    if second_player == session.first_player {
        return Err(AppError::SelfJoin);
    }

    let mut next = session.clone();
    next.second_player = Some(second_player.to_string());
    next.state = SessionState::Active;
    next.updated_at = now;
    Ok(next)
}

/// Applies a legal move by the player whose turn it is. If the
/// resulting position is terminal the session finishes atomically
/// with the outcome from the terminal classification.
pub fn apply_move(
    session: &Session,
    mover: &str,
    mv: &str,
    now: DateTime<Utc>,
) -> Result<Session> {
    if session.state != SessionState::Active {
        return Err(AppError::InvalidState(format!(
            "Cannot move in state {}",
            session.state.as_str()
        )));
    }

    let side_to_move = if rules::white_to_move(&session.position)? {
        Side::First
    } else {
        Side::Second
    };
    // `active` guarantees both slots are bound.
    let expected = session.player(side_to_move).ok_or_else(|| {
        AppError::Internal("Active session with unbound player slot".to_string())
    })?;
    if mover != expected {
        return Err(AppError::NotYourTurn);
    }

    let mut next = session.clone();
    next.position = rules::apply(&session.position, mv)?;
    if let Some(terminal) = rules::classify_terminal(&next.position)? {
        next.state = SessionState::Finished;
        next.outcome = Some(match terminal {
            TerminalKind::WhiteWins => Outcome::FirstWins,
            TerminalKind::BlackWins => Outcome::SecondWins,
            TerminalKind::Draw => Outcome::Draw,
        });
    }
    next.updated_at = now;
    Ok(next)
}

/// Resignation by either bound player finishes the session in favor
/// of the opponent.
pub fn resign(session: &Session, resigner: &str, now: DateTime<Utc>) -> Result<Session> {
    if session.state != SessionState::Active {
        return Err(AppError::InvalidState(format!(
            "Cannot resign in state {}",
            session.state.as_str()
        )));
    }
    let side = session
        .side_of(resigner)
        .ok_or_else(|| AppError::Unauthorized("Not a participant of this session".to_string()))?;

    let mut next = session.clone();
    next.state = SessionState::Finished;
    next.outcome = Some(side.opposite().wins());
    next.updated_at = now;
    Ok(next)
}

/// Withdrawal by the first player before anyone joined.
pub fn cancel(session: &Session, requester: &str, now: DateTime<Utc>) -> Result<Session> {
    if session.state != SessionState::Waiting {
        return Err(AppError::InvalidState(format!(
            "Cannot cancel a session in state {}",
            session.state.as_str()
        )));
    }
    if requester != session.first_player {
        return Err(AppError::Unauthorized(
            "Only the creator may cancel".to_string(),
        ));
    }

    let mut next = session.clone();
    next.state = SessionState::Cancelled;
    next.updated_at = now;
    Ok(next)
}

/// Administrative escape hatch for sessions abandoned by a
/// disconnected participant. Bypasses game rules; callers must audit
/// every invocation.
pub fn force_resolve(
    session: &Session,
    resolution: ForceResolution,
    now: DateTime<Utc>,
) -> Result<Session> {
    let mut next = session.clone();
    match resolution {
        ForceResolution::Refund => {
            if !matches!(
                session.state,
                SessionState::Waiting | SessionState::Active
            ) {
                return Err(AppError::InvalidState(format!(
                    "Cannot refund a session in state {}",
                    session.state.as_str()
                )));
            }
            next.state = SessionState::Refunded;
        }
        ForceResolution::Outcome(outcome) => {
            if session.state != SessionState::Active {
                return Err(AppError::InvalidState(format!(
                    "Cannot force an outcome in state {}",
                    session.state.as_str()
                )));
            }
            next.state = SessionState::Finished;
            next.outcome = Some(outcome);
        }
    }
    next.updated_at = now;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn new_session() -> Session {
        create(
            CreateSession {
                session_id: "a".repeat(32),
                invite_code: "b".repeat(62),
                first_player: "0xalice".to_string(),
                wager_token: "STRK".to_string(),
                wager_amount: Decimal::from(10),
                visibility: Visibility::Public,
            },
            Utc::now(),
        )
        .unwrap()
    }

    fn active_session() -> Session {
        join(&new_session(), "0xbob", Utc::now()).unwrap()
    }

    #[test]
    fn create_starts_waiting_without_outcome() {
        let s = new_session();
        assert_eq!(s.state, SessionState::Waiting);
        assert!(s.outcome.is_none());
        assert!(s.second_player.is_none());
        assert!(s.settlement_status.is_none());
    }

    #[test]
    fn create_rejects_non_positive_wager() {
        let err = create(
            CreateSession {
                session_id: "a".repeat(32),
                invite_code: "b".repeat(62),
                first_player: "0xalice".to_string(),
                wager_token: "STRK".to_string(),
                wager_amount: Decimal::ZERO,
                visibility: Visibility::Public,
            },
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "BAD_REQUEST");
    }

    #[test]
    fn join_binds_second_and_activates() {
        let s = active_session();
        assert_eq!(s.state, SessionState::Active);
        assert_eq!(s.second_player.as_deref(), Some("0xbob"));
    }

    #[test]
    fn join_rejects_creator() {
        let err = join(&new_session(), "0xalice", Utc::now()).unwrap_err();
        assert_eq!(err.code(), "SELF_JOIN");
    }

    #[test]
    fn join_after_join_is_invalid_state() {
        let s = active_session();
        let err = join(&s, "0xcarol", Utc::now()).unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
    }

    #[test]
    fn cancel_only_before_join() {
        let s = new_session();
        let cancelled = cancel(&s, "0xalice", Utc::now()).unwrap();
        assert_eq!(cancelled.state, SessionState::Cancelled);

        let err = cancel(&active_session(), "0xalice", Utc::now()).unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
    }

    #[test]
    fn cancel_by_stranger_is_unauthorized() {
        let err = cancel(&new_session(), "0xmallory", Utc::now()).unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED");
    }

    #[test]
    fn move_out_of_turn_fails_and_leaves_position() {
        let s = active_session();
        let before = s.position.clone();
        let err = apply_move(&s, "0xbob", "e7e5", Utc::now()).unwrap_err();
        assert_eq!(err.code(), "NOT_YOUR_TURN");
        assert_eq!(s.position, before);
    }

    #[test]
    fn illegal_move_never_mutates_position() {
        let s = active_session();
        let err = apply_move(&s, "0xalice", "e2e5", Utc::now()).unwrap_err();
        assert_eq!(err.code(), "ILLEGAL_MOVE");
    }

    #[test]
    fn move_in_waiting_is_invalid_state() {
        let err = apply_move(&new_session(), "0xalice", "e2e4", Utc::now()).unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
    }

    #[test]
    fn alternating_moves_swap_turns() {
        let s = active_session();
        let s = apply_move(&s, "0xalice", "e2e4", Utc::now()).unwrap();
        let s = apply_move(&s, "0xbob", "e7e5", Utc::now()).unwrap();
        assert_eq!(s.state, SessionState::Active);
        assert!(s.outcome.is_none());
    }

    #[test]
    fn checkmate_finishes_with_outcome_set_atomically() {
        // Fool's mate: second player (Black) delivers mate.
        let mut s = active_session();
        for (player, mv) in [
            ("0xalice", "f2f3"),
            ("0xbob", "e7e5"),
            ("0xalice", "g2g4"),
            ("0xbob", "d8h4"),
        ] {
            s = apply_move(&s, player, mv, Utc::now()).unwrap();
        }
        assert_eq!(s.state, SessionState::Finished);
        assert_eq!(s.outcome, Some(Outcome::SecondWins));

        // No further moves accepted on a finished session.
        let err = apply_move(&s, "0xalice", "e2e4", Utc::now()).unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
    }

    #[test]
    fn resign_awards_opponent_immediately() {
        let s = active_session();
        let s = resign(&s, "0xbob", Utc::now()).unwrap();
        assert_eq!(s.state, SessionState::Finished);
        assert_eq!(s.outcome, Some(Outcome::FirstWins));

        let err = apply_move(&s, "0xalice", "e2e4", Utc::now()).unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
    }

    #[test]
    fn resign_by_spectator_is_unauthorized() {
        let err = resign(&active_session(), "0xmallory", Utc::now()).unwrap_err();
        assert_eq!(err.code(), "UNAUTHORIZED");
    }

    #[test]
    fn force_refund_allowed_waiting_and_active_only() {
        let refunded =
            force_resolve(&new_session(), ForceResolution::Refund, Utc::now()).unwrap();
        assert_eq!(refunded.state, SessionState::Refunded);

        let refunded =
            force_resolve(&active_session(), ForceResolution::Refund, Utc::now()).unwrap();
        assert_eq!(refunded.state, SessionState::Refunded);

        let err = force_resolve(&refunded, ForceResolution::Refund, Utc::now()).unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
    }

    #[test]
    fn forced_outcome_requires_active() {
        let err = force_resolve(
            &new_session(),
            ForceResolution::Outcome(Outcome::FirstWins),
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");

        let s = force_resolve(
            &active_session(),
            ForceResolution::Outcome(Outcome::Draw),
            Utc::now(),
        )
        .unwrap();
        assert_eq!(s.state, SessionState::Finished);
        assert_eq!(s.outcome, Some(Outcome::Draw));
    }

    #[test]
    fn outcome_set_iff_finished() {
        // Walk every reachable end state and check the invariant.
        let cancelled = cancel(&new_session(), "0xalice", Utc::now()).unwrap();
        assert!(cancelled.outcome.is_none());

        let refunded =
            force_resolve(&active_session(), ForceResolution::Refund, Utc::now()).unwrap();
        assert!(refunded.outcome.is_none());

        let finished = resign(&active_session(), "0xalice", Utc::now()).unwrap();
        assert!(finished.outcome.is_some());
    }
}
