//! Chess-rules boundary. Positions cross this boundary as FEN
//! strings; everything else in the crate treats them as opaque.

use chess::{Board, BoardStatus, ChessMove, Color, MoveGen};
use std::str::FromStr;

use crate::error::{AppError, Result};

/// Terminal classification of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalKind {
    WhiteWins,
    BlackWins,
    Draw,
}

pub fn initial_position() -> String {
    Board::default().to_string()
}

fn parse_board(fen: &str) -> Result<Board> {
    // A stored position failing to parse means the record was
    // corrupted outside the state machine.
    Board::from_str(fen)
        .map_err(|e| AppError::Internal(format!("Corrupt stored position '{}': {}", fen, e)))
}

pub fn white_to_move(fen: &str) -> Result<bool> {
    Ok(parse_board(fen)?.side_to_move() == Color::White)
}

/// All legal moves for the side to move, in coordinate notation.
pub fn legal_moves(fen: &str) -> Result<Vec<String>> {
    let board = parse_board(fen)?;
    Ok(MoveGen::new_legal(&board).map(|m| m.to_string()).collect())
}

/// Applies `mv` (coordinate notation like "e2e4", SAN accepted as a
/// fallback) and returns the resulting position.
pub fn apply(fen: &str, mv: &str) -> Result<String> {
    let board = parse_board(fen)?;
    let parsed = ChessMove::from_str(mv)
        .or_else(|_| ChessMove::from_san(&board, mv))
        .map_err(|_| AppError::IllegalMove(format!("Unparseable move: {}", mv)))?;

    if !board.legal(parsed) {
        return Err(AppError::IllegalMove(mv.to_string()));
    }

    Ok(board.make_move_new(parsed).to_string())
}

/// `None` while the game is still playable.
pub fn classify_terminal(fen: &str) -> Result<Option<TerminalKind>> {
    let board = parse_board(fen)?;
    Ok(match board.status() {
        BoardStatus::Ongoing => None,
        BoardStatus::Stalemate => Some(TerminalKind::Draw),
        // The side to move is the side that got mated.
        BoardStatus::Checkmate => Some(match board.side_to_move() {
            Color::White => TerminalKind::BlackWins,
            Color::Black => TerminalKind::WhiteWins,
        }),
    })
}
