//! Rules-engine boundary used by the session orchestrator.
//!
//! The orchestrator never looks inside a game state. It loads states from the
//! stored notation, applies move text, asks for the outcome and writes the
//! serialized form back, all through [`RulesEngine`].

use crate::chess::ChessError;
use crate::storage::PlayerColor;
use shakmaty::{
    fen::Fen,
    san::{San, SanPlus},
    uci::UciMove,
    CastlingMode, Chess, Color, EnPassantMode, Move, Position,
};
use std::collections::HashMap;
use std::fmt;

/// Halfmoves without a capture or pawn move after which the game is drawn
const SEVENTY_FIVE_MOVE_HALFMOVES: u32 = 150;
/// Occurrences of the same position after which the game is drawn
const FIVEFOLD_REPETITIONS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    InProgress,
    Decided(Decision),
}

impl Outcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Outcome::Decided(_))
    }
}

/// How a finished game ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub winner: Option<PlayerColor>,
    pub reason: EndReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Checkmate,
    Stalemate,
    InsufficientMaterial,
    FivefoldRepetition,
    SeventyFiveMoveRule,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Checkmate => "checkmate",
            EndReason::Stalemate => "stalemate",
            EndReason::InsufficientMaterial => "insufficient material",
            EndReason::FivefoldRepetition => "fivefold repetition",
            EndReason::SeventyFiveMoveRule => "seventy-five-move rule",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let score = match self.winner {
            Some(PlayerColor::White) => "1-0",
            Some(PlayerColor::Black) => "0-1",
            None => "1/2-1/2",
        };
        write!(f, "{} {}", score, self.reason.as_str())
    }
}

/// Move legality, notation and outcome for one kind of game
pub trait RulesEngine: Send + Sync + 'static {
    type State: Clone + Send + Sync + 'static;
    type Move;

    /// Rebuild a state from its serialized form. The empty string is the
    /// initial position.
    fn load(&self, notation: &str) -> Result<Self::State, ChessError>;

    /// Apply move text to `state`, returning the move in canonical notation.
    /// `state` is left untouched on error.
    fn apply_move(&self, state: &mut Self::State, text: &str) -> Result<String, ChessError>;

    fn legal_moves(&self, state: &Self::State) -> Vec<Self::Move>;

    fn render_move(&self, mv: &Self::Move, state: &Self::State) -> String;

    fn outcome(&self, state: &Self::State) -> Outcome;

    fn serialize(&self, state: &Self::State) -> String;

    fn side_to_move(&self, state: &Self::State) -> PlayerColor;

    /// Position in a form an external opponent program understands
    fn position_text(&self, state: &Self::State) -> String;
}

/// A standard game replayed from its SAN move history
#[derive(Debug, Clone)]
pub struct ChessGame {
    position: Chess,
    history: Vec<String>,
    /// How often each position has occurred, keyed by the repetition-relevant
    /// FEN fields
    occurrences: HashMap<String, u32>,
}

impl Default for ChessGame {
    fn default() -> Self {
        let mut game = Self {
            position: Chess::default(),
            history: Vec::new(),
            occurrences: HashMap::new(),
        };
        game.record_position();
        game
    }
}

impl ChessGame {
    pub fn position(&self) -> &Chess {
        &self.position
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Times the current position has occurred, including now
    pub fn repetitions(&self) -> u32 {
        self.occurrences
            .get(&repetition_key(&self.position))
            .copied()
            .unwrap_or(0)
    }

    fn record_position(&mut self) {
        *self
            .occurrences
            .entry(repetition_key(&self.position))
            .or_insert(0) += 1;
    }
}

/// Placement, side to move, castling rights and en passant square. Move
/// counters do not affect repetition.
fn repetition_key(position: &Chess) -> String {
    Fen::from_position(position.clone(), EnPassantMode::Legal)
        .to_string()
        .split_whitespace()
        .take(4)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Standard chess rules backed by `shakmaty`. Moves are accepted in SAN
/// (`Nf3`, `exd5`, `O-O`, `Qh5#`) or UCI (`g1f3`) form.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandardChess;

impl StandardChess {
    fn parse_move(position: &Chess, text: &str) -> Result<Move, ChessError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ChessError::InvalidMove("empty move".to_string()));
        }

        if let Ok(san) = text.parse::<SanPlus>() {
            if let Ok(m) = san.san.to_move(position) {
                return Ok(m);
            }
        }
        if let Ok(uci) = text.parse::<UciMove>() {
            if let Ok(m) = uci.to_move(position) {
                return Ok(m);
            }
        }
        Err(ChessError::InvalidMove(text.to_string()))
    }
}

impl RulesEngine for StandardChess {
    type State = ChessGame;
    type Move = Move;

    fn load(&self, notation: &str) -> Result<ChessGame, ChessError> {
        let mut game = ChessGame::default();
        for (ply, token) in notation.split_whitespace().enumerate() {
            let san: SanPlus = token.parse().map_err(|_| {
                ChessError::InvalidNotation(format!("unreadable move {} at ply {}", token, ply + 1))
            })?;
            let m = san.san.to_move(&game.position).map_err(|_| {
                ChessError::InvalidNotation(format!("illegal move {} at ply {}", token, ply + 1))
            })?;
            game.position.play_unchecked(&m);
            game.history.push(san.san.to_string());
            game.record_position();
        }
        Ok(game)
    }

    fn apply_move(&self, state: &mut ChessGame, text: &str) -> Result<String, ChessError> {
        if self.outcome(state).is_terminal() {
            return Err(ChessError::GameOver);
        }

        let m = Self::parse_move(&state.position, text)?;
        let san = San::from_move(&state.position, &m).to_string();
        state.position = state
            .position
            .clone()
            .play(&m)
            .map_err(|_| ChessError::InvalidMove(text.to_string()))?;
        state.history.push(san.clone());
        state.record_position();
        Ok(san)
    }

    fn legal_moves(&self, state: &ChessGame) -> Vec<Move> {
        if self.outcome(state).is_terminal() {
            return Vec::new();
        }
        state.position.legal_moves().into_iter().collect()
    }

    fn render_move(&self, mv: &Move, state: &ChessGame) -> String {
        San::from_move(&state.position, mv).to_string()
    }

    fn outcome(&self, state: &ChessGame) -> Outcome {
        let position = &state.position;
        let decision = if position.is_checkmate() {
            Some(Decision {
                winner: Some(to_player_color(!position.turn())),
                reason: EndReason::Checkmate,
            })
        } else if position.is_stalemate() {
            Some(Decision {
                winner: None,
                reason: EndReason::Stalemate,
            })
        } else if position.is_insufficient_material() {
            Some(Decision {
                winner: None,
                reason: EndReason::InsufficientMaterial,
            })
        } else if state.repetitions() >= FIVEFOLD_REPETITIONS {
            Some(Decision {
                winner: None,
                reason: EndReason::FivefoldRepetition,
            })
        } else if position.halfmoves() >= SEVENTY_FIVE_MOVE_HALFMOVES {
            Some(Decision {
                winner: None,
                reason: EndReason::SeventyFiveMoveRule,
            })
        } else {
            None
        };

        decision.map_or(Outcome::InProgress, Outcome::Decided)
    }

    fn serialize(&self, state: &ChessGame) -> String {
        state.history.join(" ")
    }

    fn side_to_move(&self, state: &ChessGame) -> PlayerColor {
        to_player_color(state.position.turn())
    }

    fn position_text(&self, state: &ChessGame) -> String {
        Fen::from_position(state.position.clone(), EnPassantMode::Legal).to_string()
    }
}

fn to_player_color(color: Color) -> PlayerColor {
    match color {
        Color::White => PlayerColor::White,
        Color::Black => PlayerColor::Black,
    }
}

/// Parse a FEN string into a playable position
pub fn position_from_fen(fen: &str) -> Result<Chess, ChessError> {
    let fen: Fen = fen
        .trim()
        .parse()
        .map_err(|e| ChessError::InvalidNotation(format!("{}", e)))?;
    fen.into_position(CastlingMode::Standard)
        .map_err(|e| ChessError::InvalidNotation(format!("{}", e)))
}
