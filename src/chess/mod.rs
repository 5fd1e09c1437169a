pub use self::engine::{
    position_from_fen, ChessGame, Decision, EndReason, Outcome, RulesEngine, StandardChess,
};
pub use self::error::ChessError;
pub use self::opponent::{AutomatedOpponent, GreedyOpponent, OpponentError, UciEngine};

pub mod engine;
mod error;
pub mod opponent;
