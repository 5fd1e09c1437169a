use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChessError {
    InvalidNotation(String),
    InvalidMove(String),
    GameOver,
}

impl fmt::Display for ChessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChessError::InvalidNotation(msg) => write!(f, "Invalid notation: {}", msg),
            ChessError::InvalidMove(msg) => write!(f, "Invalid move: {}", msg),
            ChessError::GameOver => write!(f, "Game is already over"),
        }
    }
}

impl std::error::Error for ChessError {}
