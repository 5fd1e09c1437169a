//! Automated opponents for games whose black seat is not a person.

use crate::chess::engine::position_from_fen;
use async_trait::async_trait;
use shakmaty::{uci::UciMove, CastlingMode, Chess, Move, Position, Role};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{ChildStdout, Command};
use tracing::{debug, warn};

/// Extra time granted to an external engine on top of its thinking time
const ENGINE_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum OpponentError {
    #[error("Failed to start engine {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Engine I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Engine protocol error: {0}")]
    Protocol(String),

    #[error("Engine did not answer within {0:?}")]
    Timeout(Duration),

    #[error("No legal move in position {0}")]
    NoMove(String),

    #[error("Invalid position: {0}")]
    InvalidPosition(String),
}

/// Something that picks the next move for the side to move in a position.
/// Positions are given as FEN and moves are returned in UCI long algebraic
/// form (`e2e4`, `e7e8q`).
#[async_trait]
pub trait AutomatedOpponent: Send + Sync {
    fn name(&self) -> &str;

    async fn choose_move(&self, fen: &str, think_time: Duration) -> Result<String, OpponentError>;
}

/// An external engine speaking UCI over stdin/stdout. One process is spawned
/// per move request.
#[derive(Debug, Clone)]
pub struct UciEngine {
    path: PathBuf,
}

impl UciEngine {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    async fn run_search(&self, fen: &str, think_time: Duration) -> Result<String, OpponentError> {
        let mut child = Command::new(&self.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| OpponentError::Spawn {
                path: self.path.display().to_string(),
                source,
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| OpponentError::Protocol("engine stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| OpponentError::Protocol("engine stdout unavailable".to_string()))?;
        let mut lines = BufReader::new(stdout).lines();

        stdin.write_all(b"uci\n").await?;
        stdin.flush().await?;
        wait_for(&mut lines, "uciok").await?;

        stdin.write_all(b"isready\n").await?;
        stdin.flush().await?;
        wait_for(&mut lines, "readyok").await?;

        let search = format!(
            "ucinewgame\nposition fen {}\ngo movetime {}\n",
            fen,
            think_time.as_millis()
        );
        stdin.write_all(search.as_bytes()).await?;
        stdin.flush().await?;

        let best = loop {
            let line = lines
                .next_line()
                .await?
                .ok_or_else(|| OpponentError::Protocol("engine closed before bestmove".to_string()))?;
            if let Some(rest) = line.strip_prefix("bestmove") {
                break rest.split_whitespace().next().map(str::to_string);
            }
        };

        // Best effort, the process is killed on drop either way
        let _ = stdin.write_all(b"quit\n").await;

        match best {
            Some(mv) if mv != "(none)" && mv != "0000" => Ok(mv),
            _ => Err(OpponentError::NoMove(fen.to_string())),
        }
    }
}

async fn wait_for(lines: &mut Lines<BufReader<ChildStdout>>, token: &str) -> Result<(), OpponentError> {
    while let Some(line) = lines.next_line().await? {
        if line.trim() == token {
            return Ok(());
        }
    }
    Err(OpponentError::Protocol(format!("engine closed before {}", token)))
}

#[async_trait]
impl AutomatedOpponent for UciEngine {
    fn name(&self) -> &str {
        "uci"
    }

    async fn choose_move(&self, fen: &str, think_time: Duration) -> Result<String, OpponentError> {
        let deadline = think_time + ENGINE_GRACE;
        debug!("Asking {} for a move in {}", self.path.display(), fen);

        match tokio::time::timeout(deadline, self.run_search(fen, think_time)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Engine {} timed out after {:?}", self.path.display(), deadline);
                Err(OpponentError::Timeout(deadline))
            }
        }
    }
}

/// Built-in opponent: mates when it can, otherwise takes the most valuable
/// material available. Ties go to the first move in generation order, so
/// the same position always yields the same move.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedyOpponent;

impl GreedyOpponent {
    pub fn pick(&self, position: &Chess) -> Option<Move> {
        let mut best: Option<(i32, Move)> = None;
        for m in position.legal_moves() {
            let score = score_move(position, &m);
            if best.as_ref().map_or(true, |(top, _)| score > *top) {
                best = Some((score, m));
            }
        }
        best.map(|(_, m)| m)
    }
}

fn score_move(position: &Chess, m: &Move) -> i32 {
    let mut after = position.clone();
    after.play_unchecked(m);
    if after.is_checkmate() {
        return 10_000;
    }

    let mut score = m.capture().map_or(0, role_value) * 10;
    score += m.promotion().map_or(0, role_value) * 10;
    if after.is_check() {
        score += 1;
    }
    if after.is_stalemate() {
        score -= 500;
    }
    score
}

fn role_value(role: Role) -> i32 {
    match role {
        Role::Pawn => 1,
        Role::Knight | Role::Bishop => 3,
        Role::Rook => 5,
        Role::Queen => 9,
        Role::King => 0,
    }
}

#[async_trait]
impl AutomatedOpponent for GreedyOpponent {
    fn name(&self) -> &str {
        "greedy"
    }

    async fn choose_move(&self, fen: &str, _think_time: Duration) -> Result<String, OpponentError> {
        let position =
            position_from_fen(fen).map_err(|e| OpponentError::InvalidPosition(e.to_string()))?;
        let m = self
            .pick(&position)
            .ok_or_else(|| OpponentError::NoMove(fen.to_string()))?;
        Ok(UciMove::from_move(&m, CastlingMode::Standard).to_string())
    }
}
