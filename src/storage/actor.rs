//! Single-writer access to the database.
//!
//! Exactly one blocking task owns the [`Database`]. Every other component sends
//! it a [`Query`] through a [`StorageHandle`] and waits on a private oneshot
//! channel for the [`Reply`]. Requests are served strictly one at a time, which
//! gives a total order over all storage mutations.

use crate::storage::database::Database;
use crate::storage::errors::{Result, StorageError};
use crate::storage::models::{NewUser, Seat};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_QUEUE_DEPTH: usize = 256;

/// One storage operation and its parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    CreateUser(NewUser),
    UserExists { public_key: String },
    UserIdByKey { public_key: String },
    CreateGame { game_id: String, white_id: i64, black: Seat },
    GameExists { game_id: String },
    JoinGame { game_id: String, player_id: i64 },
    ListOpenGames,
    ListAllGames,
    ListGamesForPlayer { player_id: i64 },
    GetPosition { game_id: String },
    SetPosition { game_id: String, position: String },
    GetLastMoveTime { game_id: String },
    FindRecentGame { player_id: i64 },
    PublicKeyForPlayer { player_id: i64 },
    WhiteId { game_id: String },
    BlackSeat { game_id: String },
    ListPublicKeys,
    RecordResult { game_id: String, result: String },
}

impl Query {
    pub fn name(&self) -> &'static str {
        match self {
            Query::CreateUser(_) => "create_user",
            Query::UserExists { .. } => "user_exists",
            Query::UserIdByKey { .. } => "user_id_by_key",
            Query::CreateGame { .. } => "create_game",
            Query::GameExists { .. } => "game_exists",
            Query::JoinGame { .. } => "join_game",
            Query::ListOpenGames => "list_open_games",
            Query::ListAllGames => "list_all_games",
            Query::ListGamesForPlayer { .. } => "list_games_for_player",
            Query::GetPosition { .. } => "get_position",
            Query::SetPosition { .. } => "set_position",
            Query::GetLastMoveTime { .. } => "get_last_move_time",
            Query::FindRecentGame { .. } => "find_recent_game",
            Query::PublicKeyForPlayer { .. } => "public_key_for_player",
            Query::WhiteId { .. } => "white_id",
            Query::BlackSeat { .. } => "black_seat",
            Query::ListPublicKeys => "list_public_keys",
            Query::RecordResult { .. } => "record_result",
        }
    }
}

/// Typed result of a [`Query`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Done,
    Flag(bool),
    Id(i64),
    Text(String),
    Ids(Vec<String>),
    Timestamp(i64),
    Seat(Seat),
}

/// A query paired with the channel its reply goes back on
#[derive(Debug)]
pub struct StorageRequest {
    pub query: Query,
    pub reply: oneshot::Sender<Result<Reply>>,
}

impl Database {
    /// Run one query to completion
    pub fn execute_query(&self, query: Query) -> Result<Reply> {
        match query {
            Query::CreateUser(user) => self.create_user(&user).map(|_| Reply::Done),
            Query::UserExists { public_key } => self.user_exists(&public_key).map(Reply::Flag),
            Query::UserIdByKey { public_key } => self.user_id_by_key(&public_key).map(Reply::Id),
            Query::CreateGame {
                game_id,
                white_id,
                black,
            } => self
                .create_game(&game_id, white_id, black)
                .map(|_| Reply::Done),
            Query::GameExists { game_id } => self.game_exists(&game_id).map(Reply::Flag),
            Query::JoinGame { game_id, player_id } => {
                self.join_game(&game_id, player_id).map(|_| Reply::Done)
            }
            Query::ListOpenGames => self.list_open_games().map(Reply::Ids),
            Query::ListAllGames => self.list_all_games().map(Reply::Ids),
            Query::ListGamesForPlayer { player_id } => {
                self.list_games_for_player(player_id).map(Reply::Ids)
            }
            Query::GetPosition { game_id } => self.get_position(&game_id).map(Reply::Text),
            Query::SetPosition { game_id, position } => self
                .set_position(&game_id, &position)
                .map(Reply::Timestamp),
            Query::GetLastMoveTime { game_id } => {
                self.get_last_move_time(&game_id).map(Reply::Timestamp)
            }
            Query::FindRecentGame { player_id } => {
                self.find_recent_game_for_player(player_id).map(Reply::Text)
            }
            Query::PublicKeyForPlayer { player_id } => {
                self.public_key_for_player(player_id).map(Reply::Text)
            }
            Query::WhiteId { game_id } => self.white_id(&game_id).map(Reply::Id),
            Query::BlackSeat { game_id } => self.black_seat(&game_id).map(Reply::Seat),
            Query::ListPublicKeys => self.list_public_keys().map(Reply::Ids),
            Query::RecordResult { game_id, result } => self
                .record_result(&game_id, &result)
                .map(|_| Reply::Done),
        }
    }
}

/// Start the actor on a blocking thread. It exits once every handle is dropped.
pub fn spawn(database: Database, queue_depth: usize) -> (StorageHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(queue_depth.max(1));
    let task = tokio::task::spawn_blocking(move || run(database, rx));
    (StorageHandle { tx }, task)
}

fn run(database: Database, mut rx: mpsc::Receiver<StorageRequest>) {
    info!("Storage actor started");
    while let Some(StorageRequest { query, reply }) = rx.blocking_recv() {
        let name = query.name();
        let result = database.execute_query(query);
        match &result {
            Ok(_) => debug!(query = name, "Storage query completed"),
            Err(e) if e.is_not_found() => debug!(query = name, "Storage lookup found nothing: {}", e),
            Err(e) => warn!(query = name, "Storage query failed: {}", e),
        }
        if reply.send(result).is_err() {
            debug!(query = name, "Requester went away before the reply");
        }
    }

    let (ops, txns, errors, time_ms) = database.get_connection_stats();
    info!(
        operations = ops,
        transactions = txns,
        errors = errors,
        total_time_ms = time_ms,
        "Storage actor stopped"
    );
}

/// Cloneable front door to the storage actor
#[derive(Debug, Clone)]
pub struct StorageHandle {
    tx: mpsc::Sender<StorageRequest>,
}

impl StorageHandle {
    /// Send a query and wait for its reply
    pub async fn request(&self, query: Query) -> Result<Reply> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(StorageRequest { query, reply })
            .await
            .map_err(|_| StorageError::ActorUnavailable)?;
        rx.await.map_err(|_| StorageError::ActorUnavailable)?
    }

    pub async fn create_user(&self, user: NewUser) -> Result<()> {
        self.request(Query::CreateUser(user)).await.map(|_| ())
    }

    pub async fn user_exists(&self, public_key: &str) -> Result<bool> {
        let reply = self
            .request(Query::UserExists {
                public_key: public_key.to_string(),
            })
            .await?;
        expect_flag(reply)
    }

    pub async fn user_id_by_key(&self, public_key: &str) -> Result<i64> {
        let reply = self
            .request(Query::UserIdByKey {
                public_key: public_key.to_string(),
            })
            .await?;
        expect_id(reply)
    }

    pub async fn create_game(&self, game_id: &str, white_id: i64, black: Seat) -> Result<()> {
        self.request(Query::CreateGame {
            game_id: game_id.to_string(),
            white_id,
            black,
        })
        .await
        .map(|_| ())
    }

    pub async fn game_exists(&self, game_id: &str) -> Result<bool> {
        let reply = self
            .request(Query::GameExists {
                game_id: game_id.to_string(),
            })
            .await?;
        expect_flag(reply)
    }

    pub async fn join_game(&self, game_id: &str, player_id: i64) -> Result<()> {
        self.request(Query::JoinGame {
            game_id: game_id.to_string(),
            player_id,
        })
        .await
        .map(|_| ())
    }

    pub async fn list_open_games(&self) -> Result<Vec<String>> {
        expect_ids(self.request(Query::ListOpenGames).await?)
    }

    pub async fn list_all_games(&self) -> Result<Vec<String>> {
        expect_ids(self.request(Query::ListAllGames).await?)
    }

    pub async fn list_games_for_player(&self, player_id: i64) -> Result<Vec<String>> {
        expect_ids(self.request(Query::ListGamesForPlayer { player_id }).await?)
    }

    pub async fn get_position(&self, game_id: &str) -> Result<String> {
        let reply = self
            .request(Query::GetPosition {
                game_id: game_id.to_string(),
            })
            .await?;
        expect_text(reply)
    }

    /// Returns the new last-move time
    pub async fn set_position(&self, game_id: &str, position: &str) -> Result<i64> {
        let reply = self
            .request(Query::SetPosition {
                game_id: game_id.to_string(),
                position: position.to_string(),
            })
            .await?;
        expect_timestamp(reply)
    }

    pub async fn get_last_move_time(&self, game_id: &str) -> Result<i64> {
        let reply = self
            .request(Query::GetLastMoveTime {
                game_id: game_id.to_string(),
            })
            .await?;
        expect_timestamp(reply)
    }

    pub async fn find_recent_game(&self, player_id: i64) -> Result<String> {
        expect_text(self.request(Query::FindRecentGame { player_id }).await?)
    }

    pub async fn public_key_for_player(&self, player_id: i64) -> Result<String> {
        expect_text(self.request(Query::PublicKeyForPlayer { player_id }).await?)
    }

    pub async fn white_id(&self, game_id: &str) -> Result<i64> {
        let reply = self
            .request(Query::WhiteId {
                game_id: game_id.to_string(),
            })
            .await?;
        expect_id(reply)
    }

    pub async fn black_seat(&self, game_id: &str) -> Result<Seat> {
        let reply = self
            .request(Query::BlackSeat {
                game_id: game_id.to_string(),
            })
            .await?;
        match reply {
            Reply::Seat(seat) => Ok(seat),
            other => Err(unexpected("seat", other)),
        }
    }

    pub async fn list_public_keys(&self) -> Result<Vec<String>> {
        expect_ids(self.request(Query::ListPublicKeys).await?)
    }

    pub async fn record_result(&self, game_id: &str, result: &str) -> Result<()> {
        self.request(Query::RecordResult {
            game_id: game_id.to_string(),
            result: result.to_string(),
        })
        .await
        .map(|_| ())
    }
}

fn unexpected(wanted: &str, reply: Reply) -> StorageError {
    StorageError::invalid_data(format!("expected {} reply, got {:?}", wanted, reply))
}

fn expect_flag(reply: Reply) -> Result<bool> {
    match reply {
        Reply::Flag(flag) => Ok(flag),
        other => Err(unexpected("flag", other)),
    }
}

fn expect_id(reply: Reply) -> Result<i64> {
    match reply {
        Reply::Id(id) => Ok(id),
        other => Err(unexpected("id", other)),
    }
}

fn expect_text(reply: Reply) -> Result<String> {
    match reply {
        Reply::Text(text) => Ok(text),
        other => Err(unexpected("text", other)),
    }
}

fn expect_ids(reply: Reply) -> Result<Vec<String>> {
    match reply {
        Reply::Ids(ids) => Ok(ids),
        other => Err(unexpected("id list", other)),
    }
}

fn expect_timestamp(reply: Reply) -> Result<i64> {
    match reply {
        Reply::Timestamp(ts) => Ok(ts),
        other => Err(unexpected("timestamp", other)),
    }
}
