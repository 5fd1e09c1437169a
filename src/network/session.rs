//! Per-request handling on the server.
//!
//! An [`Orchestrator`] is shared by every connection. Each connection keeps a
//! [`Session`] with its own authentication state and feeds decoded frames to
//! [`Orchestrator::handle`], which returns the reply frame (if any). Pushes to
//! other players go through the [`ConnectionRegistry`].
//!
//! Locks on the cache and registry are only held for map operations. Storage
//! calls, rules-engine work and opponent searches run with no lock held. The
//! exception is a per-player seating lock, held from the in-game check until
//! the new or joined game is stored.

use crate::chess::{AutomatedOpponent, ChessError, GreedyOpponent, Outcome, RulesEngine};
use crate::crypto::{self, CryptoError, Identity, PlayerKey};
use crate::messages::types::{join_counted_list, join_list};
use crate::messages::{GameOverNotice, LoginProfile, MoveNotice, PayloadError, Tag, Tlv};
use crate::network::cache::GameCache;
use crate::network::registry::ConnectionRegistry;
use crate::storage::{NewUser, PlayerColor, Seat, StorageError, StorageHandle};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const DEFAULT_THINK_TIME: Duration = Duration::from_millis(1000);

/// Reason strings carried by `Rejected` replies
pub mod reasons {
    pub const NOT_LOGGED_IN: &str = "Not logged in";
    pub const ALREADY_LOGGED_IN: &str = "Already logged in as another player";
    pub const ALREADY_IN_GAME: &str = "Player already in game";
    pub const MALFORMED_REQUEST: &str = "Malformed request";
    pub const MALFORMED_GAME_ID: &str = "Malformed game id";
    pub const GAME_NOT_FOUND: &str = "Game not found";
    pub const GAME_NOT_OPEN: &str = "Game is not open";
    pub const OWN_GAME: &str = "Cannot join your own game";
    pub const NO_ACTIVE_GAME: &str = "No active game";
    pub const GAME_OVER: &str = "Game is over";
    pub const NOT_YOUR_TURN: &str = "Not your turn";
    pub const INVALID_MOVE: &str = "Invalid move";
    pub const INTERNAL_ERROR: &str = "Internal error";
}

pub const MOVE_ACCEPTED: &str = "Move accepted";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Request rejected: {0}")]
    Rejected(&'static str),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Rules error: {0}")]
    Rules(#[from] ChessError),

    #[error("Malformed payload: {0}")]
    Payload(#[from] PayloadError),
}

/// Where a connection stands in the login lifecycle. Which game a player is
/// in lives in storage, so a reconnect or a game ended by the opponent needs
/// no session bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated {
        player: PlayerKey,
        player_id: i64,
    },
    Closed,
}

/// Connection-local state passed to every handler call
pub struct Session {
    connection_id: u64,
    state: SessionState,
    outbound: mpsc::Sender<Tlv>,
}

impl Session {
    pub fn new(connection_id: u64, outbound: mpsc::Sender<Tlv>) -> Self {
        Self {
            connection_id,
            state: SessionState::Unauthenticated,
            outbound,
        }
    }

    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn player(&self) -> Option<(PlayerKey, i64)> {
        match &self.state {
            SessionState::Authenticated { player, player_id } => Some((*player, *player_id)),
            _ => None,
        }
    }

    /// Mark the session closed, returning the key it was registered under
    pub fn close(&mut self) -> Option<PlayerKey> {
        let player = self.player().map(|(player, _)| player);
        self.state = SessionState::Closed;
        player
    }
}

/// A game resolved for the requesting player, with its live state
struct ActiveGame<S> {
    game_id: String,
    state: S,
    color: PlayerColor,
    black: Seat,
}

/// Shared request handler for all connections
pub struct Orchestrator<E: RulesEngine> {
    identity: Arc<Identity>,
    storage: StorageHandle,
    registry: Arc<ConnectionRegistry>,
    cache: Arc<GameCache<E::State>>,
    engine: E,
    opponent: Arc<dyn AutomatedOpponent>,
    fallback: GreedyOpponent,
    think_time: Duration,
    seating: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl<E: RulesEngine> Orchestrator<E> {
    pub fn new(
        identity: Arc<Identity>,
        storage: StorageHandle,
        engine: E,
        opponent: Arc<dyn AutomatedOpponent>,
    ) -> Self {
        Self {
            identity,
            storage,
            registry: Arc::new(ConnectionRegistry::new()),
            cache: Arc::new(GameCache::new()),
            engine,
            opponent,
            fallback: GreedyOpponent,
            think_time: DEFAULT_THINK_TIME,
            seating: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_think_time(mut self, think_time: Duration) -> Self {
        self.think_time = think_time;
        self
    }

    pub fn identity(&self) -> &Arc<Identity> {
        &self.identity
    }

    pub fn storage(&self) -> &StorageHandle {
        &self.storage
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<GameCache<E::State>> {
        &self.cache
    }

    /// Process one inbound frame. Returns the reply to write back, or `None`
    /// when the frame is dropped without an answer.
    pub async fn handle(&self, session: &mut Session, frame: Tlv) -> Option<Tlv> {
        let connection_id = session.connection_id;
        let Some(tag) = frame.kind() else {
            warn!(connection_id, tag = frame.tag, "Ignoring frame with unknown tag");
            return None;
        };
        if tag.is_response() {
            warn!(connection_id, %tag, "Ignoring response tag sent by client");
            return None;
        }

        debug!(connection_id, %tag, len = frame.value.len(), "Handling request");

        if tag == Tag::Login {
            return Some(match self.handle_login(session, &frame.value).await {
                Ok(reply) => reply,
                Err(e) => self.failure_reply(connection_id, tag, e, None)?,
            });
        }

        let Some((player, player_id)) = session.player() else {
            return self.reject_unauthenticated(connection_id, tag, &frame.value).await;
        };

        let body = match self.open_request(tag, &frame.value, &player) {
            Ok(body) => body,
            Err(e) => {
                warn!(
                    connection_id,
                    player = %player.fingerprint(),
                    %tag,
                    "Dropping request that failed verification: {}",
                    e
                );
                return None;
            }
        };

        let result = match tag {
            Tag::JoinSolo => self.start_game(player_id, Seat::Automated).await,
            Tag::HostGame => self.start_game(player_id, Seat::Open).await,
            Tag::ListOpenGames => self.list_open_games().await,
            Tag::JoinGame => self.join_game(player_id, &body).await,
            Tag::PlayMove => self.play_move(&player, player_id, &body).await,
            Tag::ListLegalMoves => self.list_legal_moves(&player, player_id).await,
            _ => {
                warn!(connection_id, %tag, "Ignoring unsupported request");
                return None;
            }
        };

        match result {
            Ok(reply) => Some(reply),
            Err(e) => self.failure_reply(connection_id, tag, e, Some(&player)),
        }
    }

    fn open_request(
        &self,
        tag: Tag,
        value: &[u8],
        sender: &PlayerKey,
    ) -> Result<Vec<u8>, CryptoError> {
        if tag.is_encrypted_request() {
            crypto::open_sealed(value, &self.identity, sender.verifying_key())
        } else {
            crypto::open_signed(value, sender.verifying_key()).map(<[u8]>::to_vec)
        }
    }

    fn signed(&self, tag: Tag, body: &[u8]) -> Tlv {
        Tlv::new(tag, crypto::sign(body, &self.identity))
    }

    fn sealed(&self, tag: Tag, body: &[u8], recipient: &PlayerKey) -> Result<Tlv, SessionError> {
        let value = crypto::seal(body, &self.identity, recipient.verifying_key())?;
        Ok(Tlv::new(tag, value))
    }

    /// Rejections to encrypted requests are encrypted as well
    fn rejection(&self, tag: Tag, reason: &str, requester: Option<&PlayerKey>) -> Option<Tlv> {
        match requester {
            Some(player) if tag.is_encrypted_request() => {
                match self.sealed(Tag::Rejected, reason.as_bytes(), player) {
                    Ok(frame) => Some(frame),
                    Err(e) => {
                        error!("Failed to encrypt rejection: {}", e);
                        None
                    }
                }
            }
            _ => Some(self.signed(Tag::Rejected, reason.as_bytes())),
        }
    }

    fn failure_reply(
        &self,
        connection_id: u64,
        tag: Tag,
        err: SessionError,
        requester: Option<&PlayerKey>,
    ) -> Option<Tlv> {
        let reason = match &err {
            SessionError::Rejected(reason) => {
                debug!(connection_id, %tag, reason, "Request rejected");
                *reason
            }
            SessionError::Payload(e) => {
                debug!(connection_id, %tag, "Malformed request payload: {}", e);
                reasons::MALFORMED_REQUEST
            }
            SessionError::Crypto(e) => {
                warn!(connection_id, %tag, "Dropping request: {}", e);
                return None;
            }
            SessionError::Storage(_) | SessionError::Rules(_) => {
                error!(connection_id, %tag, "Request failed: {}", err);
                reasons::INTERNAL_ERROR
            }
        };
        self.rejection(tag, reason, requester)
    }

    /// Requests on a connection that never logged in. A signature from a
    /// known player earns a rejection, anything else is dropped silently.
    async fn reject_unauthenticated(&self, connection_id: u64, tag: Tag, value: &[u8]) -> Option<Tlv> {
        let signed = if tag.is_encrypted_request() {
            match crypto::decrypt(value, &self.identity) {
                Ok(plain) => plain,
                Err(_) => {
                    debug!(connection_id, %tag, "Dropping undecryptable request before login");
                    return None;
                }
            }
        } else {
            value.to_vec()
        };

        let keys = match self.storage.list_public_keys().await {
            Ok(keys) => keys,
            Err(e) => {
                error!(connection_id, "Could not list public keys: {}", e);
                return None;
            }
        };

        let signer = keys
            .iter()
            .filter_map(|encoded| PlayerKey::parse(encoded).ok())
            .find(|key| matches!(crypto::verify(&signed, key.verifying_key()), Ok(true)));

        match signer {
            Some(key) => {
                info!(connection_id, player = %key.fingerprint(), %tag, "Request before login");
                Some(self.signed(Tag::Rejected, reasons::NOT_LOGGED_IN.as_bytes()))
            }
            None => {
                debug!(connection_id, %tag, "Dropping request from unknown signer");
                None
            }
        }
    }

    async fn handle_login(&self, session: &mut Session, payload: &[u8]) -> Result<Tlv, SessionError> {
        let profile = LoginProfile::parse(payload)?;
        let player = PlayerKey::parse(&profile.public_key).map_err(|e| {
            debug!("Login with unusable key: {}", e);
            SessionError::Rejected(reasons::MALFORMED_REQUEST)
        })?;

        if let Some((current, _)) = session.player() {
            if current != player {
                return Err(SessionError::Rejected(reasons::ALREADY_LOGGED_IN));
            }
        }

        let encoded = player.encoded();
        if !self.storage.user_exists(&encoded).await? {
            self.storage
                .create_user(NewUser {
                    first_name: profile.first_name.clone(),
                    last_name: profile.last_name.clone(),
                    active: profile.active,
                    rating: profile.rating,
                    public_key: encoded.clone(),
                })
                .await?;
            info!(player = %player.fingerprint(), "Created user {} {}", profile.first_name, profile.last_name);
        }
        let player_id = self.storage.user_id_by_key(&encoded).await?;

        if let Some(replaced) =
            self.registry
                .register(player, session.connection_id, session.outbound.clone())
        {
            if replaced != session.connection_id {
                info!(player = %player.fingerprint(), replaced, "Login moved to a new connection");
            }
        }
        if session.player().is_none() {
            session.state = SessionState::Authenticated { player, player_id };
        }

        info!(
            connection_id = session.connection_id,
            player = %player.fingerprint(),
            player_id,
            "Player logged in"
        );
        Ok(Tlv::new(
            Tag::ServerHello,
            self.identity.player_key().encoded().into_bytes(),
        ))
    }

    /// Lock that orders one player's requests which may seat them in a game
    fn seating_lock(&self, player_id: i64) -> Arc<AsyncMutex<()>> {
        self.seating
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(player_id)
            .or_default()
            .clone()
    }

    /// Whether any of the player's games is still in progress
    async fn player_in_game(&self, player_id: i64) -> Result<bool, SessionError> {
        for game_id in self.storage.list_games_for_player(player_id).await? {
            let state = match self.cache.get(&game_id) {
                Some(cached) => cached.state,
                None => {
                    let notation = self.storage.get_position(&game_id).await?;
                    match self.engine.load(&notation) {
                        Ok(state) => state,
                        Err(e) => {
                            warn!(game_id = %game_id, "Skipping unreadable game: {}", e);
                            continue;
                        }
                    }
                }
            };
            if self.engine.outcome(&state) == Outcome::InProgress {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn start_game(&self, player_id: i64, black: Seat) -> Result<Tlv, SessionError> {
        let seating = self.seating_lock(player_id);
        let _seated = seating.lock().await;
        if self.player_in_game(player_id).await? {
            return Err(SessionError::Rejected(reasons::ALREADY_IN_GAME));
        }

        let game_id = Uuid::new_v4().to_string();
        self.storage.create_game(&game_id, player_id, black).await?;
        info!(game_id = %game_id, player_id, ?black, "Game created");
        Ok(self.signed(Tag::Ack, game_id.as_bytes()))
    }

    async fn list_open_games(&self) -> Result<Tlv, SessionError> {
        let games = self.storage.list_open_games().await?;
        Ok(self.signed(Tag::Ack, &join_list(&games)))
    }

    async fn join_game(&self, player_id: i64, body: &[u8]) -> Result<Tlv, SessionError> {
        let game_id = std::str::from_utf8(body)
            .ok()
            .and_then(|text| Uuid::parse_str(text.trim()).ok())
            .map(|id| id.to_string())
            .ok_or(SessionError::Rejected(reasons::MALFORMED_GAME_ID))?;

        if !self.cache.contains(&game_id) && !self.storage.game_exists(&game_id).await? {
            return Err(SessionError::Rejected(reasons::GAME_NOT_FOUND));
        }
        if self.storage.black_seat(&game_id).await? != Seat::Open {
            return Err(SessionError::Rejected(reasons::GAME_NOT_OPEN));
        }
        if self.storage.white_id(&game_id).await? == player_id {
            return Err(SessionError::Rejected(reasons::OWN_GAME));
        }

        let seating = self.seating_lock(player_id);
        let _seated = seating.lock().await;
        if self.player_in_game(player_id).await? {
            return Err(SessionError::Rejected(reasons::ALREADY_IN_GAME));
        }

        match self.storage.join_game(&game_id, player_id).await {
            Ok(()) => {}
            Err(StorageError::GameNotOpen(_)) => {
                return Err(SessionError::Rejected(reasons::GAME_NOT_OPEN))
            }
            Err(StorageError::GameNotFound(_)) => {
                return Err(SessionError::Rejected(reasons::GAME_NOT_FOUND))
            }
            Err(e) => return Err(e.into()),
        }

        info!(game_id = %game_id, player_id, "Player joined game as black");
        Ok(self.signed(Tag::Ack, game_id.as_bytes()))
    }

    /// Find the player's most recent unfinished game and its live state,
    /// loading it into the cache if needed.
    async fn resolve_active_game(&self, player_id: i64) -> Result<ActiveGame<E::State>, SessionError> {
        let game_id = match self.storage.find_recent_game(player_id).await {
            Ok(id) => id,
            Err(e) if e.is_not_found() => return Err(SessionError::Rejected(reasons::NO_ACTIVE_GAME)),
            Err(e) => return Err(e.into()),
        };

        let state = match self.cache.get(&game_id) {
            Some(cached) => cached.state,
            None => {
                let notation = self.storage.get_position(&game_id).await?;
                let state = self.engine.load(&notation)?;
                let last_move_time = self.storage.get_last_move_time(&game_id).await?;
                self.cache.insert(&game_id, state.clone(), last_move_time);
                debug!(game_id = %game_id, "Loaded game into cache");
                state
            }
        };

        let white_id = self.storage.white_id(&game_id).await?;
        let black = self.storage.black_seat(&game_id).await?;
        let color = if white_id == player_id {
            PlayerColor::White
        } else {
            PlayerColor::Black
        };

        Ok(ActiveGame {
            game_id,
            state,
            color,
            black,
        })
    }

    async fn play_move(
        &self,
        player: &PlayerKey,
        player_id: i64,
        body: &[u8],
    ) -> Result<Tlv, SessionError> {
        let move_text = std::str::from_utf8(body)
            .map_err(|_| SessionError::Rejected(reasons::INVALID_MOVE))?
            .trim()
            .to_string();

        let ActiveGame {
            game_id,
            mut state,
            color,
            black,
        } = self.resolve_active_game(player_id).await?;

        if self.engine.outcome(&state).is_terminal() {
            return Err(SessionError::Rejected(reasons::GAME_OVER));
        }
        if self.engine.side_to_move(&state) != color {
            return Err(SessionError::Rejected(reasons::NOT_YOUR_TURN));
        }

        let san = match self.engine.apply_move(&mut state, &move_text) {
            Ok(san) => san,
            Err(e) => {
                debug!(game_id = %game_id, player_id, "Rejected move {}: {}", move_text, e);
                return Err(SessionError::Rejected(reasons::INVALID_MOVE));
            }
        };

        let last_move_time = self
            .storage
            .set_position(&game_id, &self.engine.serialize(&state))
            .await?;
        self.cache.insert(&game_id, state.clone(), last_move_time);
        info!(game_id = %game_id, player_id, %color, san = %san, "Move accepted");

        if let Outcome::Decided(decision) = self.engine.outcome(&state) {
            let notice = self.finish_game(&game_id, &state, &decision.to_string()).await?;
            if let Seat::Player(black_id) = black {
                let opponent_id = if color == PlayerColor::White {
                    black_id
                } else {
                    self.storage.white_id(&game_id).await?
                };
                self.push_to_player(opponent_id, Tag::GameOver, &notice).await;
            }
            return self.sealed(Tag::GameOver, &notice, player);
        }

        match black {
            Seat::Automated => {
                let (reply_tag, payload) = self.automated_reply(&game_id, state).await?;
                self.sealed(reply_tag, &payload, player)
            }
            Seat::Player(black_id) => {
                let opponent_id = if color == PlayerColor::White {
                    black_id
                } else {
                    self.storage.white_id(&game_id).await?
                };
                let notice = MoveNotice {
                    san,
                    fen: self.engine.position_text(&state),
                }
                .to_payload()?;
                self.push_to_player(opponent_id, Tag::MoveReceived, &notice).await;
                self.sealed(Tag::Ack, MOVE_ACCEPTED.as_bytes(), player)
            }
            Seat::Open => self.sealed(Tag::Ack, MOVE_ACCEPTED.as_bytes(), player),
        }
    }

    /// Let the automated side answer, persisting its move. Returns the reply
    /// tag for the human player together with its payload.
    async fn automated_reply(
        &self,
        game_id: &str,
        mut state: E::State,
    ) -> Result<(Tag, Vec<u8>), SessionError> {
        let fen = self.engine.position_text(&state);
        let san = self.choose_automated_move(game_id, &fen, &mut state).await?;

        let last_move_time = self
            .storage
            .set_position(game_id, &self.engine.serialize(&state))
            .await?;
        self.cache.insert(game_id, state.clone(), last_move_time);
        info!(game_id = %game_id, san = %san, "Automated opponent moved");

        if let Outcome::Decided(decision) = self.engine.outcome(&state) {
            let notice = self.finish_game(game_id, &state, &decision.to_string()).await?;
            return Ok((Tag::GameOver, notice));
        }

        let notice = MoveNotice {
            san,
            fen: self.engine.position_text(&state),
        }
        .to_payload()?;
        Ok((Tag::MoveReceived, notice))
    }

    /// Ask the configured opponent, falling back to the built-in one when it
    /// fails or answers with a move the rules engine refuses.
    async fn choose_automated_move(
        &self,
        game_id: &str,
        fen: &str,
        state: &mut E::State,
    ) -> Result<String, SessionError> {
        match self.opponent.choose_move(fen, self.think_time).await {
            Ok(mv) => match self.engine.apply_move(state, &mv) {
                Ok(san) => return Ok(san),
                Err(e) => warn!(
                    game_id = %game_id,
                    opponent = self.opponent.name(),
                    "Opponent suggested unusable move {}: {}",
                    mv,
                    e
                ),
            },
            Err(e) => warn!(
                game_id = %game_id,
                opponent = self.opponent.name(),
                "Opponent failed, using built-in fallback: {}",
                e
            ),
        }

        let mv = self
            .fallback
            .choose_move(fen, self.think_time)
            .await
            .map_err(|e| ChessError::InvalidMove(e.to_string()))?;
        Ok(self.engine.apply_move(state, &mv)?)
    }

    /// Record the result and evict the game. Returns the game-over payload.
    async fn finish_game(
        &self,
        game_id: &str,
        state: &E::State,
        result: &str,
    ) -> Result<Vec<u8>, SessionError> {
        self.storage.record_result(game_id, result).await?;
        self.cache.remove(game_id);
        info!(game_id = %game_id, result, "Game finished");

        Ok(GameOverNotice {
            fen: self.engine.position_text(state),
            result: result.to_string(),
        }
        .to_payload()?)
    }

    /// Encrypt and queue a notification for a player. Delivery failures are
    /// logged and not retried.
    async fn push_to_player(&self, player_id: i64, tag: Tag, body: &[u8]) {
        let recipient = match self.storage.public_key_for_player(player_id).await {
            Ok(encoded) => match PlayerKey::parse(&encoded) {
                Ok(key) => key,
                Err(e) => {
                    error!(player_id, "Stored key is unusable: {}", e);
                    return;
                }
            },
            Err(e) => {
                error!(player_id, "Could not look up push recipient: {}", e);
                return;
            }
        };

        let frame = match self.sealed(tag, body, &recipient) {
            Ok(frame) => frame,
            Err(e) => {
                error!(player_id, "Failed to encrypt {}: {}", tag, e);
                return;
            }
        };

        match self.registry.deliver(&recipient, frame) {
            Ok(()) => debug!(player_id, %tag, "Push queued"),
            Err(e) => warn!(player_id, %tag, "Push not delivered: {}", e),
        }
    }

    async fn list_legal_moves(&self, player: &PlayerKey, player_id: i64) -> Result<Tlv, SessionError> {
        let game = self.resolve_active_game(player_id).await?;
        let moves: Vec<String> = self
            .engine
            .legal_moves(&game.state)
            .iter()
            .map(|mv| self.engine.render_move(mv, &game.state))
            .collect();
        self.sealed(Tag::Ack, &join_counted_list(&moves), player)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::StandardChess;
    use crate::storage::{spawn_actor, Database};

    struct Harness {
        orchestrator: Orchestrator<StandardChess>,
        server_key: PlayerKey,
    }

    fn harness() -> Harness {
        let (storage, _task) = spawn_actor(Database::open_in_memory().unwrap(), 16);
        let identity = Arc::new(Identity::generate());
        let server_key = *identity.player_key();
        Harness {
            orchestrator: Orchestrator::new(identity, storage, StandardChess, Arc::new(GreedyOpponent)),
            server_key,
        }
    }

    fn login_frame(identity: &Identity) -> Tlv {
        let profile = LoginProfile {
            first_name: "Test".to_string(),
            last_name: "Player".to_string(),
            active: true,
            rating: 1500,
            public_key: identity.player_key().encoded(),
        };
        Tlv::new(Tag::Login, profile.to_payload().unwrap())
    }

    fn session(id: u64) -> (Session, mpsc::Receiver<Tlv>) {
        let (tx, rx) = mpsc::channel(8);
        (Session::new(id, tx), rx)
    }

    #[tokio::test]
    async fn test_login_returns_server_key_and_registers() {
        let h = harness();
        let player = Identity::generate();
        let (mut s, _rx) = session(1);

        let reply = h.orchestrator.handle(&mut s, login_frame(&player)).await.unwrap();
        assert_eq!(reply.kind(), Some(Tag::ServerHello));
        assert_eq!(reply.value, h.server_key.encoded().into_bytes());
        assert!(h.orchestrator.registry().is_connected(player.player_key()));
        assert!(matches!(s.state(), SessionState::Authenticated { .. }));
    }

    #[tokio::test]
    async fn test_malformed_login_is_rejected() {
        let h = harness();
        let (mut s, _rx) = session(1);

        let reply = h
            .orchestrator
            .handle(&mut s, Tlv::new(Tag::Login, b"only;three;fields".to_vec()))
            .await
            .unwrap();
        assert_eq!(reply.kind(), Some(Tag::Rejected));
        let body = crypto::open_signed(&reply.value, h.server_key.verifying_key()).unwrap();
        assert_eq!(body, reasons::MALFORMED_REQUEST.as_bytes());
        assert_eq!(s.state(), &SessionState::Unauthenticated);
    }

    #[tokio::test]
    async fn test_unknown_signer_before_login_is_dropped() {
        let h = harness();
        let stranger = Identity::generate();
        let (mut s, _rx) = session(1);

        let frame = Tlv::new(Tag::ListOpenGames, crypto::sign(b"", &stranger));
        assert!(h.orchestrator.handle(&mut s, frame).await.is_none());
    }

    #[tokio::test]
    async fn test_known_player_on_fresh_connection_is_told_to_log_in() {
        let h = harness();
        let player = Identity::generate();
        let (mut first, _rx1) = session(1);
        h.orchestrator.handle(&mut first, login_frame(&player)).await.unwrap();

        let (mut second, _rx2) = session(2);
        let frame = Tlv::new(Tag::ListOpenGames, crypto::sign(b"", &player));
        let reply = h.orchestrator.handle(&mut second, frame).await.unwrap();
        assert_eq!(reply.kind(), Some(Tag::Rejected));
        let body = crypto::open_signed(&reply.value, h.server_key.verifying_key()).unwrap();
        assert_eq!(body, reasons::NOT_LOGGED_IN.as_bytes());
    }

    #[tokio::test]
    async fn test_bad_signature_is_dropped_and_session_survives() {
        let h = harness();
        let player = Identity::generate();
        let (mut s, _rx) = session(1);
        h.orchestrator.handle(&mut s, login_frame(&player)).await.unwrap();

        let mut signed = crypto::sign(b"", &player);
        let last = signed.len() - 1;
        signed[last] ^= 0x01;
        assert!(h
            .orchestrator
            .handle(&mut s, Tlv::new(Tag::HostGame, signed))
            .await
            .is_none());

        let reply = h
            .orchestrator
            .handle(&mut s, Tlv::new(Tag::ListOpenGames, crypto::sign(b"", &player)))
            .await
            .unwrap();
        assert_eq!(reply.kind(), Some(Tag::Ack));
    }

    #[tokio::test]
    async fn test_unknown_and_response_tags_are_ignored() {
        let h = harness();
        let (mut s, _rx) = session(1);
        assert!(h.orchestrator.handle(&mut s, Tlv { tag: 0x55, value: Vec::new() }).await.is_none());
        assert!(h.orchestrator.handle(&mut s, Tlv::new(Tag::Ack, Vec::new())).await.is_none());
    }

    #[tokio::test]
    async fn test_overlapping_game_requests_create_one_game() {
        let h = harness();
        let player = Identity::generate();
        let (mut first, _rx1) = session(1);
        let (mut second, _rx2) = session(2);
        h.orchestrator.handle(&mut first, login_frame(&player)).await.unwrap();
        h.orchestrator.handle(&mut second, login_frame(&player)).await.unwrap();

        let (hosted, solo) = tokio::join!(
            h.orchestrator
                .handle(&mut first, Tlv::new(Tag::HostGame, crypto::sign(b"", &player))),
            h.orchestrator
                .handle(&mut second, Tlv::new(Tag::JoinSolo, crypto::sign(b"", &player))),
        );

        let kinds = [hosted.unwrap().kind(), solo.unwrap().kind()];
        assert!(kinds.contains(&Some(Tag::Ack)), "replies {:?}", kinds);
        assert!(kinds.contains(&Some(Tag::Rejected)), "replies {:?}", kinds);
        assert_eq!(h.orchestrator.storage().list_all_games().await.unwrap().len(), 1);

        // Seating a player leaves the connection state alone
        assert!(matches!(first.state(), SessionState::Authenticated { .. }));
        assert!(matches!(second.state(), SessionState::Authenticated { .. }));
    }

    #[tokio::test]
    async fn test_second_login_with_other_key_is_rejected() {
        let h = harness();
        let (mut s, _rx) = session(1);
        let first = Identity::generate();
        h.orchestrator.handle(&mut s, login_frame(&first)).await.unwrap();

        let reply = h
            .orchestrator
            .handle(&mut s, login_frame(&Identity::generate()))
            .await
            .unwrap();
        assert_eq!(reply.kind(), Some(Tag::Rejected));
        assert_eq!(s.player().map(|(key, _)| key), Some(*first.player_key()));
    }
}
