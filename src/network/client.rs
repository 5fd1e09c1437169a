//! Client protocol driver.
//!
//! Requests are strictly request/reply, but while a player waits for the
//! opponent a background listener owns the read half of the connection and
//! turns pushed moves into [`ClientEvent`]s. Any foreground call first
//! cancels that listener and takes the reader back, so the call always reads
//! its own reply. Frames already buffered by the listener are kept.

use crate::crypto::{self, CryptoError, Identity, PlayerKey};
use crate::messages::types::{split_counted_list, split_list};
use crate::messages::{
    FrameReader, FrameWriter, GameOverNotice, LoginProfile, MoveNotice, PayloadError, Tag, Tlv,
    WireConfig, WireProtocolError,
};
use crate::network::profile::{PlayerDetails, ProfileStore};
use crate::network::session::reasons;
use crate::storage::PlayerColor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Not logged in")]
    NotLoggedIn,

    #[error("Already logged in")]
    AlreadyLoggedIn,

    #[error("Already in a game")]
    AlreadyInGame,

    #[error("Not in a game")]
    NotInGame,

    #[error("Server rejected the request: {0}")]
    Rejected(String),

    #[error("Server key {actual} does not match the remembered key {expected}")]
    ServerKeyMismatch { expected: String, actual: String },

    #[error("Unexpected reply {0}")]
    UnexpectedReply(String),

    #[error("Connection closed by server")]
    Disconnected,

    #[error("Move listener failed: {0}")]
    Listener(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Wire protocol error: {0}")]
    Wire(#[from] WireProtocolError),

    #[error("Malformed reply: {0}")]
    Payload(#[from] PayloadError),

    #[error("Connection failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Notifications that arrive outside a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    OpponentMoved(MoveNotice),
    GameOver(GameOverNotice),
    Disconnected,
}

/// What the server did with a move
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Accepted, the opponent's answer will arrive as an event
    Accepted,
    /// Accepted, and the automated opponent already answered
    OpponentMoved(MoveNotice),
    GameOver(GameOverNotice),
}

#[derive(Debug, Default)]
struct SessionFlags {
    authenticated: AtomicBool,
    in_game: AtomicBool,
    solo: AtomicBool,
    color: Mutex<Option<PlayerColor>>,
}

impl SessionFlags {
    fn authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    fn in_game(&self) -> bool {
        self.in_game.load(Ordering::SeqCst)
    }

    fn set_in_game(&self, value: bool) {
        self.in_game.store(value, Ordering::SeqCst);
    }

    fn solo(&self) -> bool {
        self.solo.load(Ordering::SeqCst)
    }

    fn color(&self) -> Option<PlayerColor> {
        *self.color.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enter_game(&self, solo: bool, color: Option<PlayerColor>) {
        self.solo.store(solo, Ordering::SeqCst);
        *self.color.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = color;
        self.set_in_game(true);
    }

    fn leave_game(&self) {
        self.set_in_game(false);
        self.solo.store(false, Ordering::SeqCst);
        *self.color.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}

/// Side to move in a FEN string
fn side_to_move(fen: &str) -> Option<PlayerColor> {
    match fen.split_whitespace().nth(1)? {
        "w" => Some(PlayerColor::White),
        "b" => Some(PlayerColor::Black),
        _ => None,
    }
}

/// What both the foreground driver and the listener need to process a push
#[derive(Clone)]
struct PushContext {
    identity: Arc<Identity>,
    server_key: PlayerKey,
    flags: Arc<SessionFlags>,
    events: mpsc::UnboundedSender<ClientEvent>,
    profile: Option<Arc<ProfileStore>>,
}

enum PushAction {
    Stop,
    Continue,
}

impl PushContext {
    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            debug!("No one is listening for client events");
        }
    }

    fn game_over(&self, notice: &GameOverNotice) {
        self.flags.leave_game();
        if let Some(profile) = &self.profile {
            profile.update(|p| p.record_final_position(&notice.fen));
        }
    }

    fn handle_push(&self, frame: Tlv) -> PushAction {
        let tag = match frame.kind() {
            Some(tag @ (Tag::MoveReceived | Tag::GameOver)) => tag,
            other => {
                debug!(tag = frame.tag, ?other, "Listener ignoring frame");
                return PushAction::Continue;
            }
        };

        let body = match crypto::open_sealed(
            &frame.value,
            &self.identity,
            self.server_key.verifying_key(),
        ) {
            Ok(body) => body,
            Err(e) => {
                warn!(%tag, "Discarding push that failed verification: {}", e);
                return PushAction::Continue;
            }
        };

        match tag {
            Tag::MoveReceived => match MoveNotice::parse(&body) {
                Ok(notice) => {
                    info!(san = %notice.san, "Opponent moved");
                    self.emit(ClientEvent::OpponentMoved(notice));
                    PushAction::Stop
                }
                Err(e) => {
                    warn!("Discarding malformed move notice: {}", e);
                    PushAction::Continue
                }
            },
            _ => match GameOverNotice::parse(&body) {
                Ok(notice) => {
                    info!(result = %notice.result, "Game over");
                    self.game_over(&notice);
                    self.emit(ClientEvent::GameOver(notice));
                    PushAction::Stop
                }
                Err(e) => {
                    warn!("Discarding malformed game-over notice: {}", e);
                    PushAction::Continue
                }
            },
        }
    }
}

type Reader<S> = FrameReader<ReadHalf<S>>;

struct Listener<S> {
    token: CancellationToken,
    handle: JoinHandle<Reader<S>>,
}

/// Wait for the opponent's move. Hands the reader back when it stops, for
/// whatever reason.
async fn listen<S>(mut reader: Reader<S>, ctx: PushContext, token: CancellationToken) -> Reader<S>
where
    S: AsyncRead + AsyncWrite,
{
    loop {
        if token.is_cancelled() {
            break;
        }

        let next = tokio::select! {
            _ = token.cancelled() => break,
            next = reader.read_frame() => next,
        };

        match next {
            Ok(Some(frame)) => {
                if let PushAction::Stop = ctx.handle_push(frame) {
                    break;
                }
            }
            Ok(None) => {
                info!("Server closed the connection");
                ctx.emit(ClientEvent::Disconnected);
                break;
            }
            Err(e) => {
                warn!("Listener stopped on read failure: {}", e);
                ctx.emit(ClientEvent::Disconnected);
                break;
            }
        }
    }
    debug!("Move listener finished");
    reader
}

/// Only a game against the automated opponent answers a move with the
/// opponent's move. Against a person that tag is always a push.
fn accepts_reply(request: Tag, reply: Tag, solo: bool) -> bool {
    match request {
        Tag::Login => matches!(reply, Tag::ServerHello | Tag::Rejected),
        Tag::PlayMove => {
            matches!(reply, Tag::Ack | Tag::Rejected | Tag::GameOver)
                || (solo && reply == Tag::MoveReceived)
        }
        _ => matches!(reply, Tag::Ack | Tag::Rejected),
    }
}

pub struct Client<S> {
    reader: Option<Reader<S>>,
    writer: FrameWriter<WriteHalf<S>>,
    listener: Option<Listener<S>>,
    identity: Arc<Identity>,
    server_key: Option<PlayerKey>,
    expected_server_key: Option<PlayerKey>,
    flags: Arc<SessionFlags>,
    events_tx: mpsc::UnboundedSender<ClientEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<ClientEvent>>,
    profile: Option<Arc<ProfileStore>>,
}

impl Client<TcpStream> {
    pub async fn connect(addr: &str, identity: Arc<Identity>) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        info!("Connected to {}", addr);
        Ok(Self::new(stream, identity))
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(stream: S, identity: Arc<Identity>) -> Self {
        Self::with_config(stream, identity, WireConfig::for_client())
    }

    pub fn with_config(stream: S, identity: Arc<Identity>, config: WireConfig) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            reader: Some(FrameReader::with_config(read_half, config)),
            writer: FrameWriter::new(write_half),
            listener: None,
            identity,
            server_key: None,
            expected_server_key: None,
            flags: Arc::new(SessionFlags::default()),
            events_tx,
            events_rx: Some(events_rx),
            profile: None,
        }
    }

    /// Persist login and game-over state into `profile`. A server key already
    /// stored there must match the one the server presents.
    pub fn with_profile(mut self, profile: Arc<ProfileStore>) -> Self {
        match profile.snapshot().known_server_key() {
            Ok(key) => self.expected_server_key = key,
            Err(e) => warn!("Ignoring remembered server key: {:#}", e),
        }
        self.profile = Some(profile);
        self
    }

    /// Receiver for pushed moves and game-over notices. Can be taken once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ClientEvent>> {
        self.events_rx.take()
    }

    pub fn is_logged_in(&self) -> bool {
        self.flags.authenticated()
    }

    pub fn in_game(&self) -> bool {
        self.flags.in_game()
    }

    pub fn is_listening(&self) -> bool {
        self.listener
            .as_ref()
            .map_or(false, |listener| !listener.handle.is_finished())
    }

    pub fn server_key(&self) -> Option<&PlayerKey> {
        self.server_key.as_ref()
    }

    fn require_login(&self) -> Result<PlayerKey, ClientError> {
        match (self.flags.authenticated(), self.server_key) {
            (true, Some(key)) => Ok(key),
            _ => Err(ClientError::NotLoggedIn),
        }
    }

    fn push_context(&self, server_key: PlayerKey) -> PushContext {
        PushContext {
            identity: self.identity.clone(),
            server_key,
            flags: self.flags.clone(),
            events: self.events_tx.clone(),
            profile: self.profile.clone(),
        }
    }

    /// Stop the listener, if any, and take the reader back. The flag tells
    /// whether a listener was still waiting when it was stopped.
    async fn reclaim_reader(&mut self) -> Result<(Reader<S>, bool), ClientError> {
        if let Some(listener) = self.listener.take() {
            let interrupted = !listener.handle.is_finished();
            listener.token.cancel();
            let reader = listener
                .handle
                .await
                .map_err(|e| ClientError::Listener(e.to_string()))?;
            return Ok((reader, interrupted));
        }
        self.reader
            .take()
            .map(|reader| (reader, false))
            .ok_or(ClientError::Disconnected)
    }

    /// Start a listener unless one is already waiting. Each generation gets a
    /// fresh cancellation token.
    async fn start_listener(&mut self) -> Result<(), ClientError> {
        if self.is_listening() {
            return Ok(());
        }
        let server_key = self.require_login()?;
        let (reader, _) = self.reclaim_reader().await?;

        let token = CancellationToken::new();
        let handle = tokio::spawn(listen(reader, self.push_context(server_key), token.clone()));
        self.listener = Some(Listener { token, handle });
        debug!("Move listener started");
        Ok(())
    }

    /// Send one request and wait for its reply. Requests other than login are
    /// signed; moves and legal-move queries are also encrypted to the server,
    /// and so are their replies. Pushes read while waiting are forwarded as
    /// events. A rejection becomes [`ClientError::Rejected`].
    pub async fn call(&mut self, tag: Tag, body: &[u8]) -> Result<(Tag, Vec<u8>), ClientError> {
        let (mut reader, interrupted) = self.reclaim_reader().await?;
        let result = self.exchange(&mut reader, tag, body).await;
        self.reader = Some(reader);

        if interrupted && self.flags.in_game() {
            self.start_listener().await?;
        }
        result
    }

    async fn exchange(
        &mut self,
        reader: &mut Reader<S>,
        tag: Tag,
        body: &[u8],
    ) -> Result<(Tag, Vec<u8>), ClientError> {
        let value = match (tag, self.server_key) {
            (Tag::Login, _) => body.to_vec(),
            (_, Some(server_key)) if tag.is_encrypted_request() => {
                crypto::seal(body, &self.identity, server_key.verifying_key())?
            }
            (_, Some(_)) => crypto::sign(body, &self.identity),
            (_, None) => return Err(ClientError::NotLoggedIn),
        };
        self.writer.write_frame(&Tlv::new(tag, value)).await?;
        debug!(%tag, "Request sent");

        loop {
            let frame = reader.read_frame().await?.ok_or(ClientError::Disconnected)?;
            let Some(reply) = frame.kind() else {
                debug!(tag = frame.tag, "Skipping frame with unknown tag");
                continue;
            };

            let pushed = !accepts_reply(tag, reply, self.flags.solo())
                || (tag == Tag::PlayMove
                    && reply == Tag::GameOver
                    && self.is_opponents_game_over(&frame.value));
            if pushed {
                if reply.is_push() {
                    if let Some(server_key) = self.server_key {
                        self.push_context(server_key).handle_push(frame);
                    }
                } else {
                    warn!(request = %tag, %reply, "Skipping reply that does not match the request");
                }
                continue;
            }

            let body = self.open_reply(tag, reply, &frame.value)?;
            if reply == Tag::Rejected {
                let reason = String::from_utf8_lossy(&body).into_owned();
                debug!(request = %tag, reason = %reason, "Request rejected");
                return Err(ClientError::Rejected(reason));
            }
            return Ok((reply, body));
        }
    }

    /// Against a person, a game-over notice that leaves this player to move
    /// was caused by the opponent's move. It is a push even while a move of
    /// ours is waiting for its reply.
    fn is_opponents_game_over(&self, value: &[u8]) -> bool {
        if self.flags.solo() {
            return false;
        }
        let (Some(color), Some(server_key)) = (self.flags.color(), self.server_key) else {
            return false;
        };
        crypto::open_sealed(value, &self.identity, server_key.verifying_key())
            .ok()
            .and_then(|body| GameOverNotice::parse(&body).ok())
            .and_then(|notice| side_to_move(&notice.fen))
            .map_or(false, |side| side == color)
    }

    fn open_reply(&self, request: Tag, reply: Tag, value: &[u8]) -> Result<Vec<u8>, ClientError> {
        if reply == Tag::ServerHello {
            return Ok(value.to_vec());
        }
        match self.server_key.or(self.expected_server_key) {
            Some(server_key) if request.is_encrypted_request() => Ok(crypto::open_sealed(
                value,
                &self.identity,
                server_key.verifying_key(),
            )?),
            Some(server_key) => Ok(crypto::open_signed(value, server_key.verifying_key())?.to_vec()),
            // A login rejection from a server we have never seen cannot be verified
            None => Ok(crypto::strip_signature(value)?.to_vec()),
        }
    }

    pub async fn login(&mut self, details: &PlayerDetails) -> Result<PlayerKey, ClientError> {
        if self.flags.authenticated() {
            return Err(ClientError::AlreadyLoggedIn);
        }

        let profile = LoginProfile {
            first_name: details.first_name.clone(),
            last_name: details.last_name.clone(),
            active: true,
            rating: details.rating,
            public_key: self.identity.player_key().encoded(),
        };
        let (_, body) = self.call(Tag::Login, &profile.to_payload()?).await?;

        let text = String::from_utf8(body)
            .map_err(|_| ClientError::UnexpectedReply("server key is not text".to_string()))?;
        let server_key = PlayerKey::parse(&text)?;
        if let Some(expected) = self.expected_server_key {
            if expected != server_key {
                return Err(ClientError::ServerKeyMismatch {
                    expected: expected.encoded(),
                    actual: server_key.encoded(),
                });
            }
        }

        self.server_key = Some(server_key);
        self.flags.authenticated.store(true, Ordering::SeqCst);
        if let Some(profile) = &self.profile {
            profile.update(|p| p.server_key = Some(server_key.encoded()));
        }
        info!(server = %server_key.fingerprint(), "Logged in");
        Ok(server_key)
    }

    pub async fn list_open_games(&mut self) -> Result<Vec<String>, ClientError> {
        self.require_login()?;
        let (_, body) = self.call(Tag::ListOpenGames, b"").await?;
        Ok(split_list(&body)?)
    }

    pub async fn host_game(&mut self) -> Result<String, ClientError> {
        self.start_game(Tag::HostGame).await
    }

    pub async fn join_solo(&mut self) -> Result<String, ClientError> {
        self.start_game(Tag::JoinSolo).await
    }

    async fn start_game(&mut self, tag: Tag) -> Result<String, ClientError> {
        self.require_login()?;
        if self.flags.in_game() {
            return Err(ClientError::AlreadyInGame);
        }
        let (_, body) = self.call(tag, b"").await?;
        let game_id = String::from_utf8_lossy(&body).into_owned();
        self.enter_game(tag == Tag::JoinSolo, Some(PlayerColor::White));
        info!(game_id = %game_id, "Game started as white");
        Ok(game_id)
    }

    fn enter_game(&self, solo: bool, color: Option<PlayerColor>) {
        self.flags.enter_game(solo, color);
        if let Some(profile) = &self.profile {
            profile.update(|p| {
                p.in_game = true;
                p.solo = solo;
                p.color = color;
            });
        }
    }

    fn leave_game(&self) {
        self.flags.leave_game();
        if let Some(profile) = &self.profile {
            profile.update(|p| p.clear_game());
        }
    }

    /// The server has no game in progress for this player, so a game the
    /// client still counts as running ended without it hearing the result.
    fn leave_finished_game(&self, result: &Result<impl Sized, ClientError>) {
        if let Err(ClientError::Rejected(reason)) = result {
            if reason == reasons::NO_ACTIVE_GAME || reason == reasons::GAME_OVER {
                info!(reason = %reason, "Game ended while this client was away");
                self.leave_game();
            }
        }
    }

    /// Pick up a game left unfinished by an earlier session. The server is
    /// asked for the game first: when it has none, the game ended while this
    /// client was away, the remembered state is cleared and `Ok(false)` is
    /// returned. Against a person the listener is started.
    pub async fn resume_game(
        &mut self,
        solo: bool,
        color: Option<PlayerColor>,
    ) -> Result<bool, ClientError> {
        self.require_login()?;
        if self.flags.in_game() {
            return Err(ClientError::AlreadyInGame);
        }
        self.enter_game(solo, color);

        match self.list_legal_moves().await {
            Ok(_) => {}
            Err(ClientError::Rejected(_)) if !self.flags.in_game() => return Ok(false),
            Err(e) => return Err(e),
        }
        if !solo {
            self.start_listener().await?;
        }
        info!(solo, ?color, "Resumed game");
        Ok(true)
    }

    /// Join an open game as black and start waiting for white's first move
    pub async fn join_game(&mut self, game_id: &str) -> Result<String, ClientError> {
        self.require_login()?;
        if self.flags.in_game() {
            return Err(ClientError::AlreadyInGame);
        }
        let (_, body) = self.call(Tag::JoinGame, game_id.trim().as_bytes()).await?;
        let joined = String::from_utf8_lossy(&body).into_owned();
        self.enter_game(false, Some(PlayerColor::Black));
        info!(game_id = %joined, "Joined game as black");
        self.start_listener().await?;
        Ok(joined)
    }

    pub async fn play_move(&mut self, text: &str) -> Result<MoveOutcome, ClientError> {
        let server_key = self.require_login()?;
        if !self.flags.in_game() {
            return Err(ClientError::NotInGame);
        }

        let result = self.call(Tag::PlayMove, text.trim().as_bytes()).await;
        self.leave_finished_game(&result);
        let (reply, body) = result?;
        match reply {
            Tag::Ack => {
                self.start_listener().await?;
                Ok(MoveOutcome::Accepted)
            }
            Tag::MoveReceived => Ok(MoveOutcome::OpponentMoved(MoveNotice::parse(&body)?)),
            Tag::GameOver => {
                let notice = GameOverNotice::parse(&body)?;
                self.push_context(server_key).game_over(&notice);
                Ok(MoveOutcome::GameOver(notice))
            }
            other => Err(ClientError::UnexpectedReply(other.to_string())),
        }
    }

    pub async fn list_legal_moves(&mut self) -> Result<Vec<String>, ClientError> {
        self.require_login()?;
        if !self.flags.in_game() {
            return Err(ClientError::NotInGame);
        }
        let result = self.call(Tag::ListLegalMoves, b"").await;
        self.leave_finished_game(&result);
        let (_, body) = result?;
        Ok(split_counted_list(&body)?)
    }

    /// Stop the listener and close the write side of the connection
    pub async fn close(mut self) -> Result<(), ClientError> {
        if let Some(listener) = self.listener.take() {
            listener.token.cancel();
            let _ = listener.handle.await;
        }
        self.writer.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    const WHITE_MATED: &str = "rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3";
    const BLACK_MATED: &str = "r1bqkb1r/pppp1Qpp/2n2n2/4p3/2B1P3/8/PPPP1PPP/RNB1K1NR b KQkq - 0 4";

    /// Server end of a pipe. Replies are written ahead of the requests they
    /// answer, the pipe buffers both directions.
    struct ScriptedServer {
        identity: Identity,
        player: PlayerKey,
        reader: FrameReader<ReadHalf<DuplexStream>>,
        writer: FrameWriter<WriteHalf<DuplexStream>>,
    }

    impl ScriptedServer {
        async fn expect(&mut self, tag: Tag) {
            let frame = self.reader.read_frame().await.unwrap().unwrap();
            assert_eq!(frame.kind(), Some(tag));
        }

        async fn send_signed(&mut self, tag: Tag, body: &[u8]) {
            let frame = Tlv::new(tag, crypto::sign(body, &self.identity));
            self.writer.write_frame(&frame).await.unwrap();
        }

        async fn send_sealed(&mut self, tag: Tag, body: &[u8]) {
            let value = crypto::seal(body, &self.identity, self.player.verifying_key()).unwrap();
            self.writer.write_frame(&Tlv::new(tag, value)).await.unwrap();
        }
    }

    /// A client logged in and hosting a game as white
    async fn hosting_client() -> (Client<DuplexStream>, ScriptedServer) {
        let (client_end, server_end) = tokio::io::duplex(64 * 1024);
        let player = Arc::new(Identity::generate());
        let (read_half, write_half) = tokio::io::split(server_end);
        let mut server = ScriptedServer {
            identity: Identity::generate(),
            player: *player.player_key(),
            reader: FrameReader::new(read_half),
            writer: FrameWriter::new(write_half),
        };
        let mut client = Client::new(client_end, player);

        let hello = server.identity.player_key().encoded().into_bytes();
        server
            .writer
            .write_frame(&Tlv::new(Tag::ServerHello, hello))
            .await
            .unwrap();
        server.send_signed(Tag::Ack, b"g1").await;

        let details = PlayerDetails {
            first_name: "Scripted".to_string(),
            last_name: "Player".to_string(),
            rating: 1500,
        };
        client.login(&details).await.unwrap();
        assert_eq!(client.host_game().await.unwrap(), "g1");
        server.expect(Tag::Login).await;
        server.expect(Tag::HostGame).await;
        (client, server)
    }

    fn notice(fen: &str, result: &str) -> GameOverNotice {
        GameOverNotice {
            fen: fen.to_string(),
            result: result.to_string(),
        }
    }

    #[test]
    fn test_side_to_move_from_fen() {
        assert_eq!(side_to_move(WHITE_MATED), Some(PlayerColor::White));
        assert_eq!(side_to_move(BLACK_MATED), Some(PlayerColor::Black));
        assert_eq!(side_to_move("8/8/8/8/8/8/8/8"), None);
    }

    #[tokio::test]
    async fn test_opponents_game_over_during_a_move_is_a_push() {
        let (mut client, mut server) = hosting_client().await;
        let mut events = client.take_events().unwrap();

        // The mate lands just before the server reaches our move
        let mated = notice(WHITE_MATED, "0-1 checkmate");
        server.send_sealed(Tag::GameOver, &mated.to_payload().unwrap()).await;
        server.send_sealed(Tag::Rejected, b"No active game").await;

        let outcome = client.play_move("e4").await;
        assert!(
            matches!(outcome, Err(ClientError::Rejected(ref reason)) if reason == "No active game"),
            "outcome {:?}",
            outcome
        );
        server.expect(Tag::PlayMove).await;
        assert_eq!(events.recv().await, Some(ClientEvent::GameOver(mated)));
        assert!(!client.in_game());

        // The next request reads its own reply
        server.send_signed(Tag::Ack, b"g2").await;
        assert_eq!(client.host_game().await.unwrap(), "g2");
        server.expect(Tag::HostGame).await;
    }

    #[tokio::test]
    async fn test_game_over_from_own_move_is_the_reply() {
        let (mut client, mut server) = hosting_client().await;

        let won = notice(BLACK_MATED, "1-0 checkmate");
        server.send_sealed(Tag::GameOver, &won.to_payload().unwrap()).await;
        assert_eq!(
            client.play_move("Qxf7#").await.unwrap(),
            MoveOutcome::GameOver(won)
        );
        assert!(!client.in_game());
    }

    #[tokio::test]
    async fn test_rejection_for_a_finished_game_leaves_it() {
        let (mut client, mut server) = hosting_client().await;

        server.send_sealed(Tag::Rejected, b"Not your turn").await;
        assert!(matches!(client.play_move("e4").await, Err(ClientError::Rejected(_))));
        assert!(client.in_game());

        server.send_sealed(Tag::Rejected, b"No active game").await;
        assert!(matches!(client.play_move("e4").await, Err(ClientError::Rejected(_))));
        assert!(!client.in_game());

        server.send_signed(Tag::Ack, b"g2").await;
        assert_eq!(client.host_game().await.unwrap(), "g2");
    }

    #[test]
    fn test_reply_tags_per_request() {
        assert!(accepts_reply(Tag::Login, Tag::ServerHello, false));
        assert!(!accepts_reply(Tag::Login, Tag::Ack, false));
        assert!(accepts_reply(Tag::PlayMove, Tag::GameOver, false));
        assert!(accepts_reply(Tag::PlayMove, Tag::MoveReceived, true));
        assert!(!accepts_reply(Tag::PlayMove, Tag::MoveReceived, false));
        assert!(!accepts_reply(Tag::JoinGame, Tag::MoveReceived, true));
        assert!(accepts_reply(Tag::ListLegalMoves, Tag::Rejected, false));
    }

    #[tokio::test]
    async fn test_guards_before_login() {
        let (stream, _server) = tokio::io::duplex(64);
        let mut client = Client::new(stream, Arc::new(Identity::generate()));

        assert!(matches!(client.list_open_games().await, Err(ClientError::NotLoggedIn)));
        assert!(matches!(client.host_game().await, Err(ClientError::NotLoggedIn)));
        assert!(matches!(client.play_move("e4").await, Err(ClientError::NotLoggedIn)));
        assert!(!client.is_listening());
    }

    #[tokio::test]
    async fn test_push_context_ignores_forged_push() {
        let server = Identity::generate();
        let player = Arc::new(Identity::generate());
        let (events, mut rx) = mpsc::unbounded_channel();
        let ctx = PushContext {
            identity: player.clone(),
            server_key: *server.player_key(),
            flags: Arc::new(SessionFlags::default()),
            events,
            profile: None,
        };

        // Sealed by someone other than the server
        let forger = Identity::generate();
        let forged = crypto::seal(b"e5;fen", &forger, &player.verifying_key()).unwrap();
        assert!(matches!(
            ctx.handle_push(Tlv::new(Tag::MoveReceived, forged)),
            PushAction::Continue
        ));

        let genuine = crypto::seal(b"e5;fen", &server, &player.verifying_key()).unwrap();
        assert!(matches!(
            ctx.handle_push(Tlv::new(Tag::MoveReceived, genuine)),
            PushAction::Stop
        ));
        assert_eq!(
            rx.recv().await,
            Some(ClientEvent::OpponentMoved(MoveNotice {
                san: "e5".to_string(),
                fen: "fen".to_string(),
            }))
        );
    }
}
