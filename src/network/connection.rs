use crate::chess::RulesEngine;
use crate::messages::{FrameReader, FrameWriter, Tlv, WireConfig, WireProtocolError};
use crate::network::session::{Orchestrator, Session};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Server side of one client connection.
///
/// Inbound frames are handled one at a time in arrival order. Replies and
/// pushes from other connections share a bounded queue drained by a
/// dedicated writer task, so a slow handler never interleaves bytes with a
/// concurrent push.
pub struct Connection<S, E: RulesEngine> {
    stream: S,
    connection_id: u64,
    orchestrator: Arc<Orchestrator<E>>,
    wire_config: WireConfig,
}

impl<S, E> Connection<S, E>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
    E: RulesEngine,
{
    pub fn new(
        stream: S,
        connection_id: u64,
        orchestrator: Arc<Orchestrator<E>>,
        wire_config: WireConfig,
    ) -> Self {
        Self {
            stream,
            connection_id,
            orchestrator,
            wire_config,
        }
    }

    /// Serve the connection until EOF or a transport/framing failure
    #[instrument(skip(self), fields(connection_id = self.connection_id))]
    pub async fn run(self) -> Result<(), WireProtocolError> {
        let Self {
            stream,
            connection_id,
            orchestrator,
            wire_config,
        } = self;

        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = FrameReader::with_config(read_half, wire_config.clone());
        let (outbound, queue) = mpsc::channel::<Tlv>(wire_config.outbound_queue.max(1));
        let writer = tokio::spawn(write_loop(FrameWriter::new(write_half), queue, connection_id));

        let mut session = Session::new(connection_id, outbound.clone());
        let result = loop {
            match reader.read_frame().await {
                Ok(Some(frame)) => {
                    if let Some(reply) = orchestrator.handle(&mut session, frame).await {
                        if outbound.send(reply).await.is_err() {
                            debug!("Writer stopped, closing connection");
                            break Ok(());
                        }
                    }
                }
                Ok(None) => {
                    info!("Connection closed by peer");
                    break Ok(());
                }
                Err(e) => {
                    warn!("Closing connection after read failure: {}", e);
                    break Err(e);
                }
            }
        };

        if let Some(player) = session.close() {
            orchestrator.registry().unregister(&player, connection_id);
        }
        drop(session);
        drop(outbound);

        // The writer drains whatever was queued and exits once every sender
        // is gone
        if let Err(e) = writer.await {
            warn!("Writer task failed: {}", e);
        }

        result
    }
}

async fn write_loop<W>(mut writer: FrameWriter<W>, mut queue: mpsc::Receiver<Tlv>, connection_id: u64)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = queue.recv().await {
        if let Err(e) = writer.write_frame(&frame).await {
            warn!(connection_id, "Write failed, dropping outbound queue: {}", e);
            return;
        }
    }
    if let Err(e) = writer.shutdown().await {
        debug!(connection_id, "Shutdown after last write failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chess::{GreedyOpponent, StandardChess};
    use crate::crypto::{self, Identity};
    use crate::messages::{LoginProfile, Tag};
    use crate::storage::{spawn_actor, Database};

    #[tokio::test]
    async fn test_login_round_trip_and_cleanup() {
        let (storage, _task) = spawn_actor(Database::open_in_memory().unwrap(), 8);
        let server_identity = Arc::new(Identity::generate());
        let orchestrator = Arc::new(Orchestrator::new(
            server_identity.clone(),
            storage,
            StandardChess,
            Arc::new(GreedyOpponent),
        ));

        let (client_side, server_side) = tokio::io::duplex(4096);
        let connection = Connection::new(server_side, 7, orchestrator.clone(), WireConfig::for_server());
        let task = tokio::spawn(connection.run());

        let player = Identity::generate();
        let (client_read, client_write) = tokio::io::split(client_side);
        let mut reader = FrameReader::new(client_read);
        let mut writer = FrameWriter::new(client_write);

        let login = LoginProfile {
            first_name: "Wire".to_string(),
            last_name: "Test".to_string(),
            active: true,
            rating: 1500,
            public_key: player.player_key().encoded(),
        };
        writer
            .write_frame(&Tlv::new(Tag::Login, login.to_payload().unwrap()))
            .await
            .unwrap();
        let hello = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(hello.kind(), Some(Tag::ServerHello));

        writer
            .write_frame(&Tlv::new(Tag::ListOpenGames, crypto::sign(b"", &player)))
            .await
            .unwrap();
        let reply = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(reply.kind(), Some(Tag::Ack));
        assert!(crypto::open_signed(&reply.value, &server_identity.verifying_key())
            .unwrap()
            .is_empty());
        assert!(orchestrator.registry().is_connected(player.player_key()));

        writer.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
        assert!(orchestrator.registry().is_empty());
    }

    #[tokio::test]
    async fn test_garbage_frame_closes_connection() {
        let (storage, _task) = spawn_actor(Database::open_in_memory().unwrap(), 8);
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(Identity::generate()),
            storage,
            StandardChess,
            Arc::new(GreedyOpponent),
        ));

        let (mut client_side, server_side) = tokio::io::duplex(256);
        let task = tokio::spawn(
            Connection::new(server_side, 1, orchestrator, WireConfig::for_server()).run(),
        );

        // Declared length 2, but the byte after the value is not a terminator
        use tokio::io::AsyncWriteExt;
        client_side.write_all(&[0x1F, 0x00, 0x02, b'a', b'b', b'c']).await.unwrap();
        assert!(task.await.unwrap().is_err());
    }
}
