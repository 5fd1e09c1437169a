//! In-process server on an ephemeral port, backed by an in-memory database

use gambit::chess::{GreedyOpponent, StandardChess};
use gambit::crypto::{Identity, PlayerKey};
use gambit::network::{Client, Orchestrator, Server, ServerSettings};
use gambit::storage::{spawn_actor, Database, StorageHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::test_data::player_details;

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TestServer {
    pub addr: String,
    pub orchestrator: Arc<Orchestrator<StandardChess>>,
    pub server_key: PlayerKey,
    shutdown: CancellationToken,
    task: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(ServerSettings::default()).await
    }

    pub async fn start_with(settings: ServerSettings) -> Self {
        let database = Database::open_in_memory().expect("Failed to open in-memory database");
        let (storage, _actor) = spawn_actor(database, 64);

        let identity = Arc::new(Identity::generate());
        let server_key = *identity.player_key();
        let orchestrator = Arc::new(
            Orchestrator::new(identity, storage, StandardChess, Arc::new(GreedyOpponent))
                .with_think_time(Duration::from_millis(50)),
        );

        let server = Server::bind_with_settings("127.0.0.1:0", orchestrator.clone(), settings)
            .await
            .expect("Failed to bind test server");
        let addr = server.local_addr().expect("No local address").to_string();

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(server.run_until(shutdown.clone()));

        Self {
            addr,
            orchestrator,
            server_key,
            shutdown,
            task,
        }
    }

    pub fn storage(&self) -> &StorageHandle {
        self.orchestrator.storage()
    }

    /// A client that is connected but not logged in
    pub async fn connect(&self) -> Client<TcpStream> {
        self.connect_as(Arc::new(Identity::generate())).await
    }

    pub async fn connect_as(&self, identity: Arc<Identity>) -> Client<TcpStream> {
        Client::connect(&self.addr, identity)
            .await
            .expect("Failed to connect test client")
    }

    /// A connected and logged-in client
    pub async fn player(&self, first_name: &str) -> Client<TcpStream> {
        let mut client = self.connect().await;
        let server_key = client
            .login(&player_details(first_name))
            .await
            .expect("Login failed");
        assert_eq!(server_key, self.server_key);
        client
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(5), self.task).await;
    }
}
