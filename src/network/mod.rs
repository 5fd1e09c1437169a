pub mod cache;
pub mod client;
pub mod connection;
pub mod profile;
pub mod registry;
pub mod server;
pub mod session;

pub use cache::{CachedGame, GameCache};
pub use client::{Client, ClientError, ClientEvent, MoveOutcome};
pub use connection::Connection;
pub use profile::{ClientProfile, PlayerDetails, ProfileStore};
pub use registry::{ConnectionRegistry, DeliveryError};
pub use server::{Server, ServerSettings};
pub use session::{Orchestrator, Session, SessionError, SessionState};
