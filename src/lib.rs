pub mod chess;
pub mod cli;
pub mod crypto;
pub mod messages;
pub mod network;
pub mod storage;

// Re-export key types for easy testing
pub use crypto::{Identity, PlayerKey};
pub use messages::{Tag, Tlv};
pub use network::{Client, Orchestrator, Server};
