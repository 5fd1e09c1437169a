pub mod actor;
pub mod database;
pub mod errors;
pub mod games;
pub mod models;
pub mod schema;
pub mod users;

// Re-export key types for easy access
pub use actor::{spawn as spawn_actor, Query, Reply, StorageHandle, StorageRequest};
pub use database::{get_database_path, Database};
pub use errors::StorageError;
pub use models::{GameRecord, NewUser, PlayerColor, Seat, User};
