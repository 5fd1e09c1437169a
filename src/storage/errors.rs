use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(#[from] rusqlite::Error),

    #[error("Migration {version} failed: {reason}")]
    MigrationFailed { version: i32, reason: String },

    #[error("Game not found: {0}")]
    GameNotFound(String),

    #[error("Game is not open for joining: {0}")]
    GameNotOpen(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Database path error: {0}")]
    DatabasePathError(String),

    #[error("Storage actor is not running")]
    ActorUnavailable,
}

impl StorageError {
    pub fn migration_failed(version: i32, reason: impl Into<String>) -> Self {
        StorageError::MigrationFailed {
            version,
            reason: reason.into(),
        }
    }

    pub fn game_not_found(game_id: impl Into<String>) -> Self {
        StorageError::GameNotFound(game_id.into())
    }

    pub fn user_not_found(what: impl Into<String>) -> Self {
        StorageError::UserNotFound(what.into())
    }

    pub fn database_path_error(reason: impl Into<String>) -> Self {
        StorageError::DatabasePathError(reason.into())
    }

    pub fn invalid_data(reason: impl Into<String>) -> Self {
        StorageError::InvalidData(reason.into())
    }

    /// Lookups that found nothing, as opposed to a failing database
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::GameNotFound(_) | StorageError::UserNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
