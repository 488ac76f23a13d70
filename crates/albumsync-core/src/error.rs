//! Error types for the album sync core

use thiserror::Error;

/// Main error type for album sync operations
#[derive(Error, Debug)]
pub enum AlbumError {
    /// Invite code, album, media item or notification is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Join attempted by a user who is already a member
    #[error("User {user} is already a member of album {album}")]
    AlreadyMember {
        /// The album that was joined
        album: String,
        /// The user attempting to join
        user: String,
    },

    /// Caller is not allowed to perform the operation
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Network or remote store failure (not retried automatically)
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    /// Operation was superseded by a newer request or explicitly cancelled
    #[error("Operation cancelled")]
    Cancelled,

    /// Bounded retries ran out (e.g. invite code collisions)
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Input failed validation before reaching any store
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Error during serialization/deserialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error during local storage operations (redb)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database creation/opening error
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    /// Transaction error
    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    /// Table error
    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    /// Storage operation error
    #[error("Storage operation error: {0}")]
    StorageOp(#[from] redb::StorageError),

    /// Commit error
    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AlbumError {
    /// Whether the failure is worth showing as a non-fatal inline message
    /// and retrying by hand.
    pub fn is_transient(&self) -> bool {
        matches!(self, AlbumError::TransientIo(_) | AlbumError::Io(_))
    }
}

impl From<serde_json::Error> for AlbumError {
    fn from(e: serde_json::Error) -> Self {
        AlbumError::Serialization(e.to_string())
    }
}

/// Result type alias using AlbumError
pub type AlbumResult<T> = Result<T, AlbumError>;
