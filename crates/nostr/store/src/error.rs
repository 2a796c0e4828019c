//! Store error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool error
    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Filesystem error preparing the database location
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored JSON column could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Event failed structural validation
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Relay URL is not a ws:// or wss:// URL
    #[error("Invalid relay URL: {0}")]
    InvalidRelayUrl(String),

    /// Referenced event is not in the store
    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    /// Referenced relay is not in the store
    #[error("Unknown relay: {0}")]
    UnknownRelay(i64),

    /// The session account does not own the event
    #[error("Event {event_id} is not authored by {pubkey}")]
    NotAuthor { event_id: String, pubkey: String },
}

/// Store result type
pub type Result<T> = std::result::Result<T, StoreError>;
