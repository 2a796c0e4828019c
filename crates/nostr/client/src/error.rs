//! Client error types

use thiserror::Error;

/// Client error type
#[derive(Error, Debug)]
pub enum ClientError {
    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// URL parse error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Timeout error
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Not connected
    #[error("Not connected to relay")]
    NotConnected,

    /// Local store error
    #[error("Store error: {0}")]
    Store(#[from] nostr_store::StoreError),

    /// Signing capability error
    #[error("Signer error: {0}")]
    Signer(#[from] nostr::SignerError),

    /// Configuration could not be read or written
    #[error("Config error: {0}")]
    Config(String),

    /// The caller asked for something the session can't do
    #[error("Invalid request: {0}")]
    Misuse(String),
}

/// Client result type
pub type Result<T> = std::result::Result<T, ClientError>;
