use std::path::PathBuf;
use thiserror::Error;

/// All errors produced by the notification relay.
#[derive(Error, Debug)]
pub enum SyncError {
    /// A persisted file could not be read from disk.
    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted file could not be written, including its fallback location.
    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted JSON document is malformed.
    #[error("Failed to parse JSON: {0}")]
    Parse(#[from] serde_json::Error),

    /// Cipher initialisation, padding or encoding failed.
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// An outbound request could not be completed.
    #[error("Network error: {0}")]
    Network(String),

    /// A connection field was given a value of the wrong kind.
    #[error("Unsupported value for field '{field}': expected {expected}, got {found}")]
    UnsupportedFieldType {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    /// A connection field name is not recognised.
    #[error("Unknown connection field: {0}")]
    UnknownField(String),

    /// A connection record violates its invariants.
    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    /// A connection with the same name is already stored.
    #[error("Connection already exists: {0}")]
    DuplicateConnection(String),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pass-through for any raw I/O error that does not carry a path.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Convenience alias used throughout the relay crates.
pub type Result<T> = std::result::Result<T, SyncError>;
