//! Error types for the tiered cache engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the cache engine.
///
/// The enum is `Clone` so a single loader failure can be delivered to every
/// caller coalesced onto the same in-flight load.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Loader callback failed; the only error surfaced from a read
    #[error("loader failed for key '{key}': {reason}")]
    Loader { key: String, reason: String },

    /// Compression failed
    #[error("compression with {algorithm} failed: {reason}")]
    CompressionFailed { algorithm: String, reason: String },

    /// Decompression failed
    #[error("decompression with {algorithm} failed: {reason}")]
    DecompressionFailed { algorithm: String, reason: String },

    /// Durable store adapter operation failed
    #[error("durable store {op} failed for key '{key}': {reason}")]
    DurableStore {
        op: &'static str,
        key: String,
        reason: String,
    },

    /// Payload (de)serialization failed in a typed accessor
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
