//! Error types for fragbox.

use std::io;
use thiserror::Error;

/// Result type for fragbox operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for fragbox operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed box header or payload.
    #[error("Invalid box: {0}")]
    InvalidBox(String),

    /// Malformed movie metadata (moov).
    #[error("Invalid moov: {0}")]
    InvalidMoov(String),

    /// Malformed movie fragment (moof) or its auxiliary data.
    #[error("Invalid fragment: {0}")]
    InvalidFragment(String),

    /// Declared box size exceeds the sanity ceiling.
    #[error("Box '{atom}' declares {size} bytes (max {max})")]
    BoxTooLarge { atom: String, size: u64, max: u64 },

    /// Unsupported feature or codec.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Key fetch against the key source failed.
    #[error("Key fetch failed: {0}")]
    KeyFetch(String),

    /// No key available for a key id that a protected sample requires.
    #[error("No key for key id {key_id}")]
    MissingKey { key_id: String },

    /// Decryption of a protected sample failed.
    #[error("Decryption failed: {0}")]
    Decrypt(String),

    /// The sample sink rejected a sample.
    #[error("Sample delivery aborted by sink")]
    Aborted,

    /// The parser hit a fatal error earlier and cannot accept more data.
    #[error("Parser is in the error state")]
    Poisoned,
}

impl Error {
    /// Create an invalid box error.
    pub fn invalid_box(msg: impl Into<String>) -> Self {
        Self::InvalidBox(msg.into())
    }

    /// Create an invalid moov error.
    pub fn invalid_moov(msg: impl Into<String>) -> Self {
        Self::InvalidMoov(msg.into())
    }

    /// Create an invalid fragment error.
    pub fn invalid_fragment(msg: impl Into<String>) -> Self {
        Self::InvalidFragment(msg.into())
    }

    /// Create an unsupported error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    /// Create a missing-key error from a raw key id.
    pub fn missing_key(key_id: &[u8]) -> Self {
        Self::MissingKey {
            key_id: hex::encode(key_id),
        }
    }
}
