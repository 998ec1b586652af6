//! Error types for the crawler and the state store.

use thiserror::Error;

/// Crawler result type
pub type Result<T> = std::result::Result<T, AirwalkError>;

/// Errors raised anywhere in the crawler
#[derive(Error, Debug)]
pub enum AirwalkError {
    /// Bad or missing command-line argument
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Lexically malformed callsign from input
    #[error("invalid callsign {0:?}: {1}")]
    InvalidCallsign(String, &'static str),

    /// State-file framing, magic, endian, version, or index violation.
    /// A corrupt file is refused, never repaired.
    #[error("state file corrupt: {0}")]
    Corrupt(String),

    /// The remote station broke the reply grammar
    #[error("remote is non-conforming: {0}")]
    NonConforming(String),

    /// A socket receive timed out. The discovery line reader translates
    /// this into end-of-stream; everywhere else it surfaces as an error.
    #[error("receive timed out")]
    Timeout,

    /// Underlying file or socket failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AirwalkError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        AirwalkError::Corrupt(msg.into())
    }
}
