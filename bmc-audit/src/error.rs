//! Error types for the audit subsystem
//!
//! Most of the notify path degrades instead of failing: store trouble is
//! logged and the caller still gets an answer. The variants below cover the
//! places that genuinely fail hard, which is daemon startup (configuration,
//! bus connection) and the client side of the bus.

use std::fmt;
use thiserror::Error;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the audit subsystem
///
/// Large error variants are boxed to reduce stack size
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// NATS error
    #[error("NATS error: {0}")]
    Nats(String),

    /// Journal reader error (spawn failure, broken entry stream)
    #[error("Journal error: {0}")]
    Journal(String),

    /// Store control error (flush delivery, change watch, marker access)
    #[error("Store error: {0}")]
    Store(String),

    /// Wire encode/decode error
    #[error("Codec error: {0}")]
    Codec(Box<serde_json::Error>),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A bus request did not receive a reply in time
    #[error("Request timed out: {0}")]
    Timeout(String),
}

impl Error {
    /// Shorthand for a NATS transport error from any displayable source
    pub fn nats(err: impl fmt::Display) -> Self {
        Error::Nats(err.to_string())
    }

    /// Shorthand for a journal reader error from any displayable source
    pub fn journal(err: impl fmt::Display) -> Self {
        Error::Journal(err.to_string())
    }

    /// Shorthand for a store control error from any displayable source
    pub fn store(err: impl fmt::Display) -> Self {
        Error::Store(err.to_string())
    }
}

// Manual From implementations for boxed errors
impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Codec(Box::new(err))
    }
}
