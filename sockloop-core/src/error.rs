//! Error types for sockloop
//!
//! This module defines the error types used throughout the sockloop crates.
//! Transport and connection failures never reach caller threads as `Error`
//! values; they are translated into delegate notifications carrying an
//! [`ErrorCode`]. `Error` is what synchronous calls (open, blocking close,
//! configuration, transport construction) return.

#![allow(missing_docs)]

use crate::ConnectionId;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for sockloop operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for sockloop operations
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The connection URI could not be used
    #[error("Invalid URI {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },

    /// TLS setup errors
    #[error("TLS error: {0}")]
    Tls(String),

    /// Connection errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Errors reported by the transport library
    #[error("Transport error: {0}")]
    Transport(String),

    /// The transport has no socket for this connection
    #[error("Unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// The command queue no longer accepts commands
    #[error("Command queue stopped")]
    QueueStopped,

    /// The network thread could not be started
    #[error("Failed to start network thread: {0}")]
    Spawn(std::io::Error),

    /// A blocking call was made from the network thread
    #[error("Blocking call on the network thread would deadlock")]
    OnNetworkThread,

    /// A bounded wait elapsed
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

impl Error {
    /// Build an [`Error::InvalidUri`]
    pub fn invalid_uri(uri: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUri {
            uri: uri.into(),
            reason: reason.into(),
        }
    }
}

/// Configuration errors
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {value}")]
    InvalidValue { field: String, value: String },

    /// Missing required configuration
    #[error("Missing required configuration: {field}")]
    MissingField { field: String },

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

/// Error codes reported through the delegate's error callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The handshake or the established connection failed
    ConnectionFailure,
    /// The transport refused to create the connection
    Transport,
}

impl ErrorCode {
    /// Get the numeric value of the error code
    pub fn code(&self) -> i32 {
        match self {
            ErrorCode::ConnectionFailure => 1,
            ErrorCode::Transport => 2,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::ConnectionFailure => "connection failure",
            ErrorCode::Transport => "transport error",
        };
        write!(f, "{} ({})", name, self.code())
    }
}
