//! Client configuration for sockloop
//!
//! This module provides configuration options for the client service and the
//! transport context it creates on the network thread.

use sockloop_core::error::ConfigError;
use sockloop_core::protocol::constants::{
    DEFAULT_CLOSE_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_FRAME_SIZE,
    DEFAULT_RECEIVE_RESERVE,
};
use sockloop_core::{ContextOptions, Error};
use std::path::PathBuf;
use std::time::Duration;

/// Default name of the network thread
pub const DEFAULT_THREAD_NAME: &str = "sockloop-network";

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Largest chunk handed to the transport per write
    pub max_frame_size: usize,
    /// Capacity the receive assembly buffer is reset to after each message
    pub receive_reserve: usize,
    /// Handshake timeout
    pub handshake_timeout: Duration,
    /// Time to wait for the peer's close frame
    pub close_timeout: Duration,
    /// Origin header
    pub origin: Option<String>,
    /// CA file used when `open` is not given one
    pub ca_file: Option<PathBuf>,
    /// Accept invalid server certificates
    pub allow_insecure: bool,
    /// Name of the network thread
    pub thread_name: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            receive_reserve: DEFAULT_RECEIVE_RESERVE,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            origin: None,
            ca_file: None,
            allow_insecure: false,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
        }
    }
}

impl ClientConfig {
    /// Validate the configuration
    pub fn validate(&self) -> sockloop_core::Result<()> {
        if self.max_frame_size == 0 {
            return Err(Error::Config(ConfigError::Validation(
                "max_frame_size must be greater than 0".to_string(),
            )));
        }

        if self.handshake_timeout.is_zero() {
            return Err(Error::Config(ConfigError::Validation(
                "handshake_timeout must be greater than 0".to_string(),
            )));
        }

        if self.close_timeout.is_zero() {
            return Err(Error::Config(ConfigError::Validation(
                "close_timeout must be greater than 0".to_string(),
            )));
        }

        if self.thread_name.is_empty() || self.thread_name.contains('\0') {
            return Err(Error::Config(ConfigError::InvalidValue {
                field: "thread_name".to_string(),
                value: self.thread_name.clone(),
            }));
        }

        Ok(())
    }

    /// Options for the transport context created on the network thread
    pub fn context_options(&self) -> ContextOptions {
        ContextOptions {
            tls: true,
            ca_file: self.ca_file.clone(),
            allow_insecure: self.allow_insecure,
            max_frame_size: self.max_frame_size,
            handshake_timeout: self.handshake_timeout,
            close_timeout: self.close_timeout,
        }
    }

    /// Set maximum frame size
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Set the receive buffer reserve
    pub fn receive_reserve(mut self, size: usize) -> Self {
        self.receive_reserve = size;
        self
    }

    /// Set handshake timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set close timeout
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Set origin
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Set the default CA file
    pub fn ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    /// Accept self-signed, expired or mismatched server certificates
    pub fn allow_insecure(mut self, allow: bool) -> Self {
        self.allow_insecure = allow;
        self
    }

    /// Set the network thread name
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}
