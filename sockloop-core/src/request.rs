//! Connection parameters
//!
//! [`ConnectRequest`] carries everything a transport needs to start one
//! outbound connection: where to connect, which sub-protocols to offer and how
//! to set up TLS. It is derived from the URI the application opened.

use crate::error::{ConfigError, Error, Result};
use crate::protocol::constants::{DEFAULT_WSS_PORT, DEFAULT_WS_PORT, PROTOCOL_SEPARATOR};
use http::Uri;
use std::path::{Path, PathBuf};

/// Parameters of one outbound WebSocket connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// URI as given by the application
    pub uri: String,
    /// Whether the connection runs over TLS (`wss://`)
    pub secure: bool,
    /// Target host
    pub host: String,
    /// Target port
    pub port: u16,
    /// Path and query sent in the upgrade request
    pub path: String,
    /// Origin header value
    pub origin: Option<String>,
    /// Requested sub-protocols, in preference order
    pub protocols: Vec<String>,
    /// PEM file with trusted certificate authorities
    pub ca_file: Option<PathBuf>,
}

impl ConnectRequest {
    /// Derive connection parameters from a `ws://` or `wss://` URI
    pub fn parse<S, P>(uri: &str, protocols: &[S], ca_file: Option<P>) -> Result<Self>
    where
        S: AsRef<str>,
        P: AsRef<Path>,
    {
        let trimmed = uri.trim();
        if trimmed.is_empty() {
            return Err(Error::invalid_uri(uri, "empty URI"));
        }

        let parsed: Uri = trimmed
            .parse()
            .map_err(|e: http::uri::InvalidUri| Error::invalid_uri(uri, e.to_string()))?;

        let secure = match parsed.scheme_str() {
            Some(scheme) if scheme.eq_ignore_ascii_case("wss") => true,
            Some(scheme) if scheme.eq_ignore_ascii_case("ws") => false,
            Some(scheme) => {
                return Err(Error::invalid_uri(uri, format!("unsupported scheme {}", scheme)))
            }
            None => return Err(Error::invalid_uri(uri, "missing scheme")),
        };

        let host = match parsed.host() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(Error::invalid_uri(uri, "missing host")),
        };

        let port = parsed
            .port_u16()
            .unwrap_or(if secure { DEFAULT_WSS_PORT } else { DEFAULT_WS_PORT });

        let mut path = match parsed.path() {
            "" => "/".to_string(),
            p => p.to_string(),
        };
        if let Some(query) = parsed.query() {
            path.push('?');
            path.push_str(query);
        }

        let protocols = protocols
            .iter()
            .map(|p| validate_protocol(p.as_ref()).map(str::to_string))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            uri: trimmed.to_string(),
            secure,
            host,
            port,
            path,
            origin: None,
            protocols,
            ca_file: ca_file.map(|p| p.as_ref().to_path_buf()),
        })
    }

    /// Set the Origin header value
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Requested sub-protocols joined for the `Sec-WebSocket-Protocol` header.
    ///
    /// Empty when no sub-protocol was requested.
    pub fn joined_protocols(&self) -> String {
        self.protocols.join(PROTOCOL_SEPARATOR)
    }

    /// `host:port`
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Normalized URL with explicit port
    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}{}", scheme, self.host, self.port, self.path)
    }
}

fn validate_protocol(protocol: &str) -> Result<&str> {
    let invalid = protocol.is_empty()
        || protocol
            .chars()
            .any(|c| c.is_whitespace() || c == ',' || c.is_control());
    if invalid {
        return Err(ConfigError::InvalidValue {
            field: "protocols".to_string(),
            value: protocol.to_string(),
        }
        .into());
    }
    Ok(protocol)
}
