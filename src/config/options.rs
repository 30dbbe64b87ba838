//! Server configuration consumed from the host application.
//!
//! # Example
//!
//! ```ignore
//! use roomcast::ServerConfig;
//!
//! let config = ServerConfig::from_json(r#"{ "port": 9000, "pingIntervalMs": 0 }"#)?;
//! assert_eq!(config.path, "/ws");
//! assert!(config.ping_interval().is_none());
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

// ============================================================================
// Constants
// ============================================================================

/// Default upgrade path.
pub const DEFAULT_PATH: &str = "/ws";

/// Default maximum inbound frame payload (64 KiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// Default liveness probe period.
pub const DEFAULT_PING_INTERVAL_MS: u64 = 30_000;

/// Default cap on the upgrade request head.
pub const DEFAULT_MAX_HANDSHAKE_BYTES: usize = 8 * 1024;

// ============================================================================
// ServerConfig
// ============================================================================

/// Listening and protocol limits for a [`Server`](crate::Server).
///
/// Every field has a default, so a partial JSON document is valid input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    /// Address to bind the listener to.
    pub bind_address: IpAddr,

    /// Port to listen on (0 lets the OS choose).
    pub port: u16,

    /// Request path that is allowed to upgrade.
    pub path: String,

    /// Largest inbound payload accepted, in bytes.
    pub max_frame_size: usize,

    /// Liveness probe period in milliseconds. `0` disables probing.
    pub ping_interval_ms: u64,

    /// Largest upgrade request head accepted, in bytes.
    pub max_handshake_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            path: DEFAULT_PATH.to_string(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            ping_interval_ms: DEFAULT_PING_INTERVAL_MS,
            max_handshake_bytes: DEFAULT_MAX_HANDSHAKE_BYTES,
        }
    }
}

impl ServerConfig {
    /// Parses a configuration from a JSON document.
    ///
    /// Missing keys fall back to their defaults. The result is not validated;
    /// pass it through [`ServerBuilder::from_config`](crate::ServerBuilder::from_config)
    /// for that.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`](crate::Error::Json) if the document is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Returns the socket address to bind.
    #[inline]
    #[must_use]
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Returns the probe period, or `None` when probing is disabled.
    #[inline]
    #[must_use]
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_ms > 0).then(|| Duration::from_millis(self.ping_interval_ms))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.path, "/ws");
        assert_eq!(config.max_frame_size, 65536);
        assert_eq!(config.port, 0);
        assert_eq!(config.ping_interval(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_from_json_partial() {
        let config = ServerConfig::from_json(r#"{"port": 9001, "path": "/game"}"#)
            .expect("valid json");
        assert_eq!(config.port, 9001);
        assert_eq!(config.path, "/game");
        assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
    }

    #[test]
    fn test_from_json_camel_case() {
        let config = ServerConfig::from_json(
            r#"{"maxFrameSize": 1024, "pingIntervalMs": 0, "bindAddress": "0.0.0.0"}"#,
        )
        .expect("valid json");
        assert_eq!(config.max_frame_size, 1024);
        assert!(config.ping_interval().is_none());
        assert_eq!(config.bind_address, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
    }

    #[test]
    fn test_from_json_malformed() {
        let result = ServerConfig::from_json("{ port: ");
        assert!(matches!(result, Err(crate::Error::Json(_))));
    }

    #[test]
    fn test_socket_addr() {
        let config = ServerConfig {
            port: 8080,
            ..Default::default()
        };
        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:8080");
    }
}
