//! Builder pattern for server configuration.
//!
//! Provides a fluent API for configuring and starting a [`Server`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use roomcast::{Server, SessionHandler};
//!
//! struct Noop;
//! impl SessionHandler for Noop {}
//!
//! # async fn example() -> roomcast::Result<()> {
//! let server = Server::builder()
//!     .port(9000)
//!     .path("/ws")
//!     .max_frame_size(64 * 1024)
//!     .ping_interval_ms(15_000)
//!     .start(Arc::new(Noop))
//!     .await?;
//! # server.shutdown().await;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::IpAddr;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::transport::{Server, SessionHandler};

use super::options::ServerConfig;

// ============================================================================
// Constants
// ============================================================================

/// Smallest accepted handshake limit; a request line plus a key header fit.
const MIN_HANDSHAKE_BYTES: usize = 256;

// ============================================================================
// ServerBuilder
// ============================================================================

/// Builder for configuring a [`Server`] instance.
///
/// Use [`Server::builder()`] to create a new builder.
#[derive(Debug, Default, Clone)]
pub struct ServerBuilder {
    config: ServerConfig,
}

// ============================================================================
// ServerBuilder Implementation
// ============================================================================

impl ServerBuilder {
    /// Creates a new builder with default configuration.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a builder seeded from an existing configuration.
    #[inline]
    #[must_use]
    pub fn from_config(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Sets the address to bind to.
    #[inline]
    #[must_use]
    pub fn bind_address(mut self, ip: IpAddr) -> Self {
        self.config.bind_address = ip;
        self
    }

    /// Sets the listening port (0 for random).
    #[inline]
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets the upgrade path (e.g., "/ws").
    #[inline]
    #[must_use]
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.config.path = path.into();
        self
    }

    /// Sets the maximum inbound frame payload in bytes.
    #[inline]
    #[must_use]
    pub fn max_frame_size(mut self, bytes: usize) -> Self {
        self.config.max_frame_size = bytes;
        self
    }

    /// Sets the liveness probe period. `0` disables probing.
    #[inline]
    #[must_use]
    pub fn ping_interval_ms(mut self, millis: u64) -> Self {
        self.config.ping_interval_ms = millis;
        self
    }

    /// Sets the maximum size of the upgrade request head.
    #[inline]
    #[must_use]
    pub fn max_handshake_bytes(mut self, bytes: usize) -> Self {
        self.config.max_handshake_bytes = bytes;
        self
    }

    /// Validates and returns the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if any setting is out of range.
    pub fn build(self) -> Result<ServerConfig> {
        self.validate()?;
        Ok(self.config)
    }

    /// Validates the configuration, binds the listener and starts serving.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if any setting is out of range
    /// - [`Error::Io`] if binding fails
    pub async fn start(self, handler: Arc<dyn SessionHandler>) -> Result<Arc<Server>> {
        let config = self.build()?;
        Server::start(config, handler).await
    }
}

// ============================================================================
// Validation
// ============================================================================

impl ServerBuilder {
    fn validate(&self) -> Result<()> {
        let config = &self.config;

        if !config.path.starts_with('/') {
            return Err(Error::config(format!(
                "Upgrade path must start with '/': {:?}",
                config.path
            )));
        }

        if config.path.contains('?') {
            return Err(Error::config(format!(
                "Upgrade path must not contain a query: {:?}",
                config.path
            )));
        }

        if config.max_frame_size == 0 {
            return Err(Error::config("max_frame_size must be greater than 0"));
        }

        if config.max_handshake_bytes < MIN_HANDSHAKE_BYTES {
            return Err(Error::config(format!(
                "max_handshake_bytes must be at least {MIN_HANDSHAKE_BYTES}"
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_builds() {
        let config = ServerBuilder::new().build().expect("defaults are valid");
        assert_eq!(config, ServerConfig::default());
    }

    #[test]
    fn test_setters() {
        let config = ServerBuilder::new()
            .port(9000)
            .path("/game")
            .max_frame_size(1024)
            .ping_interval_ms(0)
            .max_handshake_bytes(4096)
            .build()
            .expect("valid config");

        assert_eq!(config.port, 9000);
        assert_eq!(config.path, "/game");
        assert_eq!(config.max_frame_size, 1024);
        assert!(config.ping_interval().is_none());
        assert_eq!(config.max_handshake_bytes, 4096);
    }

    #[test]
    fn test_path_without_slash_rejected() {
        let err = ServerBuilder::new().path("ws").build().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_path_with_query_rejected() {
        let err = ServerBuilder::new().path("/ws?x=1").build().unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_zero_frame_size_rejected() {
        let err = ServerBuilder::new().max_frame_size(0).build().unwrap_err();
        assert!(err.to_string().contains("max_frame_size"));
    }

    #[test]
    fn test_tiny_handshake_limit_rejected() {
        let err = ServerBuilder::new()
            .max_handshake_bytes(16)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn test_from_config_keeps_values() {
        let config = ServerConfig {
            port: 7000,
            ..Default::default()
        };
        let built = ServerBuilder::from_config(config.clone())
            .build()
            .expect("valid");
        assert_eq!(built, config);
    }
}
