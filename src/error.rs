//! Error types for roomcast.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use roomcast::{Result, Session};
//!
//! async fn greet(session: &Session) -> Result<()> {
//!     session.send_text("welcome").await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`] |
//! | Handshake | [`Error::Handshake`] |
//! | Framing | [`Error::FrameTooLarge`], [`Error::TruncatedFrame`], [`Error::InvalidOpcode`], [`Error::Protocol`] |
//! | Transport | [`Error::ConnectionClosed`], [`Error::Io`] |
//! | Registry | [`Error::SessionNotFound`] |
//! | Application | [`Error::Handler`] |
//! | External | [`Error::Json`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;

use crate::identifiers::SessionId;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when server configuration is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    // ========================================================================
    // Handshake Errors
    // ========================================================================
    /// Upgrade request rejected.
    ///
    /// The peer has already been sent `status` when this is returned.
    #[error("Handshake rejected ({status}): {message}")]
    Handshake {
        /// HTTP status sent back to the peer.
        status: u16,
        /// Why the request was rejected.
        message: String,
    },

    // ========================================================================
    // Framing Errors
    // ========================================================================
    /// Declared payload length exceeds the configured maximum.
    #[error("Frame too large: {size} bytes (limit {limit})")]
    FrameTooLarge {
        /// Length declared in the frame header.
        size: u64,
        /// Configured maximum frame size.
        limit: usize,
    },

    /// Stream ended in the middle of a frame.
    #[error("Stream ended before frame was complete")]
    TruncatedFrame,

    /// Opcode nibble not defined by the protocol.
    #[error("Invalid opcode: {opcode:#x}")]
    InvalidOpcode {
        /// The raw opcode nibble.
        opcode: u8,
    },

    /// Protocol violation.
    #[error("Protocol error: {message}")]
    Protocol {
        /// Description of the protocol violation.
        message: String,
    },

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// Session is closed; nothing more can be written to it.
    #[error("Connection closed")]
    ConnectionClosed,

    // ========================================================================
    // Registry Errors
    // ========================================================================
    /// Session not registered.
    #[error("Session not found: {session_id}")]
    SessionNotFound {
        /// The missing session ID.
        session_id: SessionId,
    },

    // ========================================================================
    // Application Errors
    // ========================================================================
    /// Application callback failed or panicked.
    #[error("Handler error: {message}")]
    Handler {
        /// Description of the failure.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a handshake rejection error.
    #[inline]
    pub fn handshake(status: u16, message: impl Into<String>) -> Self {
        Self::Handshake {
            status,
            message: message.into(),
        }
    }

    /// Creates a frame too large error.
    #[inline]
    pub fn frame_too_large(size: u64, limit: usize) -> Self {
        Self::FrameTooLarge { size, limit }
    }

    /// Creates an invalid opcode error.
    #[inline]
    pub fn invalid_opcode(opcode: u8) -> Self {
        Self::InvalidOpcode { opcode }
    }

    /// Creates a protocol error.
    #[inline]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a session not found error.
    #[inline]
    pub fn session_not_found(session_id: SessionId) -> Self {
        Self::SessionNotFound { session_id }
    }

    /// Creates a handler error.
    #[inline]
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if the upgrade request was rejected.
    #[inline]
    #[must_use]
    pub fn is_handshake_error(&self) -> bool {
        matches!(self, Self::Handshake { .. })
    }

    /// Returns `true` if the inbound byte stream violated the frame format.
    ///
    /// Framing errors are fatal for the connection; there is no resync.
    #[inline]
    #[must_use]
    pub fn is_framing_error(&self) -> bool {
        matches!(
            self,
            Self::FrameTooLarge { .. }
                | Self::TruncatedFrame
                | Self::InvalidOpcode { .. }
                | Self::Protocol { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::ConnectionClosed | Self::Io(_))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::protocol("bad header");
        assert_eq!(err.to_string(), "Protocol error: bad header");
    }

    #[test]
    fn test_handshake_display() {
        let err = Error::handshake(404, "path /chat does not match /ws");
        assert_eq!(
            err.to_string(),
            "Handshake rejected (404): path /chat does not match /ws"
        );
        assert!(err.is_handshake_error());
        assert!(!err.is_framing_error());
    }

    #[test]
    fn test_frame_too_large_display() {
        let err = Error::frame_too_large(1_000_000, 65536);
        assert_eq!(
            err.to_string(),
            "Frame too large: 1000000 bytes (limit 65536)"
        );
    }

    #[test]
    fn test_invalid_opcode_display() {
        let err = Error::invalid_opcode(0x3);
        assert_eq!(err.to_string(), "Invalid opcode: 0x3");
    }

    #[test]
    fn test_is_framing_error() {
        assert!(Error::TruncatedFrame.is_framing_error());
        assert!(Error::frame_too_large(10, 1).is_framing_error());
        assert!(Error::invalid_opcode(0xB).is_framing_error());
        assert!(!Error::ConnectionClosed.is_framing_error());
    }

    #[test]
    fn test_is_connection_error() {
        let io_err: Error = IoError::new(ErrorKind::BrokenPipe, "pipe").into();

        assert!(Error::ConnectionClosed.is_connection_error());
        assert!(io_err.is_connection_error());
        assert!(!Error::config("test").is_connection_error());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
