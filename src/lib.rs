//! roomcast - Hand-rolled WebSocket server with rooms and liveness probing.
//!
//! This library implements the server side of the WebSocket wire protocol from
//! first principles (upgrade handshake, frame codec, masking, control frames)
//! and layers per-connection sessions, named rooms and dead-peer eviction on
//! top.
//!
//! # Architecture
//!
//! - **Protocol**: pure handshake and frame codec functions, no I/O policy
//! - **Session**: one live connection with a single serialized write path
//! - **Registry**: all live sessions plus rooms that reference them by id
//! - **Server**: accept loop, one worker task per connection, liveness prober
//!
//! Application code plugs in through [`SessionHandler`] and the
//! [`Registry`] / [`Session`] APIs; nothing else is exposed to it.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use roomcast::{Message, Result, Server, Session, SessionHandler};
//!
//! struct Chat;
//!
//! #[async_trait]
//! impl SessionHandler for Chat {
//!     async fn on_connect(&self, session: &Arc<Session>) -> Result<()> {
//!         session.join_room("lobby");
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let server = Server::builder()
//!         .port(9000)
//!         .path("/ws")
//!         .start(Arc::new(Chat))
//!         .await?;
//!
//!     server
//!         .registry()
//!         .broadcast_to_room("lobby", &Message::from("hi"))
//!         .await;
//!
//!     server.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`config`] | [`ServerConfig`] and [`ServerBuilder`] |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Handshake and frame codec |
//! | [`transport`] | Server, sessions, registry, prober |
//!
//! # Limitations
//!
//! - Single-frame messages only: continuation frames are decoded but not
//!   reassembled
//! - No per-message compression, TLS, or back-pressure on slow consumers

// ============================================================================
// Modules
// ============================================================================

/// Server configuration.
///
/// Use [`Server::builder()`] to create a validated configuration.
pub mod config;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Handshake and frame codec.
pub mod protocol;

/// Server, sessions, registry and prober.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Config types
pub use config::{ServerBuilder, ServerConfig};

// Error types
pub use error::{Error, Result};

// Identifier types
pub use identifiers::SessionId;

// Protocol types
pub use protocol::{Frame, Message, OpCode, RequestHeaders};

// Transport types
pub use transport::{
    LivenessProber, ProbeReport, Registry, Server, Session, SessionHandler,
};
