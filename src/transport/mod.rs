//! Connection transport layer.
//!
//! This module owns everything with a lifetime longer than one frame: the
//! listener, per-connection workers, sessions, the registry and the prober.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                              ┌─────────────────┐
//! │  Client         │         TCP + frames         │  Server         │
//! │                 │◄────────────────────────────►│  → Worker       │
//! │                 │        ws://host:PORT/ws     │  → Session      │
//! └─────────────────┘                              └─────────────────┘
//! ```
//!
//! # Connection Lifecycle
//!
//! 1. `Server::start` - Bind listener, spawn accept loop and prober
//! 2. Accept loop spawns a worker per TCP connection
//! 3. Worker runs the handshake, registers a `Session`, calls `on_connect`
//! 4. Worker dispatches frames until CLOSE, EOF, protocol error or local close
//! 5. Worker unregisters, closes the session and calls `on_close`
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `handler` | Application callback trait |
//! | `prober` | Periodic PING and dead-peer eviction |
//! | `registry` | Session table and room index |
//! | `server` | Listener and accept loop |
//! | `session` | One live connection |
//! | `worker` | Per-connection handshake and dispatch |

// ============================================================================
// Submodules
// ============================================================================

/// Application callback trait.
pub mod handler;

/// Periodic liveness probing.
pub mod prober;

/// Session table and room index.
pub mod registry;

/// Listener and accept loop.
pub mod server;

/// One live connection.
pub mod session;

/// Per-connection worker.
mod worker;

// ============================================================================
// Re-exports
// ============================================================================

pub use handler::SessionHandler;
pub use prober::{LivenessProber, ProbeReport};
pub use registry::Registry;
pub use server::Server;
pub use session::Session;
