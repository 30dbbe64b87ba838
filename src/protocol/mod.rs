//! Wire protocol: handshake and frame codec.
//!
//! Everything in this module is I/O-policy free: functions read from or write
//! to whatever stream they are given and keep no state between calls.
//!
//! # Protocol Overview
//!
//! | Step | Direction | Format |
//! |------|-----------|--------|
//! | Upgrade request | Client → Server | `GET <path> HTTP/1.1` + headers |
//! | Upgrade response | Server → Client | `101` / `404` / `400` |
//! | Frames | Both | `FIN/opcode`, `MASK/len`, ext len, mask, payload |
//!
//! # Opcodes
//!
//! | Opcode | Value | Handling |
//! |--------|-------|----------|
//! | Text | `0x1` | delivered as `String` |
//! | Binary | `0x2` | delivered as bytes |
//! | Close | `0x8` | ends the read loop |
//! | Ping | `0x9` | answered with Pong |
//! | Pong | `0xA` | refreshes liveness |
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `frame` | Frame decode/encode |
//! | `handshake` | Upgrade negotiation |
//! | `message` | Application message type |
//! | `opcode` | Opcode enum |

// ============================================================================
// Submodules
// ============================================================================

/// Frame decode/encode.
pub mod frame;

/// Upgrade handshake.
pub mod handshake;

/// Text/binary message type.
pub mod message;

/// Frame opcodes.
pub mod opcode;

// ============================================================================
// Re-exports
// ============================================================================

pub use frame::{Frame, apply_mask, encode_frame, read_frame, write_frame};
pub use handshake::{RequestHeaders, UpgradeRequest, accept_token};
pub use message::Message;
pub use opcode::OpCode;
