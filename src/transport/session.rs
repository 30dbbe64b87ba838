//! One live connection after a successful handshake.
//!
//! A [`Session`] owns the outbound half of its stream. Every write goes through
//! a single async mutex, so the read worker, the liveness prober and any
//! application task can send concurrently without interleaving frame bytes.
//!
//! Closing never queues behind a write: the closed flag is raised first, an
//! in-flight write observes it and drops the stream, and the best-effort CLOSE
//! frame is bounded by [`CLOSE_TIMEOUT`].
//!
//! # Lifecycle
//!
//! ```text
//! handshake ok ──► new() ──► register ──► open ──► close() ──► unregister
//!                                           │          ▲
//!                                           └──────────┘
//!                       peer CLOSE / EOF / protocol error / eviction / shutdown
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::time::{Instant, timeout};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::identifiers::SessionId;
use crate::protocol::frame::{CLOSE_NORMAL, close_payload, write_frame};
use crate::protocol::{Message, OpCode, RequestHeaders, UpgradeRequest};

use super::registry::Registry;

// ============================================================================
// Constants
// ============================================================================

/// Upper bound on the CLOSE frame and stream shutdown performed by
/// [`Session::close`].
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

// ============================================================================
// Types
// ============================================================================

/// Type-erased outbound half of a connection.
pub(crate) type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

// ============================================================================
// Session
// ============================================================================

/// Server-side handle for one live connection.
///
/// Shared as `Arc<Session>` between the registry, rooms (by id), the read
/// worker and application code.
pub struct Session {
    /// Registry key, generated at accept time.
    id: SessionId,
    /// Remote address, when the transport has one.
    peer_addr: Option<SocketAddr>,
    /// Upgrade path without query.
    path: String,
    /// Raw upgrade query string.
    query: Option<String>,
    /// Upgrade request headers.
    headers: RequestHeaders,
    /// Serialized write path; `None` once released.
    writer: AsyncMutex<Option<BoxedWriter>>,
    /// `true` once a close has been initiated or observed. Wakes the read
    /// worker and cancels in-flight writes.
    closed: watch::Sender<bool>,
    /// Last time a PONG was seen (seeded at connect).
    last_pong: Mutex<Instant>,
    /// Application key/value bag.
    attributes: RwLock<FxHashMap<String, Value>>,
    /// Owning registry, for room membership.
    registry: Weak<Registry>,
}

impl Session {
    /// Creates an open session from a completed handshake.
    pub(crate) fn new(
        upgrade: UpgradeRequest,
        peer_addr: Option<SocketAddr>,
        writer: BoxedWriter,
        registry: Weak<Registry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: SessionId::generate(),
            peer_addr,
            path: upgrade.path,
            query: upgrade.query,
            headers: upgrade.headers,
            writer: AsyncMutex::new(Some(writer)),
            closed: watch::Sender::new(false),
            last_pong: Mutex::new(Instant::now()),
            attributes: RwLock::new(FxHashMap::default()),
            registry,
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Returns the session ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the remote address.
    #[inline]
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Returns the upgrade request path.
    #[inline]
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the raw upgrade query string.
    #[inline]
    #[must_use]
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns the upgrade request headers.
    #[inline]
    #[must_use]
    pub fn headers(&self) -> &RequestHeaders {
        &self.headers
    }

    /// Returns `true` until a close has been initiated or observed.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        !*self.closed.borrow()
    }

    /// Returns when the peer last answered a probe.
    #[inline]
    #[must_use]
    pub fn last_pong(&self) -> Instant {
        *self.last_pong.lock()
    }

    pub(crate) fn mark_pong(&self) {
        *self.last_pong.lock() = Instant::now();
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    /// Stores a value in the session's key/value bag.
    ///
    /// Returns the previous value for `key`, if any.
    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.attributes.write().insert(key.into(), value.into())
    }

    /// Returns a copy of the value stored under `key`.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<Value> {
        self.attributes.read().get(key).cloned()
    }

    /// Removes and returns the value stored under `key`.
    pub fn remove_attribute(&self, key: &str) -> Option<Value> {
        self.attributes.write().remove(key)
    }

    // ========================================================================
    // Rooms
    // ========================================================================

    /// Joins the named room, creating it on first use.
    ///
    /// Returns `false` if the session is not (or no longer) registered.
    pub fn join_room(&self, room: &str) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.join(self.id, room))
    }

    /// Leaves the named room.
    ///
    /// Returns `true` if the session was a member.
    pub fn leave_room(&self, room: &str) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.leave(self.id, room))
    }

    /// Returns the names of rooms this session currently belongs to.
    #[must_use]
    pub fn rooms(&self) -> Vec<String> {
        self.registry
            .upgrade()
            .map(|registry| registry.rooms_of(self.id))
            .unwrap_or_default()
    }

    // ========================================================================
    // Outbound
    // ========================================================================

    /// Sends a text frame.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the session is closed
    /// - [`Error::Io`] if the write fails; the session is then closed
    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.write(OpCode::Text, text.as_bytes()).await
    }

    /// Sends a binary frame.
    ///
    /// # Errors
    ///
    /// Same as [`send_text`](Self::send_text).
    pub async fn send_binary(&self, data: &[u8]) -> Result<()> {
        self.write(OpCode::Binary, data).await
    }

    /// Sends a text or binary message.
    ///
    /// # Errors
    ///
    /// Same as [`send_text`](Self::send_text).
    pub async fn send(&self, message: &Message) -> Result<()> {
        self.write(message.opcode(), message.as_bytes()).await
    }

    /// Sends an empty PING.
    ///
    /// # Errors
    ///
    /// Same as [`send_text`](Self::send_text).
    pub async fn send_ping(&self) -> Result<()> {
        self.write(OpCode::Ping, &[]).await
    }

    /// Sends a PONG carrying `payload`.
    ///
    /// # Errors
    ///
    /// Same as [`send_text`](Self::send_text).
    pub async fn send_pong(&self, payload: &[u8]) -> Result<()> {
        self.write(OpCode::Pong, payload).await
    }

    /// Closes the session.
    ///
    /// Idempotent. Marks the session closed and wakes the read worker before
    /// touching the stream, so it never waits behind a write to a peer that
    /// stopped reading. Then sends a CLOSE frame and shuts the stream down,
    /// both best-effort and bounded by [`CLOSE_TIMEOUT`].
    pub async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        debug!(session_id = %self.id, "Session closed");

        // An in-flight write sees the flag, drops the stream and unlocks.
        let Ok(mut guard) = timeout(CLOSE_TIMEOUT, self.writer.lock()).await else {
            debug!(session_id = %self.id, "Writer still busy, stream left to in-flight write");
            return;
        };
        let Some(mut writer) = guard.take() else {
            return;
        };
        drop(guard);

        let goodbye = async {
            write_frame(&mut writer, OpCode::Close, &close_payload(CLOSE_NORMAL)).await?;
            writer.shutdown().await?;
            Ok::<(), Error>(())
        };
        match timeout(CLOSE_TIMEOUT, goodbye).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => trace!(session_id = %self.id, error = %e, "Close frame not delivered"),
            Err(_) => debug!(session_id = %self.id, "Close frame timed out, dropping stream"),
        }
    }

    /// Completes once the session has been closed from any task.
    pub(crate) async fn closed(&self) {
        wait_closed(&mut self.closed.subscribe()).await;
    }

    /// Returns `true` while a frame is being written.
    pub(crate) fn is_writing(&self) -> bool {
        self.writer.try_lock().is_err()
    }

    async fn write(&self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(Error::ConnectionClosed);
        }

        let mut guard = tokio::select! {
            guard = self.writer.lock() => guard,
            () = wait_closed(&mut closed) => return Err(Error::ConnectionClosed),
        };
        let writer = guard.as_mut().ok_or(Error::ConnectionClosed)?;

        let written = tokio::select! {
            result = write_frame(writer, opcode, payload) => Some(result),
            () = wait_closed(&mut closed) => None,
        };

        match written {
            Some(Ok(())) => {
                trace!(session_id = %self.id, ?opcode, "Frame sent");
                Ok(())
            }
            Some(Err(e)) => {
                // Peer is gone; drop the stream and let the worker tear down.
                guard.take();
                self.closed.send_replace(true);
                debug!(session_id = %self.id, error = %e, "Write failed, session closed");
                Err(e)
            }
            None => {
                // Closed mid-frame; the stream can no longer be framed.
                guard.take();
                debug!(session_id = %self.id, ?opcode, "Write abandoned, session closed");
                Err(Error::ConnectionClosed)
            }
        }
    }
}

async fn wait_closed(closed: &mut watch::Receiver<bool>) {
    // The sender lives as long as the session, so this only returns once closed.
    let _ = closed.wait_for(|closed| *closed).await;
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("path", &self.path)
            .field("open", &self.is_open())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
