//! Per-connection worker.
//!
//! One worker drives exactly one connection: handshake, registration, the
//! sequential inbound dispatch loop, and teardown. Frames on a connection are
//! processed strictly in arrival order.
//!
//! # Dispatch
//!
//! | Opcode | Action |
//! |--------|--------|
//! | Text | `on_text` with the payload decoded as UTF-8 (lossy) |
//! | Binary | `on_binary` |
//! | Close | leave the loop, no reply from dispatch itself |
//! | Ping | reply Pong with the same payload |
//! | Pong | refresh `last_pong` |
//! | Continuation | logged, not reassembled |

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, BufReader, BufWriter};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::protocol::{Frame, OpCode, handshake, read_frame};

use super::handler::{SessionHandler, guarded};
use super::registry::Registry;
use super::session::Session;

// ============================================================================
// WorkerContext
// ============================================================================

/// Shared state every connection worker needs.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) handler: Arc<dyn SessionHandler>,
    pub(crate) shutdown: watch::Receiver<bool>,
}

impl WorkerContext {
    /// Serves one connection until it closes.
    ///
    /// Returns `Err` for handshake rejections and fatal framing or transport
    /// errors; teardown has already run when this returns after registration.
    pub(crate) async fn serve<R, W>(
        &self,
        reader: R,
        writer: W,
        peer_addr: Option<SocketAddr>,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut reader = BufReader::new(reader);
        let mut writer = BufWriter::new(writer);

        let upgrade = handshake::negotiate(
            &mut reader,
            &mut writer,
            &self.config.path,
            self.config.max_handshake_bytes,
        )
        .await?;

        let session = Session::new(
            upgrade,
            peer_addr,
            Box::new(writer),
            Arc::downgrade(&self.registry),
        );
        self.registry.register(Arc::clone(&session));

        // Accepted while shutdown drained the registry.
        if *self.shutdown.borrow() {
            self.teardown(&session).await;
            return Ok(());
        }

        info!(session_id = %session.id(), ?peer_addr, "Session opened");

        if let Err(e) = guarded(self.handler.on_connect(&session)).await {
            self.handler.on_error(&session, &e).await;
        }

        let outcome = self.dispatch_loop(&session, &mut reader).await;
        if let Err(ref e) = outcome {
            warn!(session_id = %session.id(), error = %e, "Connection terminated");
        }

        self.teardown(&session).await;
        outcome
    }

    /// Unregisters, closes and notifies exactly once per session.
    async fn teardown(&self, session: &Arc<Session>) {
        self.registry.unregister(session.id());
        session.close().await;
        self.handler.on_close(session).await;
        info!(session_id = %session.id(), "Session ended");
    }

    async fn dispatch_loop<R>(&self, session: &Arc<Session>, reader: &mut R) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
    {
        let max_frame_size = self.config.max_frame_size;

        while session.is_open() {
            let frame = tokio::select! {
                result = read_frame(reader, max_frame_size) => result?,
                () = session.closed() => {
                    debug!(session_id = %session.id(), "Session closed locally");
                    return Ok(());
                }
            };

            let Some(frame) = frame else {
                debug!(session_id = %session.id(), "Stream ended");
                return Ok(());
            };

            if !self.dispatch(session, frame).await? {
                return Ok(());
            }
        }

        Ok(())
    }

    /// Handles one frame. Returns `false` when the read side is finished.
    async fn dispatch(&self, session: &Arc<Session>, frame: Frame) -> Result<bool> {
        match frame.opcode {
            OpCode::Text => {
                let text = String::from_utf8_lossy(&frame.payload).into_owned();
                self.invoke(session, self.handler.on_text(session, text))
                    .await;
            }
            OpCode::Binary => {
                self.invoke(session, self.handler.on_binary(session, frame.payload))
                    .await;
            }
            OpCode::Close => {
                debug!(session_id = %session.id(), code = ?frame.close_code(), "Close received");
                return Ok(false);
            }
            OpCode::Ping => match session.send_pong(&frame.payload).await {
                Ok(()) => {}
                // Closed locally since the read; nothing left to answer.
                Err(Error::ConnectionClosed) => return Ok(false),
                Err(e) => return Err(e),
            },
            OpCode::Pong => {
                trace!(session_id = %session.id(), "Pong received");
                session.mark_pong();
            }
            OpCode::Continuation => {
                debug!(
                    session_id = %session.id(),
                    length = frame.payload.len(),
                    "Continuation frame ignored"
                );
            }
        }

        Ok(true)
    }

    async fn invoke<F>(&self, session: &Arc<Session>, callback: F)
    where
        F: Future<Output = Result<()>>,
    {
        if let Err(e) = guarded(callback).await {
            self.handler.on_error(session, &e).await;
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
