//! Listening server: accept loop, workers and prober.
//!
//! # Task Layout
//!
//! ```text
//! ┌──────────────┐  spawn per connection  ┌───────────────────────┐
//! │ accept loop  │───────────────────────►│ worker (handshake +   │
//! └──────────────┘                        │ dispatch + teardown)  │
//!        │                                └───────────┬───────────┘
//!        │            ┌──────────────┐                │
//!        └───────────►│   Registry   │◄───────────────┘
//!                     └──────▲───────┘
//!                            │ ping / evict
//!                     ┌──────┴───────┐
//!                     │    prober    │
//!                     └──────────────┘
//! ```
//!
//! # Shutdown
//!
//! [`Server::shutdown`] stops the accept loop and prober, then closes every
//! remaining session; workers observe the close and exit on their own.

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ServerBuilder, ServerConfig};
use crate::error::Result;

use super::handler::SessionHandler;
use super::prober::LivenessProber;
use super::registry::Registry;
use super::worker::WorkerContext;

// ============================================================================
// Server
// ============================================================================

/// A running server.
///
/// # Example
///
/// ```ignore
/// use std::sync::Arc;
/// use roomcast::{Message, Server, ServerConfig};
///
/// let server = Server::start(ServerConfig::default(), Arc::new(MyHandler)).await?;
/// println!("Listening on {}", server.ws_url());
///
/// server.registry().broadcast(&Message::from("hello all")).await;
/// server.shutdown().await;
/// ```
pub struct Server {
    /// Bound listener address.
    local_addr: SocketAddr,
    /// State shared with every worker.
    ctx: WorkerContext,
    /// Stops the accept loop and prober.
    shutdown_tx: watch::Sender<bool>,
    /// Accept loop and prober handles.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

// ============================================================================
// Server - Constructor
// ============================================================================

impl Server {
    /// Returns a builder for configuring a server.
    #[inline]
    #[must_use]
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Binds the listener and starts the accept loop and prober.
    ///
    /// The configuration is used as given; use [`Server::builder`] for
    /// validation.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if binding fails.
    pub async fn start(config: ServerConfig, handler: Arc<dyn SessionHandler>) -> Result<Arc<Self>> {
        let listener = TcpListener::bind(config.socket_addr()).await?;
        let local_addr = listener.local_addr()?;
        let ping_interval = config.ping_interval();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ctx = WorkerContext {
            config: Arc::new(config),
            registry: Registry::new(),
            handler,
            shutdown: shutdown_rx.clone(),
        };

        let server = Arc::new(Self {
            local_addr,
            ctx,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        });

        let mut tasks = Vec::with_capacity(2);

        tasks.push(tokio::spawn(
            server.ctx.clone().accept_loop(listener, shutdown_rx.clone()),
        ));

        if let Some(interval) = ping_interval {
            let prober = LivenessProber::new(Arc::clone(&server.ctx.registry), interval);
            tasks.push(tokio::spawn(prober.run(shutdown_rx)));
        }

        *server.tasks.lock() = tasks;

        info!(
            addr = %local_addr,
            path = %server.ctx.config.path,
            ping_interval_ms = server.ctx.config.ping_interval_ms,
            "Server started"
        );

        Ok(server)
    }
}

// ============================================================================
// Server - Public API
// ============================================================================

impl Server {
    /// Returns the bound address.
    #[inline]
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the bound port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Returns the URL clients connect to.
    ///
    /// Format: `ws://{addr}{path}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}{}", self.local_addr, self.ctx.config.path)
    }

    /// Returns the active configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.ctx.config
    }

    /// Returns the session registry and room index.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.ctx.registry
    }

    /// Returns `true` once shutdown has started.
    #[inline]
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Stops accepting, stops probing and closes every session.
    ///
    /// Idempotent.
    pub async fn shutdown(&self) {
        if self.shutdown_tx.send_replace(true) {
            return;
        }

        info!("Server shutting down");

        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task failed");
            }
        }

        self.ctx.registry.close_all().await;

        info!("Server shutdown complete");
    }
}

// ============================================================================
// Accept Loop
// ============================================================================

impl WorkerContext {
    /// Accepts connections and spawns one worker per connection.
    async fn accept_loop(self, listener: TcpListener, mut shutdown: watch::Receiver<bool>) {
        debug!("Accept loop started");

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let ctx = self.clone();
                        tokio::spawn(async move {
                            if let Err(e) = ctx.handle_connection(stream, addr).await {
                                debug!(error = %e, ?addr, "Connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("Accept loop terminated");
    }

    /// Handles a single accepted TCP connection.
    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(?addr, "New TCP connection");

        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();
        self.serve(read_half, write_half, Some(addr)).await
    }
}

// ============================================================================
// Tests
// ============================================================================
