//! Chat room echo server.
//!
//! Demonstrates:
//! - Starting a server through the builder
//! - Joining a room on connect, keyed by the `room` query parameter
//! - Relaying text to the rest of the room
//! - Echoing binary back to the sender
//! - Per-session attributes
//!
//! Usage:
//!   cargo run --example echo_server
//!   cargo run --example echo_server -- --debug
//!   cargo run --example echo_server -- --port 9001
//!
//! Then connect with any WebSocket client to `ws://127.0.0.1:9000/ws?room=lobby`.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use roomcast::{Message, Registry, Result, Server, Session, SessionHandler};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Constants
// ============================================================================

const DEFAULT_PORT: u16 = 9000;
const DEFAULT_ROOM: &str = "lobby";

// ============================================================================
// Args
// ============================================================================

#[derive(Debug, Clone)]
struct Args {
    debug: bool,
    port: u16,
}

impl Args {
    fn parse() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let port = args
            .iter()
            .position(|a| a == "--port")
            .and_then(|i| args.get(i + 1))
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        Self {
            debug: args.iter().any(|a| a == "--debug"),
            port,
        }
    }
}

fn init_logging(debug: bool) {
    let filter = if debug {
        "roomcast=debug,echo_server=debug"
    } else {
        "roomcast=info,echo_server=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .init();
}

// ============================================================================
// Handler
// ============================================================================

struct ChatRoom {
    registry: OnceLock<Arc<Registry>>,
}

impl ChatRoom {
    fn room_of(session: &Session) -> String {
        session
            .attribute("room")
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_else(|| DEFAULT_ROOM.to_string())
    }
}

#[async_trait]
impl SessionHandler for ChatRoom {
    async fn on_connect(&self, session: &Arc<Session>) -> Result<()> {
        let room = session
            .query()
            .into_iter()
            .flat_map(|q| q.split('&'))
            .find_map(|pair| pair.strip_prefix("room="))
            .filter(|name| !name.is_empty())
            .unwrap_or(DEFAULT_ROOM)
            .to_string();

        session.set_attribute("room", room.clone());
        session.set_attribute("joined", json!({ "peer": session.peer_addr().map(|a| a.to_string()) }));
        session.join_room(&room);

        info!(session_id = %session.id(), room = %room, "Joined");
        session.send_text(&format!("welcome to {room}")).await
    }

    async fn on_text(&self, session: &Arc<Session>, text: String) -> Result<()> {
        let Some(registry) = self.registry.get() else {
            return Ok(());
        };

        let room = Self::room_of(session);
        let line = Message::Text(format!("{}: {text}", session.id()));
        let delivered = registry
            .broadcast_to_room_except(&room, &line, session.id())
            .await;

        info!(session_id = %session.id(), room = %room, delivered, "Relayed");
        Ok(())
    }

    async fn on_binary(&self, session: &Arc<Session>, data: Vec<u8>) -> Result<()> {
        session.send_binary(&data).await
    }

    async fn on_close(&self, session: &Arc<Session>) {
        info!(session_id = %session.id(), room = %Self::room_of(session), "Left");
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug);

    if let Err(e) = run(args).await {
        eprintln!("\n[ERROR] {e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    println!("=== Echo Server ===\n");

    let handler = Arc::new(ChatRoom {
        registry: OnceLock::new(),
    });

    let server = Server::builder()
        .port(args.port)
        .path("/ws")
        .ping_interval_ms(10_000)
        .start(Arc::clone(&handler) as Arc<dyn SessionHandler>)
        .await?;

    let _ = handler.registry.set(Arc::clone(server.registry()));

    println!("Listening on {}", server.ws_url());
    println!("Press Ctrl+C to exit...");
    tokio::signal::ctrl_c().await.ok();

    server.shutdown().await;
    println!("Stopped");
    Ok(())
}
