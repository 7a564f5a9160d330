//! Two chat rooms sharing one port.
//!
//! Run with: cargo run --example chat_server
//! Join a room with: cargo run --example client -- ws://127.0.0.1:9002/lobby

use std::error::Error;

use tracing::info;
use tracing_subscriber::EnvFilter;
use wsplex::{Connection, ConnectionState, Server, ServerHandler};

const PORT: u16 = 9002;

struct Room;

impl ServerHandler for Room {
    fn on_client_connected(&self, server: &Server, conn: &Connection) {
        let _ = conn.send_text(format!(
            "welcome to {}, {} here",
            server.path(),
            server.connection_count()
        ));
        let _ = server.broadcast(format!("user {} joined", conn.id()));
    }

    fn on_state_changed(&self, server: &Server, conn: &Connection, state: ConnectionState) {
        if state == ConnectionState::Closed {
            let _ = server.broadcast(format!("user {} left", conn.id()));
        }
    }

    fn on_text_received(&self, server: &Server, conn: &Connection, text: &str) {
        info!(room = server.path(), user = conn.id(), %text, "message");
        let _ = server.broadcast(format!("{}: {text}", conn.id()));
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let rooms: Vec<Server> = ["/lobby", "/random"]
        .into_iter()
        .map(|path| Server::builder(PORT).path(path).handler(Room).build())
        .collect();
    for room in &rooms {
        room.start()?;
        info!("room open at ws://127.0.0.1:{PORT}{}", room.path());
    }

    tokio::signal::ctrl_c().await?;
    for room in &rooms {
        room.close();
    }
    for room in &rooms {
        room.closed().await;
    }
    Ok(())
}
