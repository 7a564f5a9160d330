//! WebSocket echo server.
//!
//! Run with: cargo run --example echo_server
//! Then connect with: cargo run --example client

use std::error::Error;

use tracing::info;
use tracing_subscriber::EnvFilter;
use wsplex::{Connection, Server, ServerHandler};

const PORT: u16 = 9001;

struct Echo;

impl ServerHandler for Echo {
    fn on_client_connected(&self, _server: &Server, conn: &Connection) {
        info!(conn = conn.id(), peer = ?conn.peer_addr(), "client connected");
    }

    fn on_text_received(&self, _server: &Server, conn: &Connection, text: &str) {
        let _ = conn.send_text(text);
    }

    fn on_binary_received(&self, _server: &Server, conn: &Connection, data: &[u8]) {
        let _ = conn.send_binary(data.to_vec());
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let server = Server::builder(PORT).handler(Echo).build();
    server.start()?;
    info!("echo server listening on ws://127.0.0.1:{PORT}/");

    tokio::signal::ctrl_c().await?;
    info!(connections = server.connection_count(), "shutting down");
    server.close_timeout(std::time::Duration::from_secs(2));
    server.closed().await;
    Ok(())
}
