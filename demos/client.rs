//! Interactive WebSocket client: lines from stdin are sent as text.
//!
//! Run the echo server first: cargo run --example echo_server
//! Then run: cargo run --example client [-- ws://host:port/path]

use std::error::Error;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;
use wsplex::{Connection, ConnectionState, Event};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:9001/".to_string());
    let conn = Connection::connect(&url).await?;
    println!("connected to {url}, type messages (empty line to quit)");

    let mut events = conn.events();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                Event::Text(text) => println!("< {text}"),
                Event::Binary(data) => println!("< {} bytes", data.len()),
                Event::StateChanged(ConnectionState::Closed) => println!("connection closed"),
                _ => {}
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            break;
        }
        if conn.send_text(line).is_err() {
            break;
        }
    }

    conn.close();
    conn.closed().await;
    let _ = printer.await;
    Ok(())
}
