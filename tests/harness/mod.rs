//! Shared helpers for the loopback integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedReceiver;
use wsplex::{Config, Connection, Event, ReceiverRegistry, Server, ServerEvent};

/// Upper bound for anything a test waits on.
pub const TIMEOUT: Duration = Duration::from_secs(10);

/// Poll `cond` until it holds or [`TIMEOUT`] passes.
pub async fn wait_until<F: FnMut() -> bool>(mut cond: F) -> bool {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}

/// Server on an ephemeral port with its own registry.
pub fn start_server(path: &str) -> Server {
    let server = Server::builder(0)
        .path(path)
        .registry(Arc::new(ReceiverRegistry::new()))
        .build();
    server.start().expect("server start");
    server
}

/// Server that sends every text and binary message back to its sender.
pub fn start_echo_server(path: &str) -> Server {
    let server = start_server(path);
    server.subscribe(|_, event| match event {
        ServerEvent::Text(conn, text) => {
            let _ = conn.send_text(text.clone());
        }
        ServerEvent::Binary(conn, data) => {
            let _ = conn.send_binary(data.clone());
        }
        _ => {}
    });
    server
}

pub fn url(server: &Server, path: &str) -> String {
    format!("ws://127.0.0.1:{}{}", server.port(), path)
}

/// Client connection plus its event stream.
pub struct TestClient {
    pub conn: Connection,
    events: UnboundedReceiver<Event>,
}

impl TestClient {
    pub async fn connect(url: &str) -> TestClient {
        let (conn, events) =
            tokio::time::timeout(TIMEOUT, Connection::connect_with_events(url, Config::client()))
                .await
                .expect("connect timed out")
                .expect("connect failed");
        TestClient { conn, events }
    }

    /// Next text or binary delivery, skipping other events.
    pub async fn next_message(&mut self) -> Event {
        loop {
            let event = tokio::time::timeout(TIMEOUT, self.events.recv())
                .await
                .expect("timed out waiting for a message")
                .expect("event stream ended");
            if matches!(event, Event::Text(_) | Event::Binary(_)) {
                return event;
            }
        }
    }

    pub async fn next_text(&mut self) -> String {
        match self.next_message().await {
            Event::Text(text) => text,
            other => panic!("expected text, got {other:?}"),
        }
    }

    pub async fn next_binary(&mut self) -> Vec<u8> {
        match self.next_message().await {
            Event::Binary(data) => data,
            other => panic!("expected binary, got {other:?}"),
        }
    }

    /// Remaining events up to and including the close.
    pub async fn drain(mut self) -> Vec<Event> {
        let mut rest = Vec::new();
        while let Ok(Some(event)) = tokio::time::timeout(TIMEOUT, self.events.recv()).await {
            rest.push(event);
        }
        rest
    }
}
