//! Message delivery over loopback TCP.

mod harness;

use std::collections::HashSet;
use std::sync::Arc;

use harness::{TestClient, start_echo_server, start_server, url, wait_until};
use parking_lot::Mutex;
use tokio::task::JoinSet;
use wsplex::{Config, Connection, Event, ReceiverRegistry, Server, ServerEvent};

/// Payload sizes covering every length class.
const SIZES: [usize; 8] = [0, 5, 125, 126, 1000, 65535, 65536, 70_000];

fn payload(seed: usize, len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + seed) % 256) as u8).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_client_to_server_delivery() {
    let server = start_server("/");
    let received = Arc::new(Mutex::new(Vec::new()));
    {
        let received = received.clone();
        server.subscribe(move |_, event| match event {
            ServerEvent::Text(_, text) => received.lock().push(text.clone().into_bytes()),
            ServerEvent::Binary(_, data) => received.lock().push(data.clone()),
            _ => {}
        });
    }

    let client = TestClient::connect(&url(&server, "/")).await;
    let mut expected = Vec::new();
    for (i, len) in SIZES.iter().enumerate() {
        let data = payload(i, *len);
        client.conn.send_binary(data.clone()).unwrap();
        expected.push(data);

        let text = "t".repeat(*len);
        client.conn.send_text(text.clone()).unwrap();
        expected.push(text.into_bytes());
    }
    client.conn.flush().await.unwrap();

    assert!(wait_until(|| received.lock().len() == expected.len()).await);
    assert_eq!(*received.lock(), expected);

    client.conn.close();
    client.conn.closed().await;
    server.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_echo_round_trip_every_length_class() {
    let server = start_echo_server("/echo");
    let mut client = TestClient::connect(&url(&server, "/echo")).await;

    for (i, len) in SIZES.iter().enumerate() {
        let data = payload(i, *len);
        client.conn.send_binary(data.clone()).unwrap();
        assert_eq!(client.next_binary().await, data);
    }

    let text = "ü".repeat(40_000);
    client.conn.send_text(text.clone()).unwrap();
    assert_eq!(client.next_text().await, text);

    client.conn.close();
    client.conn.closed().await;
    server.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_server_to_client_ordering() {
    const N: usize = 200;
    let server = start_server("/");
    let mut client = TestClient::connect(&url(&server, "/")).await;
    assert!(wait_until(|| server.connection_count() == 1).await);

    let conn = server.connections().remove(0);
    for i in 0..N {
        conn.send_text(format!("message {i}")).unwrap();
    }
    for i in 0..N {
        assert_eq!(client.next_text().await, format!("message {i}"));
    }

    client.conn.close();
    client.conn.closed().await;
    server.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fragmented_messages_reassemble() {
    let registry = Arc::new(ReceiverRegistry::new());
    let server = Server::builder(0)
        .registry(registry)
        .config(Config::server().with_fragment_size(1000))
        .build();
    server.subscribe(|_, event| {
        if let ServerEvent::Binary(conn, data) = event {
            let _ = conn.send_binary(data.clone());
        }
    });
    server.start().unwrap();

    let config = Config::client().with_fragment_size(777);
    let conn = Connection::connect_with_config(&url(&server, "/"), config)
        .await
        .unwrap();
    let mut events = conn.events();

    let data = payload(7, 100_000);
    conn.send_binary(data.clone()).unwrap();
    let echoed = loop {
        match tokio::time::timeout(harness::TIMEOUT, events.recv()).await.unwrap() {
            Some(Event::Binary(echoed)) => break echoed,
            Some(_) => continue,
            None => panic!("connection closed early"),
        }
    };
    assert_eq!(echoed, data);

    conn.close();
    conn.closed().await;
    server.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_broadcast_reaches_every_client() {
    const K: usize = 5;
    const M: usize = 20;
    let server = start_server("/");

    let mut clients = Vec::new();
    for _ in 0..K {
        clients.push(TestClient::connect(&url(&server, "/")).await);
    }
    assert!(wait_until(|| server.connection_count() == K).await);

    for m in 0..M {
        assert_eq!(server.broadcast(format!("news {m}")).unwrap(), K);
    }
    server.flush().await;

    let mut set = JoinSet::new();
    for mut client in clients {
        set.spawn(async move {
            let mut seen = HashSet::new();
            for _ in 0..M {
                seen.insert(client.next_text().await);
            }
            client.conn.close();
            client.conn.closed().await;
            seen
        });
    }
    while let Some(seen) = set.join_next().await {
        let seen = seen.unwrap();
        let expected: HashSet<_> = (0..M).map(|m| format!("news {m}")).collect();
        assert_eq!(seen, expected);
    }

    assert!(wait_until(|| server.connection_count() == 0).await);
    server.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_clients_echo() {
    let server = start_echo_server("/");
    let address = url(&server, "/");

    let mut set = JoinSet::new();
    for id in 0..20 {
        let address = address.clone();
        set.spawn(async move {
            let mut client = TestClient::connect(&address).await;
            for n in 0..10 {
                let text = format!("client {id} message {n}");
                client.conn.send_text(text.clone()).unwrap();
                assert_eq!(client.next_text().await, text);
            }
            client.conn.close();
            client.conn.closed().await;
        });
    }
    while let Some(result) = set.join_next().await {
        result.unwrap();
    }

    assert!(wait_until(|| server.connection_count() == 0).await);
    server.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_ping_is_answered_silently() {
    let server = start_echo_server("/");
    let mut client = TestClient::connect(&url(&server, "/")).await;

    client.conn.ping(&b"are you there"[..]).unwrap();
    client.conn.send_text("after ping").unwrap();
    assert_eq!(client.next_text().await, "after ping");

    client.conn.close();
    client.conn.closed().await;
    server.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_greeting_sent_on_connect_is_not_lost() {
    let server = start_server("/");
    server.subscribe(|_, event| {
        if let ServerEvent::ClientConnected(conn) = event {
            let _ = conn.send_text("welcome");
        }
    });

    let greetings = Arc::new(Mutex::new(Vec::new()));
    let conn = {
        let greetings = greetings.clone();
        Connection::connect_with_handler(&url(&server, "/"), Config::client(), move |_, event| {
            if let Event::Text(text) = event {
                greetings.lock().push(text.clone());
            }
        })
        .await
        .unwrap()
    };
    assert!(wait_until(|| !greetings.lock().is_empty()).await);
    assert_eq!(*greetings.lock(), vec!["welcome".to_string()]);

    conn.close();
    conn.closed().await;
    server.close();
}
