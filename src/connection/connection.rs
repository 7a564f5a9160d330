use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::codec::{FrameReader, FrameWriter, client_handshake};
use crate::config::Config;
use crate::connection::event::{Event, Observers};
use crate::connection::worker::{self, BoxedRead, BoxedWrite, QueueItem};
use crate::connection::{ConnectionState, Role};
use crate::error::{Error, Result};
use crate::message::{CloseCode, Message, Outgoing};
use crate::protocol::{MAX_CONTROL_FRAME_PAYLOAD, OpCode, WsUrl};
use crate::queue::PriorityQueue;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

struct Workers {
    reader: JoinHandle<()>,
    writer: JoinHandle<FrameWriter<BoxedWrite>>,
}

pub(crate) struct Shared {
    id: u64,
    role: Role,
    config: Config,
    peer_addr: Option<SocketAddr>,
    state: watch::Sender<ConnectionState>,
    pub(crate) queue: PriorityQueue<QueueItem>,
    pub(crate) cancel: CancellationToken,
    observers: Observers<Connection, Event>,
    workers: Mutex<Option<Workers>>,
    killed: AtomicBool,
}

/// An established WebSocket connection.
///
/// `Connection` is a cheap handle; clones refer to the same connection.
/// Each connection runs two tasks: a reader that decodes inbound frames and
/// raises [`Event`]s, and a writer that drains a priority send queue. Sends
/// never wait for the network. Use [`flush`](Self::flush) when you need to
/// know queued messages reached the transport.
///
/// ## Example
///
/// ```rust,no_run
/// use wsplex::{Connection, Event};
///
/// # async fn run() -> wsplex::Result<()> {
/// let conn = Connection::connect("ws://127.0.0.1:9001/echo").await?;
/// let mut events = conn.events();
/// conn.send_text("hello")?;
/// while let Some(event) = events.recv().await {
///     if let Event::Text(text) = event {
///         println!("{text}");
///         conn.close();
///     }
/// }
/// # Ok(())
/// # }
/// ```
///
/// ## Notifications
///
/// Handlers run synchronously on the task that produced the event: data and
/// state events from the reader, `MessageSent` from the writer, the final
/// `StateChanged(Closed)` from the shutdown task. Ordering holds per task
/// only; a handler may observe `MessageSent` after a later `StateChanged`.
#[derive(Clone)]
pub struct Connection {
    pub(crate) inner: Arc<Shared>,
}

/// Worker halves of a connection that has not started yet.
pub(crate) struct Pipeline {
    conn: Connection,
    reader: FrameReader<BoxedRead>,
    writer: FrameWriter<BoxedWrite>,
}

impl Pipeline {
    /// Spawn the reader and writer tasks.
    pub(crate) fn start(self) {
        let Pipeline {
            conn,
            reader,
            writer,
        } = self;
        // Held across both spawns so a shutdown racing a fast fault always
        // finds the handles.
        let mut workers = conn.inner.workers.lock();
        *workers = Some(Workers {
            reader: tokio::spawn(worker::read_loop(conn.clone(), reader)),
            writer: tokio::spawn(worker::write_loop(conn.clone(), writer)),
        });
    }
}

impl Connection {
    /// Connect to a `ws://` URL with the client defaults.
    ///
    /// # Errors
    ///
    /// `Error::InvalidUrl` for a malformed or `wss://` URL,
    /// `Error::InvalidHandshake` if the server refuses the upgrade, or
    /// `Error::Io` if the TCP connection fails.
    pub async fn connect(url: &str) -> Result<Connection> {
        Self::connect_with_config(url, Config::client()).await
    }

    /// Connect to a `ws://` URL with an explicit configuration.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub async fn connect_with_config(url: &str, config: Config) -> Result<Connection> {
        let (conn, pipeline) = Self::establish(url, config).await?;
        pipeline.start();
        Ok(conn)
    }

    /// Connect and subscribe `handler` before the workers start, so no
    /// message the server sends right after the upgrade is missed.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub async fn connect_with_handler<F>(url: &str, config: Config, handler: F) -> Result<Connection>
    where
        F: Fn(&Connection, &Event) + Send + Sync + 'static,
    {
        let (conn, pipeline) = Self::establish(url, config).await?;
        conn.subscribe(handler);
        pipeline.start();
        Ok(conn)
    }

    /// Connect and return the connection with an [`events`](Self::events)
    /// channel that was attached before the workers started.
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub async fn connect_with_events(
        url: &str,
        config: Config,
    ) -> Result<(Connection, mpsc::UnboundedReceiver<Event>)> {
        let (sink, rx) = event_sink();
        let conn = Self::connect_with_handler(url, config, sink).await?;
        Ok((conn, rx))
    }

    async fn establish(url: &str, config: Config) -> Result<(Connection, Pipeline)> {
        let url: WsUrl = url.parse()?;
        let tcp = TcpStream::connect((url.host.as_str(), url.port)).await?;
        tcp.set_nodelay(true)?;
        let peer_addr = tcp.peer_addr().ok();

        // The buffered stream carries on into the connection so frames the
        // server sent right behind its 101 response are not lost.
        let mut stream = BufReader::new(tcp);
        client_handshake(&mut stream, &url, &config).await?;
        debug!(url = %url, "connected");

        Ok(Self::prepare(stream, Role::Client, config, peer_addr))
    }

    /// Wrap a stream that has already completed the opening handshake and
    /// start its workers.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn from_stream<S>(stream: S, role: Role, config: Config) -> Connection
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (conn, pipeline) = Self::prepare(stream, role, config, None);
        pipeline.start();
        conn
    }

    /// Build the handle without starting the workers, so callers can
    /// subscribe before the first event can fire.
    pub(crate) fn prepare<S>(
        stream: S,
        role: Role,
        config: Config,
        peer_addr: Option<SocketAddr>,
    ) -> (Connection, Pipeline)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let reader = FrameReader::new(Box::new(read_half) as BoxedRead, role, &config);
        let writer = FrameWriter::new(Box::new(write_half) as BoxedWrite, role, &config);
        let (state, _) = watch::channel(ConnectionState::Open);

        let conn = Connection {
            inner: Arc::new(Shared {
                id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
                role,
                config,
                peer_addr,
                state,
                queue: PriorityQueue::new(),
                cancel: CancellationToken::new(),
                observers: Observers::new(),
                workers: Mutex::new(None),
                killed: AtomicBool::new(false),
            }),
        };
        let pipeline = Pipeline {
            conn: conn.clone(),
            reader,
            writer,
        };
        (conn, pipeline)
    }

    /// Process-unique identifier.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    #[must_use]
    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Remote address, when the connection runs over TCP.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.peer_addr
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Whether application messages may still be sent.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state().can_send()
    }

    /// Queue a message at normal priority.
    ///
    /// # Errors
    ///
    /// - `Error::ConnectionClosed` unless the connection is Open
    /// - `Error::ControlFrameTooLarge` for a control payload over 125 bytes
    pub fn send(&self, message: impl Into<Message>) -> Result<()> {
        self.enqueue(Outgoing::new(message.into()), false)
    }

    /// Queue a message with completion callbacks.
    ///
    /// `on_success` runs after the message is written; `on_fail` runs if it
    /// is discarded unsent. Exactly one of them runs. When this returns
    /// `Err`, neither does.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub fn send_with<S, F>(&self, message: impl Into<Message>, on_success: S, on_fail: F) -> Result<()>
    where
        S: FnOnce() + Send + 'static,
        F: FnOnce() + Send + 'static,
    {
        let mut outgoing = Outgoing::new(message.into());
        outgoing.on_success = Some(Box::new(on_success));
        outgoing.on_fail = Some(Box::new(on_fail));
        self.enqueue(outgoing, false)
    }

    /// Queue a text message.
    ///
    /// # Errors
    ///
    /// `Error::ConnectionClosed` unless the connection is Open.
    pub fn send_text(&self, text: impl Into<String>) -> Result<()> {
        self.send(Message::text(text))
    }

    /// Queue a binary message.
    ///
    /// # Errors
    ///
    /// `Error::ConnectionClosed` unless the connection is Open.
    pub fn send_binary(&self, data: impl Into<Bytes>) -> Result<()> {
        self.send(Message::binary(data))
    }

    /// Queue a Ping. The peer's Pong is accepted and not surfaced.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send).
    pub fn ping(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.send(Message::ping(payload))
    }

    fn enqueue(&self, outgoing: Outgoing, prioritized: bool) -> Result<()> {
        let message = &outgoing.message;
        if message.opcode().is_control() && message.len() > MAX_CONTROL_FRAME_PAYLOAD {
            return Err(Error::ControlFrameTooLarge(message.len()));
        }
        if message.opcode() == OpCode::Close {
            // A hand-built Close still walks the state machine.
            if !self.transition(ConnectionState::Closing) {
                return Err(Error::ConnectionClosed);
            }
            return self.push(outgoing, true);
        }
        if !self.state().can_send() {
            return Err(Error::ConnectionClosed);
        }
        self.push(outgoing, prioritized)
    }

    /// Push without the Open check; used for Close and Pong while Closing.
    pub(crate) fn push(&self, outgoing: Outgoing, prioritized: bool) -> Result<()> {
        let item = QueueItem::Send(outgoing);
        let pushed = if prioritized {
            self.inner.queue.push_prioritized(item)
        } else {
            self.inner.queue.push(item)
        };
        pushed.map_err(|_| Error::ConnectionClosed)
    }

    /// Start the closing handshake with an empty Close frame.
    ///
    /// Uses `Config::close_timeout`, if set, to bound the wait for the peer.
    /// Does nothing unless the connection is Open.
    pub fn close(&self) {
        self.begin_close(Message::close(), self.inner.config.close_timeout);
    }

    /// Start the closing handshake and kill the connection if it has not
    /// reached Closed within `timeout`.
    pub fn close_timeout(&self, timeout: Duration) {
        self.begin_close(Message::close(), Some(timeout));
    }

    /// Start the closing handshake with a status code and reason.
    ///
    /// # Errors
    ///
    /// `Error::ControlFrameTooLarge` if the reason does not fit in a control
    /// frame.
    pub fn close_with(&self, code: CloseCode, reason: &str) -> Result<()> {
        let message = Message::close_with(code, reason);
        if message.len() > MAX_CONTROL_FRAME_PAYLOAD {
            return Err(Error::ControlFrameTooLarge(message.len()));
        }
        self.begin_close(message, self.inner.config.close_timeout);
        Ok(())
    }

    pub(crate) fn begin_close(&self, close: Message, timeout: Option<Duration>) {
        if !self.transition(ConnectionState::Closing) {
            return;
        }
        // The writer flushes and stops after writing a Close.
        if self.push(Outgoing::new(close), true).is_err() {
            self.kill();
            return;
        }
        if let Some(timeout) = timeout {
            let conn = self.clone();
            tokio::spawn(async move {
                tokio::select! {
                    () = tokio::time::sleep(timeout) => {
                        debug!(conn = conn.id(), ?timeout, "close timed out");
                        conn.kill();
                    }
                    () = conn.closed() => {}
                }
            });
        }
    }

    /// Shut the connection down without the closing handshake.
    ///
    /// Cancels both workers and waits for them on a separate task, so this
    /// is safe to call from an event handler. Idempotent.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn kill(&self) {
        if self.inner.killed.swap(true, Ordering::AcqRel) {
            return;
        }
        trace!(conn = self.id(), "killing connection");
        self.inner.cancel.cancel();
        let conn = self.clone();
        tokio::spawn(async move { conn.shutdown().await });
    }

    async fn shutdown(self) {
        let workers = self.inner.workers.lock().take();
        if let Some(Workers { reader, writer }) = workers {
            let _ = reader.await;
            if let Ok(mut writer) = writer.await {
                let _ = writer.shutdown().await;
            }
        }
        // Covers a pipeline that never started.
        worker::fail_pending(&self.inner.queue);
        self.transition(ConnectionState::Closed);
    }

    /// Wait until everything queued before this call has been written and
    /// flushed to the transport.
    ///
    /// # Errors
    ///
    /// `Error::ConnectionClosed` if the writer stops first.
    pub async fn flush(&self) -> Result<()> {
        let (done, flushed) = oneshot::channel();
        self.inner
            .queue
            .push(QueueItem::Flush(done))
            .map_err(|_| Error::ConnectionClosed)?;
        flushed.await.map_err(|_| Error::ConnectionClosed)
    }

    /// Resolve once the connection reaches Closed.
    pub async fn closed(&self) {
        let mut state = self.inner.state.subscribe();
        let _ = state.wait_for(|s| s.is_closed()).await;
    }

    /// Register a callback for every future event.
    pub fn subscribe<F>(&self, handler: F)
    where
        F: Fn(&Connection, &Event) + Send + Sync + 'static,
    {
        self.inner.observers.add(handler);
    }

    /// Stream of future events as an unbounded channel.
    ///
    /// The channel yields `None` once the connection has closed and the
    /// final `StateChanged(Closed)` has been delivered.
    pub fn events(&self) -> mpsc::UnboundedReceiver<Event> {
        let (sink, rx) = event_sink();
        self.subscribe(sink);
        rx
    }

    pub(crate) fn dispatch(&self, event: &Event) {
        self.inner.observers.dispatch(self, event);
    }

    /// Move to `next` if the state machine allows it and announce it.
    pub(crate) fn transition(&self, next: ConnectionState) -> bool {
        let moved = self.inner.state.send_if_modified(|state| {
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                false
            }
        });
        if moved {
            trace!(conn = self.id(), state = %next, "state changed");
            self.dispatch(&Event::StateChanged(next));
        }
        moved
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Connection {}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("role", &self.inner.role)
            .field("state", &self.state())
            .field("peer_addr", &self.inner.peer_addr)
            .finish()
    }
}

/// Handler that forwards events into a channel and hangs up after Closed.
fn event_sink() -> (
    impl Fn(&Connection, &Event) + Send + Sync + 'static,
    mpsc::UnboundedReceiver<Event>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let slot = Mutex::new(Some(tx));
    let sink = move |_: &Connection, event: &Event| {
        let mut slot = slot.lock();
        if let Some(tx) = slot.as_ref() {
            if tx.send(event.clone()).is_err()
                || matches!(event, Event::StateChanged(ConnectionState::Closed))
            {
                *slot = None;
            }
        }
    };
    (sink, rx)
}
