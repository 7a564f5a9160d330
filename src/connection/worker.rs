//! The reader and writer tasks behind every [`Connection`].

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use crate::codec::{FrameReader, FrameWriter};
use crate::config::Limits;
use crate::connection::{Connection, ConnectionState, Event};
use crate::error::{Error, Result};
use crate::message::{CloseCode, Message, Outgoing};
use crate::protocol::{Frame, OpCode};
use crate::queue::PriorityQueue;

pub(crate) type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
pub(crate) type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Entry in a connection's send queue.
#[derive(Debug)]
pub(crate) enum QueueItem {
    Send(Outgoing),
    /// Flush the transport, then signal.
    Flush(oneshot::Sender<()>),
}

/// Close the queue and run `on_fail` for everything left in it.
pub(crate) fn fail_pending(queue: &PriorityQueue<QueueItem>) {
    for item in queue.close() {
        if let QueueItem::Send(mut outgoing) = item {
            outgoing.fail();
        }
    }
}

/// Whether the writer may put `opcode` on the wire in `state`.
fn writable(state: ConnectionState, opcode: OpCode) -> bool {
    match state {
        ConnectionState::Open => true,
        ConnectionState::Closing => matches!(opcode, OpCode::Close | OpCode::Pong),
        ConnectionState::Closed => false,
    }
}

pub(crate) async fn write_loop(
    conn: Connection,
    mut writer: FrameWriter<BoxedWrite>,
) -> FrameWriter<BoxedWrite> {
    let cancel = conn.inner.cancel.clone();
    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            item = conn.inner.queue.pop() => match item {
                Some(item) => item,
                None => break,
            },
        };

        match item {
            QueueItem::Flush(done) => {
                if let Err(err) = writer.flush().await {
                    debug!(conn = conn.id(), %err, "flush failed");
                    conn.kill();
                    break;
                }
                let _ = done.send(());
            }
            QueueItem::Send(mut outgoing) => {
                let opcode = outgoing.message.opcode();
                if !writable(conn.state(), opcode) {
                    trace!(conn = conn.id(), %opcode, "dropping message after close");
                    outgoing.fail();
                    continue;
                }

                let written = writer
                    .write_message(opcode, outgoing.message.payload())
                    .await;
                if let Err(err) = written {
                    debug!(conn = conn.id(), %err, "write failed");
                    outgoing.fail();
                    conn.kill();
                    break;
                }

                conn.dispatch(&Event::MessageSent(outgoing.message.clone()));
                outgoing.succeed();

                if opcode == OpCode::Close {
                    if let Err(err) = writer.flush().await {
                        debug!(conn = conn.id(), %err, "flush after close failed");
                        conn.kill();
                    }
                    break;
                }
            }
        }
    }

    fail_pending(&conn.inner.queue);
    trace!(conn = conn.id(), "writer stopped");
    writer
}

/// Data message being reassembled from fragments.
#[derive(Debug, Default)]
struct Assembly {
    opcode: Option<OpCode>,
    buf: Vec<u8>,
}

impl Assembly {
    fn in_progress(&self) -> bool {
        self.opcode.is_some()
    }

    fn begin(&mut self, opcode: OpCode, payload: Vec<u8>) {
        self.opcode = Some(opcode);
        self.buf = payload;
    }

    fn append(&mut self, payload: &[u8], limits: &Limits) -> Result<()> {
        limits.check_message_size(self.buf.len() + payload.len())?;
        self.buf.extend_from_slice(payload);
        Ok(())
    }

    fn take(&mut self) -> Option<(OpCode, Vec<u8>)> {
        let opcode = self.opcode.take()?;
        Some((opcode, std::mem::take(&mut self.buf)))
    }

    fn clear(&mut self) {
        self.opcode = None;
        self.buf = Vec::new();
    }
}

/// What the reader does after handling one frame.
enum Flow {
    Continue,
    Stop,
}

pub(crate) async fn read_loop(conn: Connection, mut reader: FrameReader<BoxedRead>) {
    let cancel = conn.inner.cancel.clone();
    let limits = conn.config().limits.clone();
    let mut assembly = Assembly::default();

    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            frame = reader.read_frame() => frame,
        };

        let flow = match frame {
            Ok(frame) => on_frame(&conn, &mut assembly, &limits, frame),
            Err(err) => on_error(&conn, err),
        };
        if let Flow::Stop = flow {
            break;
        }
    }
    trace!(conn = conn.id(), "reader stopped");
}

fn on_error(conn: &Connection, err: Error) -> Flow {
    match err {
        // The payload was consumed, so the stream is still aligned and the
        // closing handshake can run.
        Error::ReservedOpcode(_) | Error::ProtocolViolation(_) | Error::ControlFrameTooLarge(_) => {
            warn!(conn = conn.id(), %err, "protocol error");
            fail(conn, CloseCode::ProtocolError, "protocol error");
            Flow::Continue
        }
        Error::Io(_) => {
            debug!(conn = conn.id(), %err, "transport closed");
            conn.kill();
            Flow::Stop
        }
        _ => {
            warn!(conn = conn.id(), %err, "fatal frame error");
            conn.kill();
            Flow::Stop
        }
    }
}

/// Start a graceful close with `code`, or kill if closing already.
fn fail(conn: &Connection, code: CloseCode, reason: &str) {
    if conn.state() == ConnectionState::Open {
        conn.begin_close(Message::close_with(code, reason), conn.config().close_timeout);
    } else {
        conn.kill();
    }
}

fn on_frame(conn: &Connection, assembly: &mut Assembly, limits: &Limits, frame: Frame) -> Flow {
    let fin = frame.fin;
    match frame.opcode {
        OpCode::Text | OpCode::Binary => {
            // A new data frame abandons any unfinished fragmented message.
            if assembly.in_progress() {
                debug!(conn = conn.id(), "discarding unfinished fragmented message");
                assembly.clear();
            }
            let opcode = frame.opcode;
            if fin {
                deliver(conn, limits, opcode, frame.into_payload());
            } else if let Err(err) = limits.check_message_size(frame.payload().len()) {
                too_big(conn, &err);
            } else {
                assembly.begin(opcode, frame.into_payload());
            }
        }
        OpCode::Continuation => {
            if !assembly.in_progress() {
                warn!(conn = conn.id(), "continuation without a started message");
                fail(conn, CloseCode::ProtocolError, "unexpected continuation frame");
                return Flow::Continue;
            }
            if let Err(err) = assembly.append(frame.payload(), limits) {
                assembly.clear();
                too_big(conn, &err);
                return Flow::Continue;
            }
            if fin {
                if let Some((opcode, payload)) = assembly.take() {
                    deliver(conn, limits, opcode, payload);
                }
            }
        }
        OpCode::Ping => {
            let pong = Outgoing::new(Message::pong(frame.into_payload()));
            if conn.push(pong, true).is_err() {
                trace!(conn = conn.id(), "ping after writer stopped");
            }
        }
        OpCode::Pong => {
            trace!(conn = conn.id(), "pong received");
        }
        OpCode::Close => return on_close(conn, frame.into_payload()),
    }
    Flow::Continue
}

fn too_big(conn: &Connection, err: &Error) {
    warn!(conn = conn.id(), %err, "message too large");
    fail(conn, CloseCode::MessageTooBig, "message too large");
}

fn deliver(conn: &Connection, limits: &Limits, opcode: OpCode, payload: Vec<u8>) {
    if let Err(err) = limits.check_message_size(payload.len()) {
        too_big(conn, &err);
        return;
    }
    match opcode {
        OpCode::Text => match String::from_utf8(payload) {
            Ok(text) => conn.dispatch(&Event::Text(text)),
            Err(_) => {
                warn!(conn = conn.id(), "invalid utf-8 in text message");
                fail(conn, CloseCode::InvalidPayload, "invalid utf-8");
            }
        },
        _ => conn.dispatch(&Event::Binary(payload)),
    }
}

fn on_close(conn: &Connection, payload: Vec<u8>) -> Flow {
    match conn.state() {
        ConnectionState::Open => {
            if let Some((code, reason)) = CloseCode::parse_payload(&payload) {
                debug!(conn = conn.id(), code = code.as_u16(), %reason, "peer closed");
            }
            conn.transition(ConnectionState::Closing);

            // Echo the peer's payload, then drop the stream once it is out.
            let weak = Arc::downgrade(&conn.inner);
            let mut echo = Outgoing::new(Message::new(OpCode::Close, payload));
            echo.on_success = Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Connection { inner }.kill();
                }
            }));
            if conn.push(echo, true).is_err() {
                conn.kill();
                return Flow::Stop;
            }
            Flow::Continue
        }
        ConnectionState::Closing => {
            trace!(conn = conn.id(), "close acknowledged");
            conn.kill();
            Flow::Stop
        }
        ConnectionState::Closed => Flow::Stop,
    }
}
