//! Per-connection session
//!
//! ```text
//!   Connecting ──register + send ready flag──▶ Open ──close / error / eviction──▶ Closed
//! ```
//!
//! The receive loop owns the read half and the reassembler. All writes go
//! through the connection's outbound queue, drained by a separate writer
//! task that also drives the keep-alive ping.

use crate::error::RelayError;
use crate::relay::Hub;
use crate::relay::reassembly::{FrameReassembler, Message, MessageKind};
use crate::relay::registry::{
    Connection, ConnectionHandle, ConnectionId, ConnectionStatus, Lifecycle, Outbound,
};
use crate::relay::sniff::Blob;
use crate::ws::frame::{Frame, FrameError, Opcode, encode_frame, parse_frame};
use bytes::{Buf, Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Size of the scratch buffer each socket read lands in.
const READ_CHUNK: usize = 4096;

/// Close status echoed when the peer sends none.
const NORMAL_CLOSURE: u16 = 1000;

/// Close status sent before dropping a peer that sent a malformed frame.
const PROTOCOL_ERROR: u16 = 1002;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
}

pub struct SessionHandler<R> {
    reader: R,
    read_buf: BytesMut,
    reassembler: FrameReassembler,
    state: SessionState,
    conn: Connection,
    hub: Hub,
}

/// Runs a session over an upgraded stream. `pending` holds bytes already
/// read past the handshake.
pub async fn serve<S>(stream: S, pending: BytesMut, hub: Hub) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(stream);
    let (tx, rx) = mpsc::channel(hub.settings.outbound_queue);
    let handle = ConnectionHandle::new(tx);

    // The writer gets no sender, so it stops once every handle is dropped.
    tokio::spawn(write_loop(
        writer,
        rx,
        handle.status(),
        hub.settings.keepalive_interval,
    ));

    let mut session = SessionHandler::new(reader, pending, handle, hub);
    session.run().await
}

impl<R> SessionHandler<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R, pending: BytesMut, handle: ConnectionHandle, hub: Hub) -> Self {
        Self {
            reader,
            read_buf: pending,
            reassembler: FrameReassembler::new(),
            state: SessionState::Connecting,
            conn: Connection { id: 0, handle },
            hub,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Id assigned on join, 0 until then.
    pub fn id(&self) -> ConnectionId {
        self.conn.id
    }

    /// Drives the session until the peer leaves, the transport fails, or
    /// the connection is evicted. Errors never escape this session.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        if self.state != SessionState::Connecting {
            return Ok(());
        }

        let (conn, ready) = self.hub.join(self.conn.handle.clone()).await;
        self.conn.id = conn.id;
        self.state = SessionState::Open;
        tracing::info!(conn_id = conn.id, ready, "Client joined");

        match self.receive_loop(&conn).await {
            Ok(()) => tracing::info!(conn_id = conn.id, "Client disconnected"),
            Err(e) => tracing::warn!(conn_id = conn.id, error = %e, "Session ended with error"),
        }

        self.close(&conn).await;
        Ok(())
    }

    async fn receive_loop(&mut self, conn: &Connection) -> Result<(), RelayError> {
        loop {
            let frame = tokio::select! {
                res = read_frame(&mut self.reader, &mut self.read_buf) => match res {
                    Err(RelayError::MalformedFrame(e)) => {
                        conn.handle.set_lifecycle(Lifecycle::Closing);
                        let _ = conn.handle.send(Outbound::Close(Some(PROTOCOL_ERROR)));
                        return Err(RelayError::MalformedFrame(e));
                    }
                    res => res?,
                },
                _ = conn.handle.evicted() => {
                    tracing::info!(conn_id = conn.id, "Connection evicted");
                    return Ok(());
                }
            };

            let Some(frame) = frame else {
                return Ok(());
            };

            match frame.opcode {
                Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                    let start = match frame.opcode {
                        Opcode::Text => Some(MessageKind::Text),
                        Opcode::Binary => Some(MessageKind::Binary),
                        _ => None,
                    };
                    if start == Some(MessageKind::Binary) && !self.reassembler.is_accumulating() {
                        tracing::debug!(conn_id = conn.id, "Receiving upload");
                    }
                    let completed = self.reassembler.append(start, &frame.payload, frame.fin);
                    if let Some(message) = completed {
                        self.handle_message(conn, message).await;
                    }
                }
                Opcode::Close => {
                    conn.handle.set_lifecycle(Lifecycle::Closing);
                    let code = frame.close_code().unwrap_or(NORMAL_CLOSURE);
                    let _ = conn.handle.send(Outbound::Close(Some(code)));
                    return Ok(());
                }
                Opcode::Ping => {
                    if let Err(e) = conn.handle.send(Outbound::Pong(Bytes::from(frame.payload))) {
                        tracing::debug!(conn_id = conn.id, error = %e, "Could not queue pong");
                    }
                }
                Opcode::Pong => {
                    tracing::trace!(conn_id = conn.id, "Pong received");
                }
            }
        }
    }

    async fn handle_message(&self, conn: &Connection, message: Message) {
        match message.kind {
            MessageKind::Text => {
                let text = String::from_utf8_lossy(&message.payload);
                tracing::debug!(conn_id = conn.id, message = %text, "Client message");
            }
            MessageKind::Binary => self.handle_upload(conn, Blob::new(message.payload)).await,
        }
    }

    async fn handle_upload(&self, conn: &Connection, blob: Blob) {
        if !blob.kind.is_known() {
            tracing::warn!(
                conn_id = conn.id,
                bytes = blob.len(),
                "Upload has unrecognized file type"
            );
            let reply = RelayError::UnrecognizedFileType.to_string();
            self.hub.relay.send_to(conn, &reply).await;
            return;
        }

        match self.hub.store.persist(&blob).await {
            Ok(locator) => {
                tracing::info!(
                    conn_id = conn.id,
                    bytes = blob.len(),
                    kind = %blob.kind,
                    locator = %locator,
                    "Upload stored"
                );
                self.hub.relay.broadcast(&locator).await;
            }
            Err(e) => {
                tracing::error!(conn_id = conn.id, error = %e, "Failed to store upload");
                self.hub.relay.send_to(conn, &e.to_string()).await;
            }
        }
    }

    async fn close(&mut self, conn: &Connection) {
        let discarded = self.reassembler.reset();
        if discarded > 0 {
            tracing::debug!(
                conn_id = conn.id,
                bytes = discarded,
                "Dropped partial message on close"
            );
        }
        self.hub.registry.unregister(conn.id).await;
        if conn.handle.lifecycle() != Lifecycle::Closing {
            conn.handle.set_lifecycle(Lifecycle::Closed);
        }
        self.state = SessionState::Closed;
    }
}

/// Reads until one whole frame is buffered. `Ok(None)` means the peer hung up.
async fn read_frame<R>(reader: &mut R, buf: &mut BytesMut) -> Result<Option<Frame>, RelayError>
where
    R: AsyncRead + Unpin,
{
    loop {
        match parse_frame(&buf[..]) {
            Ok((frame, consumed)) => {
                buf.advance(consumed);
                return Ok(Some(frame));
            }
            Err(FrameError::Incomplete) => {}
            Err(e) => return Err(RelayError::MalformedFrame(e)),
        }

        let mut temp = [0u8; READ_CHUNK];
        let n = reader.read(&mut temp).await?;

        if n == 0 {
            return Ok(None);
        }

        buf.extend_from_slice(&temp[..n]);
    }
}

/// Drains a connection's outbound queue onto the socket and pings on a timer.
async fn write_loop<W>(
    mut writer: W,
    mut rx: mpsc::Receiver<Outbound>,
    status: ConnectionStatus,
    keepalive: Duration,
) where
    W: AsyncWrite + Unpin,
{
    let first = tokio::time::Instant::now() + keepalive;
    let mut heartbeat = tokio::time::interval_at(first, keepalive);

    loop {
        let (frame, closing) = tokio::select! {
            next = rx.recv() => match next {
                Some(Outbound::Text(text)) => (Frame::text(text), false),
                Some(Outbound::Pong(payload)) => (Frame::pong(payload.to_vec()), false),
                Some(Outbound::Close(code)) => (Frame::close(code), true),
                None => break,
            },
            _ = heartbeat.tick() => (Frame::ping(Vec::new()), false),
        };

        if let Err(e) = writer.write_all(&encode_frame(&frame, None)).await {
            tracing::warn!(error = %e, "Write to client failed");
            status.evict();
            return;
        }

        if closing {
            break;
        }
    }

    let _ = writer.flush().await;
    let _ = writer.shutdown().await;
    status.set_lifecycle(Lifecycle::Closed);
}
