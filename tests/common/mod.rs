#![allow(dead_code)]

use async_trait::async_trait;
use dropcast::error::RelayError;
use dropcast::relay::{Blob, Hub, SessionSettings};
use dropcast::server::listener::serve;
use dropcast::store::BlobStore;
use dropcast::ws::frame::{Frame, FrameError, Opcode, encode_frame, parse_frame};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const WAIT: Duration = Duration::from_secs(5);
pub const QUIET: Duration = Duration::from_millis(200);

pub const PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
];

/// Keeps uploads in memory and hands out `mem://` locators.
#[derive(Default)]
pub struct MemoryStore {
    pub blobs: Mutex<Vec<(String, Vec<u8>)>>,
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn persist(&self, blob: &Blob) -> Result<String, RelayError> {
        let mut blobs = self.blobs.lock().unwrap();
        let locator = format!("mem://{}.{}", blobs.len(), blob.extension());
        blobs.push((locator.clone(), blob.data.to_vec()));
        Ok(locator)
    }
}

impl MemoryStore {
    pub fn stored(&self) -> Vec<(String, Vec<u8>)> {
        self.blobs.lock().unwrap().clone()
    }
}

/// Rejects every blob.
pub struct FailingStore;

#[async_trait]
impl BlobStore for FailingStore {
    async fn persist(&self, _blob: &Blob) -> Result<String, RelayError> {
        Err(RelayError::Storage(std::io::Error::other("disk full")))
    }
}

/// Binds an ephemeral port and serves `hub` on it.
pub async fn spawn_server(hub: Hub) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, hub));
    addr
}

pub async fn spawn_with_store(store: Arc<dyn BlobStore>) -> (SocketAddr, Hub) {
    let hub = Hub::new(store, SessionSettings::default());
    let addr = spawn_server(hub.clone()).await;
    (addr, hub)
}

/// Minimal client that speaks raw WebSocket frames.
pub struct WsClient {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl WsClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let handshake = format!(
            "GET /ws HTTP/1.1\r\nHost: {}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n",
            addr
        );
        stream.write_all(handshake.as_bytes()).await.unwrap();

        let mut buf = Vec::new();
        let headers_end = loop {
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
            let mut temp = [0u8; 1024];
            let n = stream.read(&mut temp).await.unwrap();
            assert!(n > 0, "server closed during handshake");
            buf.extend_from_slice(&temp[..n]);
        };

        let head = String::from_utf8_lossy(&buf[..headers_end]).to_string();
        assert!(head.starts_with("HTTP/1.1 101"), "unexpected handshake reply: {}", head);
        assert!(head.contains("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));

        let buf = buf[headers_end..].to_vec();
        Self { stream, buf }
    }

    /// Connects and consumes the ready-flag greeting.
    pub async fn join(addr: SocketAddr) -> (Self, String) {
        let mut client = Self::connect(addr).await;
        let greeting = client.recv_text().await;
        (client, greeting)
    }

    pub async fn send(&mut self, frame: Frame) {
        let bytes = encode_frame(&frame, Some([0x12, 0x34, 0x56, 0x78]));
        self.stream.write_all(&bytes).await.unwrap();
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    /// Next frame from the server, `None` once the socket is closed.
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        loop {
            match parse_frame(&self.buf) {
                Ok((frame, consumed)) => {
                    self.buf.drain(..consumed);
                    return Some(frame);
                }
                Err(FrameError::Incomplete) => {}
                Err(e) => panic!("server sent a malformed frame: {:?}", e),
            }

            let mut temp = [0u8; 4096];
            let n = match self.stream.read(&mut temp).await {
                Ok(n) => n,
                Err(_) => return None,
            };
            if n == 0 {
                return None;
            }
            self.buf.extend_from_slice(&temp[..n]);
        }
    }

    /// Next text message, skipping pings.
    pub async fn recv_text(&mut self) -> String {
        tokio::time::timeout(WAIT, async {
            loop {
                let frame = self.recv_frame().await.expect("connection closed");
                match frame.opcode {
                    Opcode::Text => return String::from_utf8(frame.payload).unwrap(),
                    Opcode::Ping => continue,
                    other => panic!("expected text, got {:?}", other),
                }
            }
        })
        .await
        .expect("timed out waiting for text")
    }

    /// Asserts nothing arrives for a short while.
    pub async fn expect_silence(&mut self) {
        let res = tokio::time::timeout(QUIET, self.recv_frame()).await;
        assert!(res.is_err(), "unexpected frame: {:?}", res);
    }

    pub async fn upload(&mut self, data: &[u8]) {
        self.send(Frame::binary(data.to_vec(), true)).await;
    }
}

/// Sends one HTTP request with `Connection: close` and returns the raw reply.
pub async fn http_request(addr: SocketAddr, method: &str, path: &str) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\nContent-Length: 0\r\n\r\n",
        method, path, addr
    );
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut reply = Vec::new();
    tokio::time::timeout(WAIT, stream.read_to_end(&mut reply))
        .await
        .unwrap()
        .unwrap();
    reply
}

/// Splits a raw reply into its status line and body.
pub fn split_reply(reply: &[u8]) -> (String, Vec<u8>) {
    let pos = reply
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("reply has no header terminator");
    let head = String::from_utf8_lossy(&reply[..pos]).to_string();
    let status = head.lines().next().unwrap_or("").to_string();
    (status, reply[pos + 4..].to_vec())
}

/// Polls until the hub's registry holds `expected` connections.
pub async fn wait_for_members(hub: &Hub, expected: usize) {
    tokio::time::timeout(WAIT, async {
        while hub.registry.len().await != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("registry never reached expected size");
}
