use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::http::parser::{ParseError, parse_http_request};
use crate::http::request::{Method, Request};
use crate::http::response::Response;
use crate::http::writer::ResponseWriter;
use crate::relay::Hub;
use crate::relay::session;
use crate::relay::sniff::FileType;
use crate::store::is_valid_name;
use crate::ws::handshake::{SUPPORTED_VERSION, accept_key};

/// Requests larger than this are rejected rather than buffered forever.
const MAX_REQUEST_BYTES: usize = 1024 * 1024;

pub struct Connection<S> {
    stream: S,
    buffer: Vec<u8>,
    state: ConnectionState,
    hub: Hub,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(ResponseWriter, Next),
    Upgraded,
    Closed,
}

/// What happens once a response has been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    KeepAlive,
    Close,
    Upgrade,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(stream: S, hub: Hub) -> Self {
        Self {
            stream,
            buffer: Vec::with_capacity(4096),
            state: ConnectionState::Reading,
            hub,
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            let state = std::mem::replace(&mut self.state, ConnectionState::Closed);

            self.state = match state {
                ConnectionState::Reading => match self.read_request().await? {
                    Some(req) => ConnectionState::Processing(req),
                    None => ConnectionState::Closed,
                },

                ConnectionState::Processing(req) => {
                    let (response, next) = route(&self.hub, &req).await;
                    ConnectionState::Writing(ResponseWriter::new(&response), next)
                }

                ConnectionState::Writing(mut writer, next) => {
                    writer.write_to_stream(&mut self.stream).await?;

                    match next {
                        Next::KeepAlive => ConnectionState::Reading,
                        Next::Close => ConnectionState::Closed,
                        Next::Upgrade => ConnectionState::Upgraded,
                    }
                }

                ConnectionState::Upgraded => {
                    let pending = BytesMut::from(&self.buffer[..]);
                    return session::serve(self.stream, pending, self.hub).await;
                }

                ConnectionState::Closed => break,
            };
        }

        Ok(())
    }

    pub async fn read_request(&mut self) -> anyhow::Result<Option<Request>> {
        loop {
            match parse_http_request(&self.buffer) {
                Ok((request, consumed)) => {
                    self.buffer.drain(..consumed);
                    return Ok(Some(request));
                }

                Err(ParseError::Incomplete) => {}

                Err(e) => {
                    return Err(anyhow::anyhow!("HTTP parse error: {:?}", e));
                }
            }

            if self.buffer.len() > MAX_REQUEST_BYTES {
                anyhow::bail!("request exceeds {} bytes", MAX_REQUEST_BYTES);
            }

            let mut temp = [0u8; 1024];
            let n = self.stream.read(&mut temp).await?;

            if n == 0 {
                return Ok(None);
            }

            self.buffer.extend_from_slice(&temp[..n]);
        }
    }
}

/// How a stored file is handed back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Attachment,
    Inline,
}

/// Maps a request to a response. Only `/ws` can end in an upgrade.
///
/// Every response is open to any origin.
pub async fn route(hub: &Hub, req: &Request) -> (Response, Next) {
    let (response, next) = dispatch(hub, req).await;
    (response.with_cors(), next)
}

async fn dispatch(hub: &Hub, req: &Request) -> (Response, Next) {
    let keep_alive = if req.keep_alive() {
        Next::KeepAlive
    } else {
        Next::Close
    };
    let path = req.route();

    tracing::debug!(method = ?req.method, path = %req.path, "Request");

    let response = match (path, &req.method) {
        ("/", Method::GET) => Response::ok("Hello World"),

        ("/ws", Method::GET) => return websocket_handshake(req, keep_alive),

        ("/toggle-flag", Method::POST) => {
            hub.toggle_ready().await;
            Response::ok("Flag toggled!")
        }

        (_, Method::OPTIONS) => Response::preflight(req.header("Access-Control-Request-Headers")),

        (p, Method::GET) if p.starts_with("/download/") => {
            serve_file(hub, &p["/download/".len()..], Disposition::Attachment).await
        }

        (p, Method::GET) if p.starts_with("/uploads/") => {
            serve_file(hub, &p["/uploads/".len()..], Disposition::Inline).await
        }

        ("/" | "/ws" | "/toggle-flag", _) => Response::method_not_allowed(),
        (p, _) if p.starts_with("/download/") || p.starts_with("/uploads/") => {
            Response::method_not_allowed()
        }

        _ => Response::not_found(),
    };

    (response, keep_alive)
}

fn websocket_handshake(req: &Request, keep_alive: Next) -> (Response, Next) {
    if !req.is_websocket_upgrade() {
        return (Response::bad_request("Expected a WebSocket upgrade"), keep_alive);
    }

    if let Some(version) = req.header("Sec-WebSocket-Version") {
        if version.trim() != SUPPORTED_VERSION {
            return (
                Response::bad_request("Unsupported WebSocket version"),
                keep_alive,
            );
        }
    }

    let Some(key) = req.header("Sec-WebSocket-Key") else {
        return (Response::bad_request("Missing Sec-WebSocket-Key"), keep_alive);
    };

    tracing::info!("Upgrading connection to WebSocket");
    (Response::switching_protocols(&accept_key(key)), Next::Upgrade)
}

async fn serve_file(hub: &Hub, name: &str, disposition: Disposition) -> Response {
    if !is_valid_name(name) {
        return Response::bad_request("Invalid file name");
    }

    match hub.store.fetch(name).await {
        Ok(Some(data)) => match disposition {
            Disposition::Attachment => Response::attachment(name, data),
            Disposition::Inline => {
                let kind = name
                    .rsplit_once('.')
                    .map(|(_, ext)| FileType::from_extension(ext))
                    .unwrap_or(FileType::Unknown);
                Response::inline(kind.content_type(), data)
            }
        },
        Ok(None) => Response::not_found(),
        Err(e) => {
            tracing::error!(file = %name, error = %e, "Failed to read stored file");
            Response::internal_error()
        }
    }
}
