//! Error taxonomy for the relay core.

use crate::ws::frame::FrameError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    /// The connection broke mid-read or mid-write.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The peer sent bytes that do not form a valid WebSocket frame.
    #[error("malformed frame: {0:?}")]
    MalformedFrame(FrameError),

    /// The peer's outbound queue is closed or not draining.
    #[error("peer is not accepting messages ({0})")]
    PeerUnavailable(&'static str),

    /// Sent to the uploader when no magic-byte signature matches.
    #[error("Could not detect the file type.")]
    UnrecognizedFileType,

    /// Sent to the uploader when the store rejects the blob.
    #[error("Could not store the file: {0}")]
    Storage(#[source] std::io::Error),

    /// A new message started while a previous one was still unterminated.
    #[error("new message started with {discarded} bytes of an unterminated message pending")]
    ProtocolViolation { discarded: usize },
}
