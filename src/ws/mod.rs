//! WebSocket wire protocol.
//!
//! Frames are decoded by hand so that every fragment, and its FIN bit,
//! reaches the session. Message reassembly is the relay's job, not the
//! codec's.

pub mod frame;
pub mod handshake;

pub use frame::{Frame, FrameError, Opcode, encode_frame, parse_frame};
