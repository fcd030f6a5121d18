//! Per-connection message reassembly.
//!
//! ```text
//!        ┌──────────┐  start / continuation   ┌────────────────┐
//!        │   Idle   │ ──────────────────────▶ │  Accumulating  │ ◀─┐ non-final
//!        └──────────┘                         └───────┬────────┘ ──┘
//!             ▲          final fragment               │
//!             └───────────────────────────────────────┘
//! ```
//!
//! The buffer grows with the message; nothing is capped or truncated.

use crate::error::RelayError;
use bytes::{Bytes, BytesMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Binary,
}

/// A fully reassembled logical message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub payload: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyState {
    Idle,
    Accumulating(MessageKind),
}

#[derive(Debug)]
pub struct FrameReassembler {
    state: ReassemblyState,
    buffer: BytesMut,
    violations: u64,
}

impl Default for FrameReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self {
            state: ReassemblyState::Idle,
            buffer: BytesMut::new(),
            violations: 0,
        }
    }

    /// Feeds one fragment.
    ///
    /// `start` is the kind announced by the fragment when it opens a new
    /// message, or `None` for a continuation. Returns the completed message
    /// when `is_final` is set.
    ///
    /// A new start while a message is still accumulating discards the
    /// unterminated bytes and begins again with `chunk`. A continuation with
    /// nothing in progress starts a binary message.
    pub fn append(
        &mut self,
        start: Option<MessageKind>,
        chunk: &[u8],
        is_final: bool,
    ) -> Option<Message> {
        let kind = match (self.state, start) {
            (ReassemblyState::Idle, Some(kind)) => kind,
            (ReassemblyState::Idle, None) => {
                tracing::debug!(
                    bytes = chunk.len(),
                    "Continuation without a start, treating as binary"
                );
                MessageKind::Binary
            }
            (ReassemblyState::Accumulating(kind), None) => kind,
            (ReassemblyState::Accumulating(_), Some(kind)) => {
                let discarded = self.reset();
                self.violations += 1;
                tracing::warn!(
                    error = %RelayError::ProtocolViolation { discarded },
                    "Discarding unterminated message"
                );
                kind
            }
        };

        self.state = ReassemblyState::Accumulating(kind);
        self.buffer.extend_from_slice(chunk);

        if !is_final {
            return None;
        }

        self.state = ReassemblyState::Idle;
        Some(Message {
            kind,
            payload: self.buffer.split().freeze(),
        })
    }

    /// Drops any partial message. Returns how many bytes were discarded.
    pub fn reset(&mut self) -> usize {
        let discarded = self.buffer.len();
        self.buffer.clear();
        self.state = ReassemblyState::Idle;
        discarded
    }

    pub fn state(&self) -> ReassemblyState {
        self.state
    }

    pub fn is_accumulating(&self) -> bool {
        matches!(self.state, ReassemblyState::Accumulating(_))
    }

    /// Bytes held for the message in progress.
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Restarts caused by a new message interrupting an unterminated one.
    pub fn violations(&self) -> u64 {
        self.violations
    }
}
