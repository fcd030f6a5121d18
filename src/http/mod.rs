//! HTTP/1.1 front door.
//!
//! Serves the few plain routes the relay needs and performs the WebSocket
//! opening handshake, after which the connection belongs to a relay session.
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for incoming request data
//!        └──────┬──────┘
//!               │ Request received
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Route to a response
//!        └──────┬───────────┘
//!               │ Response ready
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← Send response to client
//!        └──────┬───────────┘
//!               │ Response sent
//!               ├─ Keep-Alive → Reading (same connection)
//!               ├─ 101        → Upgraded (relay session takes the socket)
//!               └─ Close      → Closed
//! ```
//!
//! # Routes
//!
//! - `GET /` - liveness text
//! - `GET /ws` - WebSocket upgrade
//! - `POST /toggle-flag` - flip the ready flag and broadcast it
//! - `GET /download/{name}` - fetch a stored upload as an attachment
//! - `GET /uploads/{name}` - view a stored upload inline
//! - `OPTIONS *` - CORS preflight
//!
//! Every response allows any origin.

pub mod connection;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
