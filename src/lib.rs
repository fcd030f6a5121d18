//! Dropcast - shared-state relay over WebSockets
//!
//! Clients join a session over a WebSocket, observe a shared "ready" flag,
//! and upload files that are classified, stored, and announced to everyone.

pub mod config;
pub mod error;
pub mod http;
pub mod relay;
pub mod server;
pub mod store;
pub mod ws;
