//! Connection-and-broadcast engine
//!
//! - **`registry`**: live connections, snapshots for fan-out
//! - **`broadcast`**: best-effort delivery to a snapshot
//! - **`ready`**: the shared ready flag
//! - **`reassembly`**: fragments to logical messages, per connection
//! - **`sniff`**: magic-byte classification of completed uploads
//! - **`session`**: the per-connection receive loop tying it together

pub mod broadcast;
pub mod ready;
pub mod reassembly;
pub mod registry;
pub mod session;
pub mod sniff;

pub use broadcast::BroadcastRelay;
pub use ready::ReadyState;
pub use reassembly::FrameReassembler;
pub use registry::{
    Connection, ConnectionHandle, ConnectionId, ConnectionRegistry, ConnectionStatus, Lifecycle,
    Outbound,
};
pub use session::SessionHandler;
pub use sniff::{Blob, FileType};

use crate::config::Config;
use crate::store::BlobStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Per-session knobs taken from configuration.
#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    pub keepalive_interval: Duration,
    pub outbound_queue: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(1200),
            outbound_queue: 64,
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            keepalive_interval: cfg.keepalive_interval(),
            outbound_queue: cfg.server.outbound_queue.max(1),
        }
    }
}

/// State shared by every session, cheap to clone.
#[derive(Clone)]
pub struct Hub {
    pub ready: Arc<ReadyState>,
    pub registry: ConnectionRegistry,
    pub relay: BroadcastRelay,
    pub store: Arc<dyn BlobStore>,
    pub settings: SessionSettings,
    /// Orders ready-flag announcements. Toggles and joins hold it from
    /// reading the flag until the value is queued, so every connection's
    /// queue sees flag values in toggle order.
    ready_order: Arc<Mutex<()>>,
}

impl Hub {
    pub fn new(store: Arc<dyn BlobStore>, settings: SessionSettings) -> Self {
        let registry = ConnectionRegistry::new();
        Self {
            ready: Arc::new(ReadyState::new(false)),
            relay: BroadcastRelay::new(registry.clone()),
            registry,
            store,
            settings,
            ready_order: Arc::new(Mutex::new(())),
        }
    }

    /// Flips the ready flag and announces the new value to everyone.
    pub async fn toggle_ready(&self) -> bool {
        let _order = self.ready_order.lock().await;
        let ready = self.ready.toggle();
        let delivered = self.relay.broadcast(&ready.to_string()).await;
        tracing::info!(ready, delivered, "Ready flag toggled");
        ready
    }

    /// Registers a connection and queues the current flag value for it as
    /// one step with respect to [`toggle_ready`](Self::toggle_ready).
    pub async fn join(&self, handle: ConnectionHandle) -> (Connection, bool) {
        let _order = self.ready_order.lock().await;
        let id = self.registry.register(handle.clone()).await;
        let conn = Connection { id, handle };
        let ready = self.ready.get();
        self.relay.send_to(&conn, &ready.to_string()).await;
        (conn, ready)
    }
}
