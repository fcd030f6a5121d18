//! Best-effort fan-out to open connections.

use crate::relay::registry::{Connection, ConnectionRegistry, Outbound};

/// The only writer to connections from outside their own session.
#[derive(Debug, Clone)]
pub struct BroadcastRelay {
    registry: ConnectionRegistry,
}

impl BroadcastRelay {
    pub fn new(registry: ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Sends `message` to every open connection in a registry snapshot.
    ///
    /// A failed target is logged, evicted and unregistered once the fan-out
    /// is done; it never stops delivery to the others. Returns how many
    /// connections the message was queued for.
    pub async fn broadcast(&self, message: &str) -> usize {
        let targets = self.registry.snapshot().await;
        let mut delivered = 0;
        let mut failed = Vec::new();

        for conn in targets.iter().filter(|c| c.handle.is_open()) {
            match conn.handle.send(Outbound::Text(message.to_string())) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(conn_id = conn.id, error = %e, "Broadcast target failed");
                    failed.push(conn);
                }
            }
        }

        for conn in failed {
            self.drop_target(conn).await;
        }

        tracing::debug!(delivered, total = targets.len(), "Broadcast complete");
        delivered
    }

    /// Single-target variant with the same failure policy.
    pub async fn send_to(&self, conn: &Connection, message: &str) -> bool {
        if !conn.handle.is_open() {
            tracing::debug!(conn_id = conn.id, "Skipping send to connection that is not open");
            return false;
        }

        match conn.handle.send(Outbound::Text(message.to_string())) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(conn_id = conn.id, error = %e, "Send to connection failed");
                self.drop_target(conn).await;
                false
            }
        }
    }

    async fn drop_target(&self, conn: &Connection) {
        conn.handle.evict();
        self.registry.unregister(conn.id).await;
    }
}
