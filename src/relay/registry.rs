//! Live connection tracking
//!
//! The registry is the only place that knows every open connection. It
//! hands out point-in-time snapshots so that callers can do I/O without
//! holding its lock.

use crate::error::RelayError;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, RwLock, mpsc};

pub type ConnectionId = u64;

/// Lifecycle of a single WebSocket connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Open,
    Closing,
    Closed,
}

impl Lifecycle {
    fn as_u8(self) -> u8 {
        match self {
            Lifecycle::Open => 0,
            Lifecycle::Closing => 1,
            Lifecycle::Closed => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Lifecycle::Open,
            1 => Lifecycle::Closing,
            _ => Lifecycle::Closed,
        }
    }
}

/// Work queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Pong(Bytes),
    Close(Option<u16>),
}

/// Lifecycle and eviction signal shared by a connection's session, its
/// writer task and the broadcast path. Holds no queue sender.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStatus {
    inner: Arc<StatusInner>,
}

#[derive(Debug, Default)]
struct StatusInner {
    lifecycle: AtomicU8,
    evicted: Notify,
}

impl ConnectionStatus {
    pub fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.inner.lifecycle.load(Ordering::Acquire))
    }

    pub fn set_lifecycle(&self, state: Lifecycle) {
        self.inner.lifecycle.store(state.as_u8(), Ordering::Release);
    }

    /// Marks the connection closed and wakes its session so it can wind down.
    pub fn evict(&self) {
        self.set_lifecycle(Lifecycle::Closed);
        self.inner.evicted.notify_one();
    }

    /// Resolves once [`evict`](Self::evict) has been called.
    pub async fn evicted(&self) {
        self.inner.evicted.notified().await
    }
}

/// Cloneable handle to a connection's outbound side.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    outbound: mpsc::Sender<Outbound>,
    status: ConnectionStatus,
}

impl ConnectionHandle {
    pub fn new(outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            outbound,
            status: ConnectionStatus::default(),
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status.clone()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.status.lifecycle()
    }

    pub fn set_lifecycle(&self, state: Lifecycle) {
        self.status.set_lifecycle(state);
    }

    pub fn is_open(&self) -> bool {
        self.lifecycle() == Lifecycle::Open
    }

    /// Queues a message without waiting. A full queue means the peer is not
    /// draining and is reported the same way as a closed one.
    pub fn send(&self, message: Outbound) -> Result<(), RelayError> {
        self.outbound.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => RelayError::PeerUnavailable("queue full"),
            TrySendError::Closed(_) => RelayError::PeerUnavailable("queue closed"),
        })
    }

    pub fn evict(&self) {
        self.status.evict();
    }

    pub async fn evicted(&self) {
        self.status.evicted().await
    }
}

/// A registered connection.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: ConnectionId,
    pub handle: ConnectionHandle,
}

/// Thread-safe set of live connections.
#[derive(Debug, Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<RwLock<BTreeMap<ConnectionId, ConnectionHandle>>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection under a fresh id. Ids are never reused.
    pub async fn register(&self, handle: ConnectionHandle) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.connections.write().await.insert(id, handle);
        tracing::debug!(conn_id = id, "Connection registered");
        id
    }

    /// Removes a connection. Removing an absent id is a no-op.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.connections.write().await.remove(&id).is_some();
        if removed {
            tracing::debug!(conn_id = id, "Connection unregistered");
        }
        removed
    }

    /// Point-in-time copy of the registered connections, ordered by id.
    pub async fn snapshot(&self) -> Vec<Connection> {
        self.connections
            .read()
            .await
            .iter()
            .map(|(id, handle)| Connection {
                id: *id,
                handle: handle.clone(),
            })
            .collect()
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
