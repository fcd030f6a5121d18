use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use crate::http::connection::Connection;
use crate::relay::{Hub, SessionSettings};
use crate::store::DiskStore;

pub async fn run(cfg: &Config) -> anyhow::Result<()> {
    let store = DiskStore::open(&cfg.storage.upload_dir, cfg.public_url()?).await?;
    let hub = Hub::new(Arc::new(store), SessionSettings::from(cfg));

    let listener = TcpListener::bind(&cfg.server.listen_addr).await?;
    info!("Listening on {}", cfg.server.listen_addr);

    serve(listener, hub).await
}

/// Accepts connections forever, one task each.
pub async fn serve(listener: TcpListener, hub: Hub) -> anyhow::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        info!("Accepted connection from {}", peer);

        let hub = hub.clone();
        tokio::spawn(async move {
            let conn = Connection::new(socket, hub);
            if let Err(e) = conn.run().await {
                tracing::warn!("Connection error from {}: {}", peer, e);
            }
        });
    }
}
