use anyhow::Context;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const DEFAULT_CONFIG_PATH: &str = "dropcast.yaml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,

    /// Base used when building download locators. Defaults to
    /// `http://{listen_addr}`.
    pub public_url: Option<String>,

    /// Seconds between server-initiated pings on every WebSocket.
    pub keepalive_interval_secs: u64,

    /// Messages that may queue for one connection before it counts as stalled.
    pub outbound_queue: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            public_url: None,
            keepalive_interval_secs: 1200,
            outbound_queue: 64,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("UploadedFiles"),
        }
    }
}

impl Config {
    /// Loads the YAML file named by `DROPCAST_CONFIG` (or `dropcast.yaml`
    /// when present), then applies the `LISTEN` override.
    pub fn load() -> anyhow::Result<Self> {
        let explicit = std::env::var("DROPCAST_CONFIG").ok();
        let path = explicit
            .clone()
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        let mut cfg = match std::fs::read_to_string(&path) {
            Ok(raw) => Self::from_yaml(&raw).with_context(|| format!("invalid config {}", path))?,
            Err(e) if explicit.is_none() && e.kind() == std::io::ErrorKind::NotFound => {
                Self::default()
            }
            Err(e) => return Err(e).with_context(|| format!("failed to read config {}", path)),
        };

        if let Ok(listen_addr) = std::env::var("LISTEN") {
            cfg.server.listen_addr = listen_addr;
        }

        Ok(cfg)
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        let cfg: Config = serde_yaml::from_str(raw)?;
        if cfg.server.outbound_queue == 0 {
            anyhow::bail!("server.outbound_queue must be at least 1");
        }
        Ok(cfg)
    }

    pub fn public_url(&self) -> anyhow::Result<Url> {
        let raw = match &self.server.public_url {
            Some(url) => url.clone(),
            None => format!("http://{}", self.server.listen_addr),
        };
        Url::parse(&raw).with_context(|| format!("invalid public url {}", raw))
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.server.keepalive_interval_secs.max(1))
    }
}
