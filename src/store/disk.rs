use crate::error::RelayError;
use crate::relay::sniff::Blob;
use crate::store::{BlobStore, is_valid_name};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use url::Url;
use uuid::Uuid;

/// Stores blobs as files in one directory.
#[derive(Debug, Clone)]
pub struct DiskStore {
    root: PathBuf,
    public_url: Url,
}

impl DiskStore {
    /// Opens the store, creating `root` if needed.
    pub async fn open(root: impl Into<PathBuf>, public_url: Url) -> anyhow::Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        tracing::info!(dir = %root.display(), "Upload directory ready");
        Ok(Self { root, public_url })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Download locator for a stored file name.
    pub fn locator_for(&self, name: &str) -> String {
        format!(
            "{}/download/{}",
            self.public_url.as_str().trim_end_matches('/'),
            name
        )
    }
}

#[async_trait]
impl BlobStore for DiskStore {
    async fn persist(&self, blob: &Blob) -> Result<String, RelayError> {
        let name = format!("file_{}.{}", Uuid::new_v4(), blob.extension());
        let path = self.root.join(&name);

        tokio::fs::write(&path, &blob.data)
            .await
            .map_err(RelayError::Storage)?;

        tracing::info!(file = %name, bytes = blob.len(), "Blob stored");
        Ok(self.locator_for(&name))
    }

    async fn fetch(&self, name: &str) -> Result<Option<Vec<u8>>, RelayError> {
        if !is_valid_name(name) {
            return Ok(None);
        }

        match tokio::fs::read(self.root.join(name)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(RelayError::Storage(e)),
        }
    }
}
