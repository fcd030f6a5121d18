//! Blob persistence
//!
//! The relay only needs "persist bytes, get a locator". Serving stored
//! blobs back is a convenience for the download route.

pub mod disk;

pub use disk::DiskStore;

use crate::error::RelayError;
use crate::relay::sniff::Blob;
use async_trait::async_trait;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stores a classified blob and returns the locator clients can fetch.
    async fn persist(&self, blob: &Blob) -> Result<String, RelayError>;

    /// Reads back a stored blob by name. `Ok(None)` when it does not exist.
    async fn fetch(&self, _name: &str) -> Result<Option<Vec<u8>>, RelayError> {
        Ok(None)
    }
}

/// Whether `name` is a plain file name that cannot escape the store root.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains("..")
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}
